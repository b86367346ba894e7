//! Converts lip-sync timing exported by external tools into a [`Sequence`].
//!
//! Two input families are understood: JSON (a bare array of cues or an object
//! holding `mouthCues`, `cues` or `markers`) and delimited text with one cue
//! per line (`start,end,symbol` or the two column `start<TAB>symbol` form).

use serde::Deserialize;

use crate::{
    timeline::{Sequence, VisemeEvent},
    viseme::VisemeCode,
    Result,
};

/// Shortest event an adapter will emit, in seconds.
pub const MIN_EVENT_DURATION: f32 = 0.06;
/// Span used when a cue carries no usable end or duration.
pub const DEFAULT_CUE_DURATION: f32 = 0.12;
/// Length of the silence returned for input that yields no cues.
pub const EMPTY_INPUT_DURATION: f32 = 0.3;

/// One timing entry before it is mapped onto a viseme code.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingCue {
    pub start: f32,
    /// Seconds until the cue ends; `None` lets the next cue's start decide.
    pub span: Option<f32>,
    pub symbol: String,
}

/// Maps an external mouth-shape symbol onto a viseme code. Unknown symbols
/// map to silence.
pub fn symbol_to_viseme(symbol: &str) -> VisemeCode {
    match symbol.trim() {
        "A" => VisemeCode::Aa,
        "E" | "R" => VisemeCode::E,
        "I" => VisemeCode::I,
        "O" => VisemeCode::O,
        "U" | "W" => VisemeCode::U,
        "C" | "S" => VisemeCode::SS,
        "F" => VisemeCode::FF,
        "L" => VisemeCode::DD,
        "M" => VisemeCode::PP,
        "TH" => VisemeCode::TH,
        _ => VisemeCode::Sil,
    }
}

/// Parses JSON or delimited timing text. Never fails: malformed JSON falls
/// through to the delimited reader, and input without a single usable cue
/// becomes one silence event.
pub fn parse_external_timing(input: &str) -> Sequence {
    let input = input.trim();

    if input.starts_with('{') || input.starts_with('[') {
        match try_parse_json(input) {
            Ok(cues) => return sequence_from_cues(&cues),
            Err(err) => {
                tracing::warn!(error = %err, "timing input is not valid JSON, reading as delimited text");
            }
        }
    }

    sequence_from_cues(&parse_delimited(input))
}

/// Strict JSON reader used by [`parse_external_timing`].
pub fn try_parse_json(input: &str) -> Result<Vec<TimingCue>> {
    let document: CueDocument = serde_json::from_str(input)?;
    let raw = match document {
        CueDocument::List(cues) => cues,
        CueDocument::Object(object) => object.cues,
    };
    Ok(raw.into_iter().map(RawCue::into_cue).collect())
}

/// Reads one cue per line, split on commas or tabs. Lines whose first field
/// is not a number (headers, comments) are skipped.
pub fn parse_delimited(input: &str) -> Vec<TimingCue> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split([',', '\t']).map(str::trim).collect();
            let start = parse_seconds(fields.first()?)?;
            match fields.len() {
                0 | 1 => None,
                2 => Some(TimingCue {
                    start,
                    span: None,
                    symbol: fields[1].to_string(),
                }),
                _ => Some(TimingCue {
                    start,
                    span: parse_seconds(fields[1]).map(|end| end - start),
                    symbol: fields[2].to_string(),
                }),
            }
        })
        .collect()
}

/// Builds the playback sequence, flooring every duration to
/// [`MIN_EVENT_DURATION`].
pub fn sequence_from_cues(cues: &[TimingCue]) -> Sequence {
    let events: Vec<VisemeEvent> = cues
        .iter()
        .enumerate()
        .map(|(index, cue)| {
            let span = cue
                .span
                .or_else(|| cues.get(index + 1).map(|next| next.start - cue.start))
                .filter(|span| span.is_finite() && *span != 0.0)
                .unwrap_or(DEFAULT_CUE_DURATION);
            VisemeEvent::new(
                symbol_to_viseme(&cue.symbol),
                cue.start,
                span.max(MIN_EVENT_DURATION),
            )
        })
        .collect();

    if events.is_empty() {
        tracing::debug!("timing input produced no cues");
        return Sequence::silence(EMPTY_INPUT_DURATION);
    }
    Sequence::new(events)
}

fn parse_seconds(field: &str) -> Option<f32> {
    field.parse::<f32>().ok().filter(|value| value.is_finite())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CueDocument {
    List(Vec<RawCue>),
    Object(CueObject),
}

#[derive(Deserialize)]
struct CueObject {
    #[serde(rename = "mouthCues", alias = "cues", alias = "markers", default)]
    cues: Vec<RawCue>,
}

#[derive(Deserialize)]
struct RawCue {
    #[serde(alias = "time")]
    start: Option<Scalar>,
    end: Option<Scalar>,
    duration: Option<Scalar>,
    #[serde(alias = "phoneme", alias = "code", alias = "mouth")]
    value: Option<Scalar>,
}

impl RawCue {
    fn into_cue(self) -> TimingCue {
        let start = self.start.and_then(|start| start.seconds()).unwrap_or(0.0);
        let span = self
            .end
            .and_then(|end| end.seconds())
            .filter(|end| *end != 0.0)
            .map(|end| end - start)
            .or_else(|| self.duration.and_then(|duration| duration.seconds()));
        TimingCue {
            start,
            span,
            symbol: self.value.map(Scalar::into_label).unwrap_or_default(),
        }
    }
}

/// JSON value that may arrive as a number or as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    fn seconds(&self) -> Option<f32> {
        match self {
            Scalar::Number(value) => Some(*value as f32).filter(|value| value.is_finite()),
            Scalar::Text(text) => parse_seconds(text.trim()),
        }
    }

    fn into_label(self) -> String {
        match self {
            Scalar::Number(value) => value.to_string(),
            Scalar::Text(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(sequence: &Sequence) -> Vec<VisemeCode> {
        sequence.codes().collect()
    }

    fn durations(sequence: &Sequence) -> Vec<f32> {
        sequence.events().iter().map(|event| event.duration).collect()
    }

    #[test]
    fn maps_every_known_symbol() {
        let cases = [
            ("A", VisemeCode::Aa),
            ("E", VisemeCode::E),
            ("I", VisemeCode::I),
            ("O", VisemeCode::O),
            ("U", VisemeCode::U),
            ("C", VisemeCode::SS),
            ("F", VisemeCode::FF),
            ("L", VisemeCode::DD),
            ("M", VisemeCode::PP),
            ("W", VisemeCode::U),
            ("R", VisemeCode::E),
            ("S", VisemeCode::SS),
            ("TH", VisemeCode::TH),
            ("-", VisemeCode::Sil),
            ("X", VisemeCode::Sil),
            ("", VisemeCode::Sil),
        ];
        for (symbol, code) in cases {
            assert_eq!(symbol_to_viseme(symbol), code, "symbol {symbol:?}");
        }
    }

    #[test]
    fn reads_comma_separated_cues() {
        let sequence = parse_external_timing("0,0.2,A\n0.2,0.4,M");

        assert_eq!(codes(&sequence), vec![VisemeCode::Aa, VisemeCode::PP]);
        assert!(durations(&sequence)
            .iter()
            .all(|duration| *duration >= MIN_EVENT_DURATION));
        assert!((sequence.events()[1].start - 0.2).abs() < 1e-6);
    }

    #[test]
    fn reads_two_column_tab_separated_cues() {
        let sequence = parse_external_timing("0.00\tA\n0.25\tM\n0.40\tX\n");

        assert_eq!(
            codes(&sequence),
            vec![VisemeCode::Aa, VisemeCode::PP, VisemeCode::Sil]
        );
        let durations = durations(&sequence);
        assert!((durations[0] - 0.25).abs() < 1e-6);
        assert!((durations[1] - 0.15).abs() < 1e-6);
        assert_eq!(durations[2], DEFAULT_CUE_DURATION);
    }

    #[test]
    fn skips_header_lines() {
        let sequence = parse_external_timing("start,end,value\n0.1,0.3,O");
        assert_eq!(codes(&sequence), vec![VisemeCode::O]);
    }

    #[test]
    fn reads_mouth_cue_documents() {
        let input = r#"{
            "metadata": { "duration": 0.3 },
            "mouthCues": [
                { "start": 0.00, "end": 0.02, "value": "X" },
                { "start": 0.02, "end": 0.30, "value": "A" }
            ]
        }"#;
        let sequence = parse_external_timing(input);

        assert_eq!(codes(&sequence), vec![VisemeCode::Sil, VisemeCode::Aa]);
        assert_eq!(durations(&sequence)[0], MIN_EVENT_DURATION);
        assert!((durations(&sequence)[1] - 0.28).abs() < 1e-5);
    }

    #[test]
    fn reads_bare_arrays_with_alternate_field_names() {
        let input = r#"[
            { "time": "0.5", "duration": 0.1, "phoneme": "F" },
            { "time": 0.0, "duration": 0.2, "mouth": "O" }
        ]"#;
        let sequence = parse_external_timing(input);

        assert_eq!(codes(&sequence), vec![VisemeCode::O, VisemeCode::FF]);
        assert!((sequence.events()[1].start - 0.5).abs() < 1e-6);
    }

    #[test]
    fn zero_spans_use_the_default_duration() {
        let sequence = parse_external_timing(r#"{ "cues": [ { "start": 1.0, "end": 1.0, "value": "A" } ] }"#);
        assert_eq!(durations(&sequence), vec![DEFAULT_CUE_DURATION]);
    }

    #[test]
    fn malformed_json_falls_back_to_silence() {
        let sequence = parse_external_timing(r#"{ "mouthCues": [ { "start": "#);

        assert_eq!(codes(&sequence), vec![VisemeCode::Sil]);
        assert_eq!(durations(&sequence), vec![EMPTY_INPUT_DURATION]);
    }

    #[test]
    fn empty_input_is_never_an_empty_sequence() {
        for input in ["", "   \n  ", "garbage", "{}", "[]", r#"{ "markers": [] }"#] {
            let sequence = parse_external_timing(input);
            assert_eq!(sequence.len(), 1, "input {input:?}");
            assert_eq!(sequence.events()[0].code, VisemeCode::Sil);
        }
    }

    #[test]
    fn strict_reader_reports_errors() {
        assert!(try_parse_json("[{").is_err());
        assert_eq!(try_parse_json("[]").unwrap(), Vec::new());
    }
}
