//! Viseme sequences and the per-tick scheduler that plays them.

use serde::{Deserialize, Serialize};

use crate::{
    assets::FaceAsset,
    config::{SchedulerConfig, TransitionMode},
    engine::VisemeEngine,
    viseme::VisemeCode,
};

/// One entry of a viseme timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeEvent {
    pub code: VisemeCode,
    pub start: f32,
    pub duration: f32,
}

impl VisemeEvent {
    pub fn new(code: VisemeCode, start: f32, duration: f32) -> Self {
        Self {
            code,
            start,
            duration,
        }
    }

    pub fn end(&self) -> f32 {
        self.start + self.duration
    }
}

/// Ordered viseme timeline with non-decreasing start times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    events: Vec<VisemeEvent>,
}

impl Sequence {
    /// Builds a sequence, sanitizing timings and sorting by start time.
    /// Sorting is stable so simultaneous events keep their input order.
    pub fn new(events: Vec<VisemeEvent>) -> Self {
        let mut events: Vec<VisemeEvent> = events
            .into_iter()
            .map(|event| VisemeEvent {
                code: event.code,
                start: finite_or_zero(event.start).max(0.0),
                duration: finite_or_zero(event.duration).max(0.0),
            })
            .collect();
        events.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self { events }
    }

    /// A sequence holding a single silence event.
    pub fn silence(duration: f32) -> Self {
        Self::new(vec![VisemeEvent::new(VisemeCode::Sil, 0.0, duration)])
    }

    pub fn events(&self) -> &[VisemeEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn codes(&self) -> impl Iterator<Item = VisemeCode> + '_ {
        self.events.iter().map(|event| event.code)
    }

    /// End time of the latest event.
    pub fn duration(&self) -> f32 {
        self.events
            .iter()
            .map(VisemeEvent::end)
            .fold(0.0, f32::max)
    }
}

impl FromIterator<VisemeEvent> for Sequence {
    fn from_iter<T: IntoIterator<Item = VisemeEvent>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Snapshot of the scheduler's progress through the loaded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub playhead: f32,
    pub event_index: usize,
    pub current_code: VisemeCode,
    pub target_code: VisemeCode,
    pub transition_progress: f32,
}

/// Explicit cross-fade between two codes, advanced at a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub current: VisemeCode,
    pub target: VisemeCode,
    pub progress: f32,
}

impl Default for Transition {
    fn default() -> Self {
        Self::settled(VisemeCode::Sil)
    }
}

impl Transition {
    pub fn settled(code: VisemeCode) -> Self {
        Self {
            current: code,
            target: code,
            progress: 1.0,
        }
    }

    /// Starts a new transition from the current target when `code` differs.
    pub fn retarget(&mut self, code: VisemeCode) {
        if code != self.target {
            self.current = self.target;
            self.target = code;
            self.progress = 0.0;
        }
    }

    /// Advances by `dt` seconds and returns the eased progress.
    pub fn advance(&mut self, dt: f32, blend_duration: f32) -> f32 {
        self.progress = (self.progress + dt / blend_duration.max(1e-3)).min(1.0);
        ease_in_out_cubic(self.progress)
    }
}

/// Quadratic ease-in-out on `[0, 1]`.
pub fn ease_in_out_quad(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Cubic ease-in-out on `[0, 1]`.
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// An event after time scaling, with absolute start and end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub code: VisemeCode,
    pub start: f32,
    pub end: f32,
}

impl ScheduledEvent {
    fn contains(&self, time: f32) -> bool {
        time >= self.start && time < self.end
    }

    /// Attack/hold/release envelope used in ramp mode.
    fn ramp(&self) -> Ramp {
        let span = (self.end - self.start).max(0.0);
        Ramp {
            rise: (self.start - RAMP_LEAD.min(2.0 * span / 3.0)).max(0.0),
            peak: self.start + RAMP_ATTACK.min(span / 2.0),
            fall: self.end + RAMP_LEAD.min(span / 2.0),
        }
    }
}

/// Longest lead-in before an event and release after it, in seconds.
const RAMP_LEAD: f32 = 0.06;
/// Longest climb from onset to peak, in seconds.
const RAMP_ATTACK: f32 = 0.025;
const RAMP_MIN_SPAN: f32 = 1e-3;

/// Linear envelope: zero at `rise`, full at `peak`, zero again at `fall`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    rise: f32,
    peak: f32,
    fall: f32,
}

impl Ramp {
    fn covers(&self, time: f32) -> bool {
        time >= self.rise && time <= self.fall
    }

    fn level(&self, time: f32) -> f32 {
        let level = if time <= self.peak {
            (time - self.rise) / (self.peak - self.rise).max(RAMP_MIN_SPAN)
        } else {
            1.0 - (time - self.peak) / (self.fall - self.peak).max(RAMP_MIN_SPAN)
        };
        level.clamp(0.0, 1.0)
    }
}

/// Plays a [`Sequence`] against a face, one `update` per animation frame.
/// Ramp mode applies the latest event whose envelope covers the playhead.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    source: Sequence,
    time_scale: f32,
    events: Vec<ScheduledEvent>,
    state: PlaybackState,
    transition: Transition,
    intensity: f32,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let time_scale = sanitize_scale(config.time_scale);
        Self {
            config,
            source: Sequence::default(),
            time_scale,
            events: Vec::new(),
            state: PlaybackState::default(),
            transition: Transition::default(),
            intensity: 1.0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.state.phase
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn mode(&self) -> TransitionMode {
        self.config.mode
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    /// End of the trailing silence, in scaled seconds.
    pub fn duration(&self) -> f32 {
        self.events.last().map(|event| event.end).unwrap_or(0.0)
    }

    /// Replaces the loaded sequence and returns to `Idle`. The face is not
    /// touched; callers holding one should follow up with [`Scheduler::stop`].
    pub fn load(&mut self, sequence: &Sequence, time_scale: f32) {
        self.source = sequence.clone();
        self.time_scale = sanitize_scale(time_scale);
        self.rebuild_events();
        self.state = PlaybackState::default();
        self.transition = Transition::default();

        tracing::debug!(
            events = self.events.len(),
            time_scale = self.time_scale,
            duration = self.duration(),
            "loaded viseme sequence"
        );
    }

    pub fn set_mode(&mut self, mode: TransitionMode) {
        if self.config.mode != mode {
            self.config.mode = mode;
            self.transition = Transition::settled(self.state.current_code);
        }
    }

    /// Multiplier applied to every weight the scheduler writes.
    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = if intensity.is_finite() {
            intensity.max(0.0)
        } else {
            1.0
        };
    }

    /// Rescales the loaded sequence while keeping the playhead at the same
    /// relative position.
    pub fn set_time_scale(&mut self, time_scale: f32) {
        let time_scale = sanitize_scale(time_scale);
        let ratio = time_scale / self.time_scale;
        self.time_scale = time_scale;
        self.rebuild_events();
        self.state.playhead *= ratio;
        self.state.event_index = self.index_at(self.state.playhead);
    }

    /// Starts when idle, resumes when paused. Playback starts from the top
    /// unless a seek moved the playhead while idle.
    pub fn play(&mut self) {
        match self.state.phase {
            PlaybackPhase::Idle => {
                if self.events.is_empty() {
                    return;
                }
                self.state.phase = PlaybackPhase::Playing;
            }
            PlaybackPhase::Paused => self.state.phase = PlaybackPhase::Playing,
            PlaybackPhase::Playing => {}
        }
    }

    pub fn resume(&mut self) {
        if self.state.phase == PlaybackPhase::Paused {
            self.play();
        }
    }

    pub fn pause(&mut self) {
        if self.state.phase == PlaybackPhase::Playing {
            self.state.phase = PlaybackPhase::Paused;
        }
    }

    /// Returns to `Idle` and clears the face within the same call.
    pub fn stop(&mut self, engine: &VisemeEngine, face: &mut FaceAsset) {
        self.state = PlaybackState::default();
        self.transition = Transition::default();
        engine.reset(face);
    }

    /// Moves the playhead without replaying the frames in between. While
    /// idle this sets where the next `play` starts.
    pub fn seek_to(&mut self, time: f32) {
        let time = finite_or_zero(time).max(0.0);
        self.state.playhead = time;
        self.state.event_index = self.index_at(time);

        let code = self.scheduled_code(self.state.event_index, time);
        self.transition = Transition::settled(code);
        self.state.current_code = code;
        self.state.target_code = code;
        self.state.transition_progress = 1.0;
    }

    /// Advances playback by `dt` seconds and writes the frame to `face`.
    /// Does nothing unless `Playing`.
    pub fn update(&mut self, dt: f32, engine: &VisemeEngine, face: &mut FaceAsset) -> PlaybackPhase {
        if self.state.phase != PlaybackPhase::Playing || self.events.is_empty() {
            return self.state.phase;
        }

        let dt = finite_or_zero(dt).max(0.0);
        self.state.playhead += dt;
        let playhead = self.state.playhead;

        let mut index = self.state.event_index;
        while index + 1 < self.events.len() && playhead >= self.events[index + 1].start {
            index += 1;
        }
        self.state.event_index = index;

        match self.config.mode {
            TransitionMode::Windowed => self.apply_windowed(engine, face),
            TransitionMode::Smooth => self.apply_smooth(dt, engine, face),
            TransitionMode::Ramp => self.apply_ramp(engine, face),
        }

        if playhead >= self.duration() {
            tracing::debug!(playhead, "viseme sequence finished");
            self.stop(engine, face);
        }

        self.state.phase
    }

    fn apply_windowed(&mut self, engine: &VisemeEngine, face: &mut FaceAsset) {
        let playhead = self.state.playhead;
        let index = self.state.event_index;
        let current = self.events[index];

        let current_weight = if current.contains(playhead) {
            let span = (current.end - current.start).max(1e-6);
            ease_in_out_quad((playhead - current.start) / span)
        } else {
            0.0
        };

        let previous = index
            .checked_sub(1)
            .map(|previous| self.events[previous]);
        let previous_weight = previous
            .map(|previous| {
                let gap = (current.start - previous.start).max(1e-3);
                let elapsed = ((playhead - current.start) / gap).clamp(0.0, 1.0);
                self.config.coarticulation * (1.0 - ease_in_out_quad(elapsed))
            })
            .unwrap_or(0.0);

        engine.reset(face);
        if let Some(previous) = previous {
            if previous_weight > 0.0 {
                engine.layer(face, previous.code, previous_weight * self.intensity);
            }
        }
        engine.layer(face, current.code, current_weight * self.intensity);

        self.state.current_code = current.code;
        self.state.target_code = current.code;
        self.state.transition_progress = current_weight;
    }

    fn apply_smooth(&mut self, dt: f32, engine: &VisemeEngine, face: &mut FaceAsset) {
        let code = self.scheduled_code(self.state.event_index, self.state.playhead);
        self.transition.retarget(code);
        let eased = self.transition.advance(dt, self.config.blend_duration);

        engine.blend_viseme(
            face,
            self.transition.current,
            self.transition.target,
            eased,
            self.intensity,
        );

        self.state.current_code = self.transition.current;
        self.state.target_code = self.transition.target;
        self.state.transition_progress = self.transition.progress;
    }

    fn apply_ramp(&mut self, engine: &VisemeEngine, face: &mut FaceAsset) {
        let playhead = self.state.playhead;
        let active = self
            .events
            .iter()
            .rev()
            .find(|event| event.ramp().covers(playhead))
            .copied();

        let (code, level) = match active {
            Some(event) => {
                let peak = match event.code {
                    VisemeCode::PP | VisemeCode::FF => self.config.ramp_closure_peak,
                    _ => self.config.ramp_peak,
                };
                (event.code, event.ramp().level(playhead) * peak)
            }
            None => (VisemeCode::Sil, 0.0),
        };

        engine.apply_viseme(face, code, level * self.intensity);

        self.state.current_code = code;
        self.state.target_code = code;
        self.state.transition_progress = level;
    }

    /// Code whose window covers `time`, silence in gaps.
    fn scheduled_code(&self, index: usize, time: f32) -> VisemeCode {
        self.events
            .get(index)
            .filter(|event| event.contains(time))
            .map(|event| event.code)
            .unwrap_or(VisemeCode::Sil)
    }

    /// Last event starting at or before `time`. Sequences are short, so a
    /// linear scan is enough.
    fn index_at(&self, time: f32) -> usize {
        self.events
            .iter()
            .rposition(|event| event.start <= time)
            .unwrap_or(0)
    }

    fn rebuild_events(&mut self) {
        let scale = self.time_scale;
        self.events = self
            .source
            .events()
            .iter()
            .map(|event| {
                let start = event.start * scale;
                ScheduledEvent {
                    code: event.code,
                    start,
                    end: start + event.duration * scale,
                }
            })
            .collect();

        let tail_start = self
            .events
            .iter()
            .map(|event| event.end)
            .fold(0.0, f32::max);
        self.events.push(ScheduledEvent {
            code: VisemeCode::Sil,
            start: tail_start,
            end: tail_start + self.config.tail_silence.max(0.0),
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn sanitize_scale(time_scale: f32) -> f32 {
    if time_scale.is_finite() && time_scale > 0.0 {
        time_scale
    } else {
        1.0
    }
}
