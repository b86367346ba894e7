use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use lipsync_rig_core::{
    parse_external_timing, pick_face_asset, AliasTable, AudioSnapshot, ChannelSet, Driver,
    Emotion, FaceAsset, JawAxis, JawJoint, LipSyncRig, ProfileTable, RigConfig, RigError,
    SpeakOptions, SpectrumAnalyzer, ThresholdPreset, TransitionMode, VisemeEngine,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Channel set used when no `--channels` file is given: a CC-style viseme
/// rig with ARKit-style mouth shapes.
const DEFAULT_CHANNELS: &[&str] = &[
    "V_None",
    "V_Open",
    "V_Wide",
    "V_Tight_O",
    "V_Tight",
    "V_Explosive",
    "V_Dental_Lip",
    "V_Affricate",
    "V_Tongue_Out",
    "V_Tongue_Raise",
    "jawOpen",
    "mouthClose",
    "mouthFunnel",
    "mouthPucker",
    "eyeBlinkLeft",
    "eyeBlinkRight",
];

fn main() -> lipsync_rig_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            timing,
            face,
            fps,
            speed,
            emotion,
            smooth,
            ramp,
            idle,
        } => {
            let mode = if ramp {
                TransitionMode::Ramp
            } else if smooth {
                TransitionMode::Smooth
            } else {
                config.scheduler.mode
            };
            let options = PlayOptions {
                fps,
                speed,
                emotion: emotion.as_deref(),
                mode,
                idle: idle || config.idle.enabled,
            };
            run_play(&config, &timing, &face, &options)
        }
        Commands::Analyze {
            input,
            sample_rate,
            face,
            refined,
        } => run_analyze(&config, &input, sample_rate, &face, refined),
        Commands::Inspect { channels } => run_inspect(&config, &channels),
    }
}

struct PlayOptions<'a> {
    fps: f32,
    speed: f32,
    emotion: Option<&'a str>,
    mode: TransitionMode,
    idle: bool,
}

fn run_play(
    config: &RigConfig,
    timing: &Path,
    face: &FaceArgs,
    options: &PlayOptions<'_>,
) -> lipsync_rig_core::Result<()> {
    let input = std::fs::read_to_string(timing)?;
    let emotion = options.emotion.map(str::parse::<Emotion>).transpose()?;
    let fps = options.fps;
    if !(fps.is_finite() && fps > 0.0) {
        return Err(RigError::InvalidInput("fps must be positive"));
    }

    let mut rig = LipSyncRig::new(config, face.load()?);
    rig.set_transition_mode(options.mode);
    rig.set_idle_enabled(options.idle);
    rig.set_speed(options.speed);
    if let Some(emotion) = emotion {
        rig.set_emotion(emotion);
    }

    let sequence = parse_external_timing(&input);
    let summary = rig.speak(&sequence, SpeakOptions::default());
    tracing::info!(
        ?timing,
        visemes = summary.viseme_count,
        duration = summary.duration,
        "playing timing file"
    );

    let dt = 1.0 / fps;
    let max_frames = (summary.duration * fps).ceil() as usize + 2;
    for frame in 0..max_frames {
        rig.tick(dt, None);
        let status = rig.status();
        let weights: serde_json::Map<String, serde_json::Value> = rig
            .face()
            .channels
            .active()
            .map(|(name, weight)| (name.to_string(), json!(weight)))
            .collect();
        println!(
            "{}",
            json!({
                "frame": frame,
                "time": (frame + 1) as f32 * dt,
                "phase": status.phase,
                "code": status.playback.current_code,
                "jaw_rotation": rig.face().jaw_rotation(),
                "weights": weights,
            })
        );

        if rig.driver() != Driver::Sequence {
            break;
        }
    }

    Ok(())
}

fn run_analyze(
    config: &RigConfig,
    input: &Path,
    sample_rate: u32,
    face: &FaceArgs,
    refined: bool,
) -> lipsync_rig_core::Result<()> {
    let bytes = std::fs::read(input)?;
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let block_size = config.classifier.fft_size.max(2);
    let sample_rate = sample_rate.max(1) as f32;
    let dt = block_size as f32 / sample_rate;
    tracing::info!(
        ?input,
        samples = samples.len(),
        block_size,
        sample_rate,
        "classifying pcm"
    );

    let mut rig = LipSyncRig::new(config, face.load()?);
    if refined {
        rig.set_threshold_preset(ThresholdPreset::Refined);
    }
    rig.start_audio();
    let mut analyzer = SpectrumAnalyzer::new();
    let mut block = vec![0.0_f32; block_size];

    for (index, chunk) in samples.chunks(block_size).enumerate() {
        block.fill(0.0);
        block[..chunk.len()].copy_from_slice(chunk);

        let magnitudes = analyzer.process(&block)?;
        let snapshot = AudioSnapshot {
            time_domain: &block,
            magnitudes,
            sample_rate,
        };
        rig.tick(dt, Some(&snapshot));

        let audio = rig.status().audio;
        println!(
            "{}",
            json!({
                "time": index as f32 * dt,
                "code": audio.code,
                "intensity": audio.intensity,
            })
        );
    }

    Ok(())
}

fn run_inspect(config: &RigConfig, channels: &[PathBuf]) -> lipsync_rig_core::Result<()> {
    if channels.is_empty() {
        return Err(RigError::InvalidInput("inspect needs at least one channel list"));
    }

    let faces = channels
        .iter()
        .map(|path| load_face(path))
        .collect::<lipsync_rig_core::Result<Vec<_>>>()?;

    let aliases = AliasTable::standard().with_aliases(&config.aliases);
    let profiles = ProfileTable::standard();
    let picked = pick_face_asset(&faces, &profiles, &aliases);

    let engine = VisemeEngine::new(Arc::new(aliases), Arc::new(profiles), config.engine.clone());
    let reports: Vec<_> = faces.iter().map(|face| engine.analyze(face)).collect();

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "picked": picked.map(|index| faces[index].name.clone()),
            "reports": reports,
        }))?
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> lipsync_rig_core::Result<RigConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading config");
            RigConfig::from_json_str(&std::fs::read_to_string(path)?)
        }
        None => Ok(RigConfig::default()),
    }
}

/// Reads a name list: a JSON array, or one name per line with `#` comments.
fn read_names(path: &Path) -> lipsync_rig_core::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn load_face(path: &Path) -> lipsync_rig_core::Result<FaceAsset> {
    let names = read_names(path)?;
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "face".to_string());
    Ok(FaceAsset::new(name, ChannelSet::new(names)))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless driver for facial lip-sync rigs", long_about = None)]
struct Cli {
    /// JSON config file; missing fields keep their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct FaceArgs {
    /// Channel list describing the face (JSON array or one name per line).
    #[arg(long)]
    channels: Option<PathBuf>,
    /// Name of a jaw joint to drive when the face has no jaw channel.
    #[arg(long)]
    jaw_joint: Option<String>,
    /// Skeleton bone list to search for a known jaw joint.
    #[arg(long, conflicts_with = "jaw_joint")]
    bones: Option<PathBuf>,
}

impl FaceArgs {
    fn load(&self) -> lipsync_rig_core::Result<FaceAsset> {
        let face = match &self.channels {
            Some(path) => load_face(path)?,
            None => FaceAsset::new("default", ChannelSet::new(DEFAULT_CHANNELS.iter().copied())),
        };
        let joint = match (&self.jaw_joint, &self.bones) {
            (Some(name), _) => Some(JawJoint::new(name.as_str(), JawAxis::X)),
            (None, Some(path)) => {
                let bones = read_names(path)?;
                let joint = JawJoint::find(bones.iter().map(String::as_str));
                if joint.is_none() {
                    tracing::warn!(?path, "no known jaw joint in bone list");
                }
                joint
            }
            (None, None) => None,
        };
        Ok(match joint {
            Some(joint) => face.with_jaw(joint),
            None => face,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play an external timing file and print per-frame channel weights.
    Play {
        /// Timing file (JSON mouth cues or delimited text).
        timing: PathBuf,
        #[command(flatten)]
        face: FaceArgs,
        /// Frames per second of the simulated animation loop.
        #[arg(long, default_value_t = 60.0)]
        fps: f32,
        /// Speaking speed multiplier.
        #[arg(long, default_value_t = 1.0)]
        speed: f32,
        /// Emotion preset (neutral, happy, sad, angry, surprised, whisper, excited).
        #[arg(long)]
        emotion: Option<String>,
        /// Cross-fade between visemes at a fixed rate.
        #[arg(long)]
        smooth: bool,
        /// Attack/release envelope per viseme.
        #[arg(long, conflicts_with = "smooth")]
        ramp: bool,
        /// Layer idle micro-expressions under the speech.
        #[arg(long)]
        idle: bool,
    },
    /// Classify raw little-endian f32 mono PCM and print the code per block.
    Analyze {
        /// Path to the PCM file.
        input: PathBuf,
        /// Sample rate of the PCM data.
        #[arg(long, default_value_t = 48_000)]
        sample_rate: u32,
        #[command(flatten)]
        face: FaceArgs,
        /// Use the refined vowel thresholds.
        #[arg(long)]
        refined: bool,
    },
    /// Report which visemes each channel list supports and pick the face.
    Inspect {
        /// One or more channel list files.
        #[arg(required = true)]
        channels: Vec<PathBuf>,
    },
}
