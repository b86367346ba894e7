//! Idle micro-expressions: small random brow, squint and mouth movements
//! over a breathing jaw.
//!
//! [`IdleLayer`] redraws its targets every few seconds and eases towards
//! them. Brows and squints are written every tick; mouth and jaw only when
//! the caller says no lip-sync driver owns them.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::{
    assets::FaceAsset,
    channels::{clamp_unit, ChannelResolver},
    config::IdleConfig,
    mapping::JAW_CHANNEL,
};

/// Jaw joint opening at the configured jaw maximum.
const JOINT_OPEN_DEGREES: f32 = 12.0;
/// Jaw weight above which `mouthClose` is eased off.
const CLOSE_RELIEF_THRESHOLD: f32 = 0.05;

const LEFT: usize = 0;
const RIGHT: usize = 1;

const BROW_DOWN: [&str; 2] = ["browDownLeft", "browDownRight"];
const BROW_OUTER_UP: [&str; 2] = ["browOuterUpLeft", "browOuterUpRight"];
const SQUINT: [&str; 2] = ["eyeSquintLeft", "eyeSquintRight"];
const SMILE: [&str; 2] = ["mouthSmileLeft", "mouthSmileRight"];
const PRESS: [&str; 2] = ["mouthPressLeft", "mouthPressRight"];

/// Weights of the idle layer. Pairs are `[left, right]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IdlePose {
    pub brow_inner_up: f32,
    pub brow_down: [f32; 2],
    pub squint: [f32; 2],
    pub smile: [f32; 2],
    pub press: [f32; 2],
    pub jaw: f32,
}

impl IdlePose {
    fn approach(&mut self, target: &IdlePose, jaw_target: f32, amount: f32) {
        let step = |current: &mut f32, target: f32| *current += (target - *current) * amount;

        step(&mut self.brow_inner_up, target.brow_inner_up);
        for side in [LEFT, RIGHT] {
            step(&mut self.brow_down[side], target.brow_down[side]);
            step(&mut self.squint[side], target.squint[side]);
            step(&mut self.smile[side], target.smile[side]);
            step(&mut self.press[side], target.press[side]);
        }
        step(&mut self.jaw, jaw_target);
    }
}

#[derive(Debug, Clone)]
pub struct IdleLayer {
    config: IdleConfig,
    rng: StdRng,
    time: f32,
    next_change: f32,
    target: IdlePose,
    pose: IdlePose,
}

impl IdleLayer {
    pub fn new(config: IdleConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut layer = Self {
            config,
            rng,
            time: 0.0,
            next_change: 0.0,
            target: IdlePose::default(),
            pose: IdlePose::default(),
        };
        layer.retarget();
        layer
    }

    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    /// Smoothed weights written on the last update.
    pub fn pose(&self) -> &IdlePose {
        &self.pose
    }

    pub fn target(&self) -> &IdlePose {
        &self.target
    }

    /// Drops the mouth and jaw back to rest so they ease in again.
    pub fn settle_mouth(&mut self) {
        self.pose.smile = [0.0; 2];
        self.pose.press = [0.0; 2];
        self.pose.jaw = 0.0;
    }

    /// Advances by `dt` seconds and writes the pose. Mouth, jaw and
    /// `mouthClose` are only written when `mouth` is set.
    pub fn update(
        &mut self,
        dt: f32,
        face: &mut FaceAsset,
        resolver: &ChannelResolver,
        mouth: bool,
    ) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.time += dt;
        self.next_change -= dt;
        if self.next_change <= 0.0 {
            self.retarget();
        }

        let jaw_max = self.config.jaw_open_max.max(0.0);
        let breath = (self.time.sin() + 1.0) / 2.0 * 0.25 * jaw_max;
        let jaw_target = clamp_unit(self.target.jaw * 0.8 + breath);
        let amount = 1.0 - (-self.config.smoothing.max(0.0) * dt).exp();
        self.pose.approach(&self.target, jaw_target, amount);

        self.write(face, resolver, mouth);
    }

    fn write(&self, face: &mut FaceAsset, resolver: &ChannelResolver, mouth: bool) {
        let pose = &self.pose;
        let channels = &mut face.channels;

        resolver.set_channel(channels, "browInnerUp", pose.brow_inner_up);
        for side in [LEFT, RIGHT] {
            resolver.set_channel(channels, BROW_DOWN[side], pose.brow_down[side]);
            resolver.set_channel(channels, BROW_OUTER_UP[side], pose.brow_inner_up * 0.6);
            resolver.set_channel(channels, SQUINT[side], pose.squint[side]);
        }

        if !mouth {
            return;
        }

        for side in [LEFT, RIGHT] {
            resolver.set_channel(channels, SMILE[side], pose.smile[side]);
            resolver.set_channel(channels, PRESS[side], pose.press[side]);
        }

        if !resolver.set_channel(channels, JAW_CHANNEL, pose.jaw) {
            if let Some(joint) = face.jaw.as_mut() {
                let open = pose.jaw / self.config.jaw_open_max.max(1e-3);
                joint.set_rotation(JOINT_OPEN_DEGREES.to_radians() * open);
            }
        }
        if pose.jaw > CLOSE_RELIEF_THRESHOLD {
            resolver.set_channel(&mut face.channels, "mouthClose", 0.2 - pose.jaw);
        }
    }

    fn retarget(&mut self) {
        let Self {
            config,
            rng,
            target,
            next_change,
            ..
        } = self;

        target.brow_inner_up = rng.gen::<f32>() * config.brow_up_max;

        let down = rng.gen::<f32>() * config.brow_down_max;
        for side in &mut target.brow_down {
            *side = down * (0.4 + 0.6 * rng.gen::<f32>());
        }

        let squint = rng.gen::<f32>() * config.squint_max;
        for side in &mut target.squint {
            *side = squint * (0.5 + 0.5 * rng.gen::<f32>());
        }

        for side in &mut target.smile {
            *side = rng.gen::<f32>() * config.smile_max * 0.9;
        }
        if target.smile[LEFT] + target.smile[RIGHT] > config.smile_max {
            let larger = if target.smile[LEFT] > target.smile[RIGHT] {
                LEFT
            } else {
                RIGHT
            };
            target.smile[larger] *= 0.5;
        }

        for side in &mut target.press {
            *side = rng.gen::<f32>() * config.press_max * 0.6;
        }
        target.jaw = rng.gen::<f32>() * config.jaw_open_max;

        let low = config.min_interval.min(config.max_interval).max(0.0);
        let high = config.min_interval.max(config.max_interval).max(low);
        *next_change = low + rng.gen::<f32>() * (high - low);

        tracing::trace!(next_change = *next_change, "idle targets redrawn");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{JawAxis, JawJoint},
        channels::ChannelSet,
    };

    const FACE: &[&str] = &[
        "browInnerUp",
        "browDownLeft",
        "browDownRight",
        "eyeSquintLeft",
        "mouthSmileLeft",
        "mouthPressLeft",
        "jawOpen",
        "mouthClose",
    ];

    fn layer(seed: u64) -> IdleLayer {
        IdleLayer::new(IdleConfig {
            enabled: true,
            seed: Some(seed),
            ..IdleConfig::default()
        })
    }

    fn face(names: &[&str]) -> FaceAsset {
        FaceAsset::new("face", ChannelSet::new(names.iter().copied()))
    }

    fn weight(face: &FaceAsset, name: &str) -> f32 {
        face.channels.weight_of(name).unwrap()
    }

    #[test]
    fn targets_stay_within_their_maxima() {
        let mut layer = layer(11);
        let config = layer.config().clone();

        for _ in 0..500 {
            layer.retarget();
            let target = *layer.target();

            assert!((0.0..=config.brow_up_max).contains(&target.brow_inner_up));
            for side in [LEFT, RIGHT] {
                assert!((0.0..=config.brow_down_max).contains(&target.brow_down[side]));
                assert!((0.0..=config.squint_max).contains(&target.squint[side]));
                assert!((0.0..=config.smile_max * 0.9).contains(&target.smile[side]));
                assert!((0.0..=config.press_max * 0.6).contains(&target.press[side]));
            }
            assert!((0.0..=config.jaw_open_max).contains(&target.jaw));
            assert!((config.min_interval..=config.max_interval).contains(&layer.next_change));
        }
    }

    #[test]
    fn same_seed_moves_the_same_way() {
        let mut first = layer(5);
        let mut second = layer(5);
        let mut a = face(FACE);
        let mut b = face(FACE);
        let resolver = ChannelResolver::standard();

        for _ in 0..120 {
            first.update(0.05, &mut a, &resolver, true);
            second.update(0.05, &mut b, &resolver, true);
        }

        assert_eq!(first.pose(), second.pose());
        assert_eq!(a.channels.weights(), b.channels.weights());
    }

    #[test]
    fn eases_towards_the_targets() {
        let mut layer = layer(3);
        let mut face = face(FACE);
        let resolver = ChannelResolver::standard();
        let target = *layer.target();

        layer.update(0.1, &mut face, &resolver, true);

        let amount = 1.0 - (-0.3_f32).exp();
        assert!((weight(&face, "browInnerUp") - target.brow_inner_up * amount).abs() < 1e-6);
        assert!((weight(&face, "mouthSmileLeft") - target.smile[LEFT] * amount).abs() < 1e-6);
        assert!(weight(&face, "jawOpen") > 0.0);
        assert!(weight(&face, "jawOpen") < 0.18);
    }

    #[test]
    fn leaves_the_mouth_to_an_active_driver() {
        let mut layer = layer(3);
        let mut face = face(FACE);
        let resolver = ChannelResolver::standard();

        layer.update(0.5, &mut face, &resolver, false);

        assert!(weight(&face, "browInnerUp") > 0.0);
        for name in ["mouthSmileLeft", "mouthPressLeft", "jawOpen", "mouthClose"] {
            assert_eq!(weight(&face, name), 0.0);
        }
    }

    #[test]
    fn breathes_through_the_jaw_joint_without_a_jaw_channel() {
        let mut layer = layer(8);
        let mut face = face(&["browInnerUp"]).with_jaw(JawJoint::new("Jaw", JawAxis::X));
        let resolver = ChannelResolver::standard();

        layer.update(0.5, &mut face, &resolver, true);

        let expected = 12.0_f32.to_radians() * layer.pose().jaw / 0.18;
        assert!(face.jaw_rotation() > 0.0);
        assert!((face.jaw_rotation() - expected).abs() < 1e-6);
    }

    #[test]
    fn redraws_targets_on_schedule() {
        let mut layer = layer(21);
        let mut face = face(FACE);
        let resolver = ChannelResolver::standard();
        let before = *layer.target();

        for _ in 0..70 {
            layer.update(0.05, &mut face, &resolver, true);
        }

        assert_ne!(*layer.target(), before);
    }

    #[test]
    fn settling_restarts_only_the_mouth() {
        let mut layer = layer(4);
        let mut face = face(FACE);
        let resolver = ChannelResolver::standard();
        layer.update(0.5, &mut face, &resolver, true);
        let brow = layer.pose().brow_inner_up;

        layer.settle_mouth();

        assert_eq!(layer.pose().smile, [0.0; 2]);
        assert_eq!(layer.pose().jaw, 0.0);
        assert_eq!(layer.pose().brow_inner_up, brow);
    }
}
