//! Parameter Blender: smoothed current/target state for every model parameter.
//!
//! Producers (pointer follow, mood, lip sync, protocol writes) only ever
//! overwrite *targets*. Once per render tick every channel moves a fraction
//! of the way toward its target, so competing writers never cause a visible
//! jump: the last `set_target` wins and smoothing absorbs the discontinuity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PARAM_ANGLE_X: &str = "ParamAngleX";
pub const PARAM_ANGLE_Y: &str = "ParamAngleY";
pub const PARAM_EYE_BALL_X: &str = "ParamEyeBallX";
pub const PARAM_EYE_BALL_Y: &str = "ParamEyeBallY";
pub const PARAM_MOUTH_OPEN_Y: &str = "ParamMouthOpenY";

/// Short names accepted for the well-known parameters.
const SHORT_IDS: [(&str, &str); 5] = [
    ("AngleX", PARAM_ANGLE_X),
    ("AngleY", PARAM_ANGLE_Y),
    ("EyeBallX", PARAM_EYE_BALL_X),
    ("EyeBallY", PARAM_EYE_BALL_Y),
    ("MouthOpenY", PARAM_MOUTH_OPEN_Y),
];

/// Native model id for `id`: `AngleX` names the same channel as `ParamAngleX`.
/// Any other id is returned unchanged.
pub fn canonical_id(id: &str) -> &str {
    SHORT_IDS
        .iter()
        .find(|(short, _)| *short == id)
        .map(|(_, native)| *native)
        .unwrap_or(id)
}

/// Snapshot of every tracked parameter's current value.
pub type ParameterVector = HashMap<String, f32>;

/// Differences smaller than this are snapped to the target.
const SETTLE_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BlendError {
    #[error("invalid smoothing factor {factor} for {scope}: must be in (0, 1]")]
    InvalidConfig { scope: String, factor: f32 },
}

/// Which channel(s) a smoothing factor applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SmoothingScope {
    Default,
    Parameter(String),
}

impl std::fmt::Display for SmoothingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmoothingScope::Default => write!(f, "default"),
            SmoothingScope::Parameter(id) => write!(f, "'{}'", id),
        }
    }
}

/// One animated parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingChannel {
    pub current: f32,
    pub target: f32,
    pub factor: f32,
}

impl SmoothingChannel {
    fn new(value: f32, factor: f32) -> Self {
        Self {
            current: value,
            target: value,
            factor,
        }
    }

    fn advance(&mut self) {
        let delta = self.target - self.current;
        if delta.abs() < SETTLE_EPSILON {
            self.current = self.target;
        } else {
            self.current += delta * self.factor;
        }
    }

    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}

fn validate_factor(scope: &SmoothingScope, factor: f32) -> Result<f32, BlendError> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(factor)
    } else {
        Err(BlendError::InvalidConfig {
            scope: scope.to_string(),
            factor,
        })
    }
}

/// Range convention for the parameters this layer produces itself.
/// Everything else is passed through unclamped.
fn clamp_for(id: &str, value: f32) -> f32 {
    match id {
        PARAM_MOUTH_OPEN_Y => value.clamp(0.0, 1.0),
        PARAM_EYE_BALL_X | PARAM_EYE_BALL_Y => value.clamp(-1.0, 1.0),
        _ => value,
    }
}

#[derive(Debug, Clone)]
pub struct ParameterBlender {
    channels: HashMap<String, SmoothingChannel>,
    default_factor: f32,
    overrides: HashMap<String, f32>,
}

impl ParameterBlender {
    pub fn new(default_factor: f32) -> Result<Self, BlendError> {
        let default_factor = validate_factor(&SmoothingScope::Default, default_factor)?;
        Ok(Self {
            channels: HashMap::new(),
            default_factor,
            overrides: HashMap::new(),
        })
    }

    /// Blender pre-populated with the well-known gaze and mouth channels at rest.
    pub fn with_standard_channels(default_factor: f32) -> Result<Self, BlendError> {
        let mut blender = Self::new(default_factor)?;
        for id in [
            PARAM_ANGLE_X,
            PARAM_ANGLE_Y,
            PARAM_EYE_BALL_X,
            PARAM_EYE_BALL_Y,
            PARAM_MOUTH_OPEN_Y,
        ] {
            blender.set_target(id, 0.0);
        }
        Ok(blender)
    }

    fn factor_for(&self, id: &str) -> f32 {
        let id = canonical_id(id);
        self.overrides
            .get(id)
            .copied()
            .unwrap_or(self.default_factor)
    }

    /// Overwrite the target for `id`. An unknown id gets a new channel that
    /// starts at rest on the requested value.
    pub fn set_target(&mut self, id: &str, value: f32) {
        if !value.is_finite() {
            tracing::debug!(param = id, "ignoring non-finite target");
            return;
        }
        let id = canonical_id(id);
        let value = clamp_for(id, value);
        match self.channels.get_mut(id) {
            Some(channel) => channel.target = value,
            None => {
                let factor = self.factor_for(id);
                self.channels
                    .insert(id.to_string(), SmoothingChannel::new(value, factor));
            }
        }
    }

    /// Set the smoothing factor for one parameter or for the default.
    /// Changing the default re-tunes every channel without its own override.
    pub fn set_smoothing_factor(
        &mut self,
        scope: SmoothingScope,
        factor: f32,
    ) -> Result<(), BlendError> {
        let factor = validate_factor(&scope, factor)?;
        match scope {
            SmoothingScope::Default => {
                self.default_factor = factor;
                for (id, channel) in self.channels.iter_mut() {
                    if !self.overrides.contains_key(id) {
                        channel.factor = factor;
                    }
                }
            }
            SmoothingScope::Parameter(id) => {
                let id = canonical_id(&id).to_string();
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.factor = factor;
                }
                self.overrides.insert(id, factor);
            }
        }
        Ok(())
    }

    /// Advance every channel one step and return the resulting vector.
    pub fn tick(&mut self) -> ParameterVector {
        for channel in self.channels.values_mut() {
            channel.advance();
        }
        self.current()
    }

    pub fn current(&self) -> ParameterVector {
        self.channels
            .iter()
            .map(|(id, channel)| (id.clone(), channel.current))
            .collect()
    }

    pub fn current_value(&self, id: &str) -> Option<f32> {
        self.channels.get(canonical_id(id)).map(|c| c.current)
    }

    pub fn target_value(&self, id: &str) -> Option<f32> {
        self.channels.get(canonical_id(id)).map(|c| c.target)
    }

    pub fn channel(&self, id: &str) -> Option<&SmoothingChannel> {
        self.channels.get(canonical_id(id))
    }

    pub fn is_settled(&self) -> bool {
        self.channels.values().all(SmoothingChannel::is_settled)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_ids_drive_the_native_channel() {
        let mut blender = ParameterBlender::with_standard_channels(0.15).unwrap();
        blender.set_target("AngleX", 15.0);
        let frame = blender.tick();
        assert!(!frame.contains_key("AngleX"));
        let moved = frame[PARAM_ANGLE_X];
        assert!(moved > 0.0 && moved < 15.0, "ParamAngleX = {}", moved);
        assert_eq!(blender.target_value("AngleX"), Some(15.0));
        assert_eq!(canonical_id("MouthOpenY"), PARAM_MOUTH_OPEN_Y);
        assert_eq!(canonical_id("ParamCheek"), "ParamCheek");
    }

    #[test]
    fn unknown_parameter_starts_at_rest() {
        let mut blender = ParameterBlender::new(0.15).unwrap();
        blender.set_target("ParamCheek", 0.8);
        let channel = blender.channel("ParamCheek").unwrap();
        assert_eq!(channel.current, 0.8);
        assert_eq!(channel.target, 0.8);
    }

    #[test]
    fn tick_moves_fraction_of_the_gap() {
        let mut blender = ParameterBlender::with_standard_channels(0.5).unwrap();
        blender.set_target(PARAM_ANGLE_X, 10.0);
        let v = blender.tick();
        assert!((v[PARAM_ANGLE_X] - 5.0).abs() < 1e-6);
        let v = blender.tick();
        assert!((v[PARAM_ANGLE_X] - 7.5).abs() < 1e-6);
    }

    #[test]
    fn approaches_target_without_jumping() {
        let mut blender = ParameterBlender::with_standard_channels(0.15).unwrap();
        blender.set_target(PARAM_ANGLE_X, 15.0);
        let mut last = 0.0;
        for _ in 0..20 {
            let v = blender.tick()[PARAM_ANGLE_X];
            assert!(v > last, "must rise monotonically");
            assert!(v < 15.0, "must not overshoot");
            last = v;
        }
    }

    #[test]
    fn converges_then_ticks_are_noops() {
        let mut blender = ParameterBlender::with_standard_channels(0.3).unwrap();
        blender.set_target(PARAM_ANGLE_Y, -12.0);
        for _ in 0..500 {
            blender.tick();
        }
        assert!(blender.is_settled());
        let before = blender.current();
        let after = blender.tick();
        assert_eq!(before, after);
    }

    #[test]
    fn rejects_out_of_range_factors() {
        let mut blender = ParameterBlender::new(0.15).unwrap();
        for bad in [0.0, -0.1, 1.01, f32::NAN] {
            assert!(matches!(
                blender.set_smoothing_factor(SmoothingScope::Default, bad),
                Err(BlendError::InvalidConfig { .. })
            ));
        }
        assert!(ParameterBlender::new(0.0).is_err());
        assert!(blender
            .set_smoothing_factor(SmoothingScope::Parameter("X".into()), 1.0)
            .is_ok());
    }

    #[test]
    fn parameter_override_survives_default_change() {
        let mut blender = ParameterBlender::with_standard_channels(0.15).unwrap();
        blender
            .set_smoothing_factor(
                SmoothingScope::Parameter(PARAM_MOUTH_OPEN_Y.to_string()),
                0.3,
            )
            .unwrap();
        blender
            .set_smoothing_factor(SmoothingScope::Default, 0.5)
            .unwrap();
        assert_eq!(blender.channel(PARAM_MOUTH_OPEN_Y).unwrap().factor, 0.3);
        assert_eq!(blender.channel(PARAM_ANGLE_X).unwrap().factor, 0.5);
    }

    #[test]
    fn override_applies_to_channels_created_later() {
        let mut blender = ParameterBlender::new(0.15).unwrap();
        blender
            .set_smoothing_factor(SmoothingScope::Parameter("ParamBrowLY".into()), 0.9)
            .unwrap();
        blender.set_target("ParamBrowLY", 0.2);
        assert_eq!(blender.channel("ParamBrowLY").unwrap().factor, 0.9);
    }

    #[test]
    fn clamps_mouth_and_eyes_only() {
        let mut blender = ParameterBlender::with_standard_channels(1.0).unwrap();
        blender.set_target(PARAM_MOUTH_OPEN_Y, 1.7);
        blender.set_target(PARAM_EYE_BALL_X, -3.0);
        blender.set_target(PARAM_ANGLE_X, 45.0);
        let v = blender.tick();
        assert_eq!(v[PARAM_MOUTH_OPEN_Y], 1.0);
        assert_eq!(v[PARAM_EYE_BALL_X], -1.0);
        assert_eq!(v[PARAM_ANGLE_X], 45.0);
    }

    #[test]
    fn non_finite_targets_are_ignored() {
        let mut blender = ParameterBlender::with_standard_channels(0.2).unwrap();
        blender.set_target(PARAM_ANGLE_X, f32::INFINITY);
        assert_eq!(blender.target_value(PARAM_ANGLE_X), Some(0.0));
        blender.set_target("ParamNew", f32::NAN);
        assert!(blender.channel("ParamNew").is_none());
    }

    proptest! {
        #[test]
        fn repeated_ticks_converge(target in -30.0f32..30.0, factor in 0.05f32..=1.0) {
            let mut blender = ParameterBlender::with_standard_channels(factor).unwrap();
            blender.set_target(PARAM_ANGLE_X, target);
            for _ in 0..2000 {
                blender.tick();
            }
            let v = blender.current_value(PARAM_ANGLE_X).unwrap();
            prop_assert!((v - target).abs() < 1e-3);
            let again = blender.tick()[PARAM_ANGLE_X];
            prop_assert_eq!(v, again);
        }
    }
}
