//! Pointer Follow: turns the desktop pointer position into head/eye targets.

use super::blender::{PARAM_ANGLE_X, PARAM_ANGLE_Y, PARAM_EYE_BALL_X, PARAM_EYE_BALL_Y};
use super::runtime::BlendHandle;
use crate::utils::shutdown::ShutdownSignal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Maximum head rotation in degrees at full deflection.
pub const HEAD_RANGE_DEGREES: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointerError {
    #[error("pointer source unavailable: {0}")]
    Unavailable(String),
    #[error("no pointer position reported yet")]
    NoSample,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    pub enabled: bool,
    pub rate_hz: u32,
    pub dead_zone: f32,
    pub head_sensitivity: f32,
    pub eye_sensitivity: f32,
    /// How long a `look_at` command suspends pointer following.
    pub look_at_hold_ms: u64,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_hz: 15,
            dead_zone: 0.10,
            head_sensitivity: 0.5,
            eye_sensitivity: 1.0,
            look_at_hold_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenBounds {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub bounds: ScreenBounds,
}

/// Head and eye targets derived from one pointer sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GazeTargets {
    pub angle_x: f32,
    pub angle_y: f32,
    pub eye_x: f32,
    pub eye_y: f32,
}

impl GazeTargets {
    pub fn as_pairs(&self) -> [(&'static str, f32); 4] {
        [
            (PARAM_ANGLE_X, self.angle_x),
            (PARAM_ANGLE_Y, self.angle_y),
            (PARAM_EYE_BALL_X, self.eye_x),
            (PARAM_EYE_BALL_Y, self.eye_y),
        ]
    }
}

/// Suppress `|v| < dead_zone` to 0 and rescale the rest so ±1 stays reachable.
pub fn apply_dead_zone(value: f32, dead_zone: f32) -> f32 {
    let magnitude = value.abs();
    if magnitude < dead_zone {
        return 0.0;
    }
    value.signum() * (magnitude - dead_zone) / (1.0 - dead_zone)
}

/// Map a screen position to [-1, 1] on both axes. Screen y grows downward,
/// so the vertical axis is inverted to make "up" positive.
pub fn normalize(sample: &PointerSample) -> Option<(f32, f32)> {
    let ScreenBounds { width, height } = sample.bounds;
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    let nx = (sample.x / width) * 2.0 - 1.0;
    let ny = -((sample.y / height) * 2.0 - 1.0);
    Some((nx.clamp(-1.0, 1.0) as f32, ny.clamp(-1.0, 1.0) as f32))
}

#[derive(Debug, Clone)]
pub struct PointerFollowEngine {
    config: PointerConfig,
}

impl PointerFollowEngine {
    pub fn new(config: PointerConfig) -> Self {
        let mut config = config;
        // A dead zone of 1.0 would divide by zero in the rescale.
        config.dead_zone = config.dead_zone.clamp(0.0, 0.99);
        Self { config }
    }

    pub fn config(&self) -> &PointerConfig {
        &self.config
    }

    /// Targets for an already-normalized gaze direction, no dead zone applied.
    pub fn targets_for(&self, nx: f32, ny: f32) -> GazeTargets {
        let head = HEAD_RANGE_DEGREES * self.config.head_sensitivity;
        let eye = self.config.eye_sensitivity;
        GazeTargets {
            angle_x: nx * head,
            angle_y: ny * head,
            eye_x: (nx * eye).clamp(-1.0, 1.0),
            eye_y: (ny * eye).clamp(-1.0, 1.0),
        }
    }

    pub fn targets(&self, sample: &PointerSample) -> Option<GazeTargets> {
        let (nx, ny) = normalize(sample)?;
        let dz = self.config.dead_zone;
        Some(self.targets_for(apply_dead_zone(nx, dz), apply_dead_zone(ny, dz)))
    }
}

/// Where pointer positions come from. The windowing shell owns the real one.
pub trait PointerSource: Send + Sync {
    fn sample(&self) -> Result<PointerSample, PointerError>;
}

/// Pointer source fed by the host shell (or tests) through [`ManualPointer::update`].
#[derive(Clone, Default)]
pub struct ManualPointer {
    latest: Arc<Mutex<Option<PointerSample>>>,
}

impl ManualPointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, sample: PointerSample) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(sample);
        }
    }
}

impl PointerSource for ManualPointer {
    fn sample(&self) -> Result<PointerSample, PointerError> {
        self.latest
            .lock()
            .map_err(|_| PointerError::Unavailable("pointer state poisoned".into()))?
            .ok_or(PointerError::NoSample)
    }
}

/// Source used when no display is attached; the follow task disables itself.
pub struct NoPointer;

impl PointerSource for NoPointer {
    fn sample(&self) -> Result<PointerSample, PointerError> {
        Err(PointerError::Unavailable("no display attached".into()))
    }
}

/// Suspends pointer following for a while after an explicit `look_at`.
#[derive(Clone, Default)]
pub struct GazeHold {
    until: Arc<Mutex<Option<Instant>>>,
}

impl GazeHold {
    pub fn hold_for(&self, duration: Duration) {
        if let Ok(mut until) = self.until.lock() {
            *until = Some(Instant::now() + duration);
        }
    }

    pub fn is_held(&self) -> bool {
        self.until
            .lock()
            .map(|until| until.map_or(false, |t| Instant::now() < t))
            .unwrap_or(false)
    }
}

/// Pointer follow loop. Only ever calls `set_targets`; never waits on I/O.
///
/// A source that is unavailable on the first sample disables the loop.
/// Later failures (pointer left every display, shell restarting) just skip
/// the cycle so existing targets stay in place.
pub async fn pointer_follow_loop(
    engine: PointerFollowEngine,
    source: Arc<dyn PointerSource>,
    blend: BlendHandle,
    hold: GazeHold,
    mut shutdown: ShutdownSignal,
) {
    if !engine.config().enabled {
        tracing::info!("pointer follow disabled by config");
        return;
    }
    let period = Duration::from_secs_f64(1.0 / engine.config().rate_hz.max(1) as f64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ever_sampled = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait() => break,
        }
        if hold.is_held() {
            continue;
        }
        match source.sample() {
            Ok(sample) => {
                ever_sampled = true;
                if let Some(targets) = engine.targets(&sample) {
                    if !blend.set_targets(targets.as_pairs()) {
                        break;
                    }
                }
            }
            Err(PointerError::NoSample) => {}
            Err(e) if !ever_sampled => {
                tracing::info!(error = %e, "pointer follow disabled");
                return;
            }
            Err(e) => {
                tracing::trace!(error = %e, "pointer sample skipped");
            }
        }
    }
    tracing::debug!("pointer follow loop stopped");
}
