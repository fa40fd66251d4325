//! Blend task: the only owner of [`ParameterBlender`] state.
//!
//! Other tasks talk to it through a [`BlendHandle`]: target writes are
//! non-blocking enqueues drained at the start of every tick, and readers get
//! the last fully published [`BlendFrame`] through a watch channel.

use super::blender::{
    canonical_id, BlendError, ParameterBlender, ParameterVector, SmoothingScope, PARAM_MOUTH_OPEN_Y,
};
use crate::utils::shutdown::ShutdownSignal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    pub rate_hz: u32,
    pub default_smoothing: f32,
    /// Per-parameter smoothing overrides.
    pub smoothing: HashMap<String, f32>,
    /// Relay every tick to observers as a `parameters` broadcast.
    pub broadcast_frames: bool,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            rate_hz: 60,
            default_smoothing: 0.15,
            smoothing: HashMap::from([(PARAM_MOUTH_OPEN_Y.to_string(), 0.3)]),
            broadcast_frames: false,
        }
    }
}

impl BlendConfig {
    /// Blender with the standard channels and every configured override applied.
    pub fn build_blender(&self) -> Result<ParameterBlender, BlendError> {
        let mut blender = ParameterBlender::with_standard_channels(self.default_smoothing)?;
        for (id, factor) in &self.smoothing {
            blender.set_smoothing_factor(SmoothingScope::Parameter(id.clone()), *factor)?;
        }
        Ok(blender)
    }
}

/// Immutable result of one blend tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlendFrame {
    pub tick: u64,
    pub params: ParameterVector,
}

/// Consumer of every published frame. Implementations must not block.
pub trait FrameOutput: Send + Sync {
    fn publish(&self, frame: &Arc<BlendFrame>);
}

enum BlendCommand {
    SetTarget(String, f32),
    SetTargets(Vec<(String, f32)>),
    SetSmoothing {
        scope: SmoothingScope,
        factor: f32,
        reply: oneshot::Sender<Result<(), BlendError>>,
    },
}

#[derive(Clone)]
pub struct BlendHandle {
    commands: mpsc::UnboundedSender<BlendCommand>,
    frames: watch::Receiver<Arc<BlendFrame>>,
}

impl BlendHandle {
    /// Enqueue a target write. Returns `false` once the blend task has stopped.
    pub fn set_target(&self, id: impl Into<String>, value: f32) -> bool {
        self.commands
            .send(BlendCommand::SetTarget(id.into(), value))
            .is_ok()
    }

    /// Enqueue several writes that land in the same tick.
    pub fn set_targets<I, S>(&self, targets: I) -> bool
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let batch: Vec<(String, f32)> = targets.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if batch.is_empty() {
            return true;
        }
        self.commands.send(BlendCommand::SetTargets(batch)).is_ok()
    }

    pub async fn set_smoothing_factor(
        &self,
        scope: SmoothingScope,
        factor: f32,
    ) -> Result<(), BlendError> {
        let (reply, rx) = oneshot::channel();
        let stopped = || BlendError::InvalidConfig {
            scope: scope.to_string(),
            factor,
        };
        self.commands
            .send(BlendCommand::SetSmoothing {
                scope: scope.clone(),
                factor,
                reply,
            })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Last fully published frame.
    pub fn snapshot(&self) -> Arc<BlendFrame> {
        self.frames.borrow().clone()
    }

    pub fn value(&self, id: &str) -> Option<f32> {
        self.frames.borrow().params.get(canonical_id(id)).copied()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<BlendFrame>> {
        self.frames.clone()
    }
}

fn apply(blender: &mut ParameterBlender, command: BlendCommand) {
    match command {
        BlendCommand::SetTarget(id, value) => blender.set_target(&id, value),
        BlendCommand::SetTargets(batch) => {
            for (id, value) in batch {
                blender.set_target(&id, value);
            }
        }
        BlendCommand::SetSmoothing {
            scope,
            factor,
            reply,
        } => {
            let _ = reply.send(blender.set_smoothing_factor(scope, factor));
        }
    }
}

/// Spawn the blend task. Ticks at `rate_hz` until `shutdown` fires.
pub fn spawn_blend_loop(
    blender: ParameterBlender,
    rate_hz: u32,
    outputs: Vec<Arc<dyn FrameOutput>>,
    mut shutdown: ShutdownSignal,
) -> (BlendHandle, tokio::task::JoinHandle<()>) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let initial = Arc::new(BlendFrame {
        tick: 0,
        params: blender.current(),
    });
    let (frame_tx, frame_rx) = watch::channel(initial);
    let handle = BlendHandle {
        commands: cmd_tx,
        frames: frame_rx,
    };

    let period = Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64);
    let task = tokio::spawn(async move {
        let mut blender = blender;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;
        tracing::info!(rate_hz, channels = blender.len(), "blend loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.wait() => break,
            }

            while let Ok(command) = cmd_rx.try_recv() {
                apply(&mut blender, command);
            }

            tick += 1;
            let frame = Arc::new(BlendFrame {
                tick,
                params: blender.tick(),
            });
            frame_tx.send_replace(frame.clone());
            for output in &outputs {
                output.publish(&frame);
            }
        }
        tracing::info!(ticks = tick, "blend loop stopped");
    });

    (handle, task)
}
