//! Sink link: keeps a connection to the render sink alive.
//!
//! Engines never hold the sink directly. They go through [`SinkLink`], which
//! reports `Disconnected` while the supervisor is between connections and
//! replays the latest parameter frame as soon as a new sink attaches.

use super::channel::SinkConnector;
use super::interface::{RenderSink, SinkError, WindowAction};
use crate::animation::{BlendFrame, FrameOutput};
use crate::utils::backoff::Backoff;
use crate::utils::shutdown::ShutdownSignal;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub backoff_initial_ms: u64,
    pub backoff_ceiling_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backoff_initial_ms: 500,
            backoff_ceiling_secs: 30,
        }
    }
}

#[derive(Clone, Default)]
pub struct SinkLink {
    current: Arc<RwLock<Option<Arc<dyn RenderSink>>>>,
    latest_frame: Arc<Mutex<Option<Arc<BlendFrame>>>>,
}

impl SinkLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Result<Arc<dyn RenderSink>, SinkError> {
        self.current
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|sink| sink.is_connected())
            .ok_or(SinkError::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.sink().is_ok()
    }

    fn install(&self, sink: Option<Arc<dyn RenderSink>>) {
        if let Ok(mut current) = self.current.write() {
            *current = sink;
        }
    }

    fn replay_latest(&self, sink: &dyn RenderSink) {
        let latest = self.latest_frame.lock().ok().and_then(|f| f.clone());
        if let Some(frame) = latest {
            let _ = sink.push_parameters(frame);
        }
    }

    pub async fn set_expression(&self, name: &str) -> Result<(), SinkError> {
        self.sink()?.set_expression(name).await
    }

    pub async fn trigger_motion(&self, group: &str, index: u32, priority: u32) -> Result<(), SinkError> {
        self.sink()?.trigger_motion(group, index, priority).await
    }

    pub async fn set_background(&self, kind: &str) -> Result<(), SinkError> {
        self.sink()?.set_background(kind).await
    }

    pub async fn show_message(&self, text: &str, duration_ms: u64) -> Result<(), SinkError> {
        self.sink()?.show_message(text, duration_ms).await
    }

    pub async fn control_window(&self, action: &WindowAction) -> Result<(), SinkError> {
        self.sink()?.control_window(action).await
    }
}

impl FrameOutput for SinkLink {
    fn publish(&self, frame: &Arc<BlendFrame>) {
        if let Ok(mut latest) = self.latest_frame.lock() {
            *latest = Some(frame.clone());
        }
        if let Ok(sink) = self.sink() {
            if let Err(e) = sink.push_parameters(frame.clone()) {
                tracing::trace!(error = %e, "parameter frame not delivered");
            }
        }
    }
}

/// Connect, watch for the sink to close, reconnect with backoff. Runs until shutdown.
pub async fn supervise_sink(
    link: SinkLink,
    connector: Arc<dyn SinkConnector>,
    config: SinkConfig,
    mut shutdown: ShutdownSignal,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.backoff_initial_ms),
        Duration::from_secs(config.backoff_ceiling_secs),
    );

    loop {
        match connector.connect().await {
            Ok(sink) => {
                backoff.reset();
                tracing::info!(sink = %sink.id(), "render sink connected");
                link.install(Some(sink.clone()));
                link.replay_latest(sink.as_ref());

                tokio::select! {
                    _ = sink.closed() => {
                        tracing::warn!(sink = %sink.id(), "render sink disconnected, reconnecting");
                        link.install(None);
                    }
                    _ = shutdown.wait() => break,
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                if backoff.attempts() == 1 {
                    tracing::info!(error = %e, "render sink unavailable, retrying with backoff");
                } else {
                    tracing::debug!(error = %e, delay = ?delay, "render sink still unavailable");
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait() => break,
                }
            }
        }
    }
    link.install(None);
    tracing::debug!("sink supervisor stopped");
}
