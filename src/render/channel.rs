//! In-process sink: commands travel over a bounded channel to the host shell.

use super::interface::{RenderSink, SinkCapabilities, SinkCommand, SinkError, WindowAction};
use crate::animation::BlendFrame;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const DEFAULT_QUEUE: usize = 128;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ChannelSink {
    id: String,
    tx: mpsc::Sender<SinkCommand>,
    capabilities: SinkCapabilities,
}

impl ChannelSink {
    /// Create a sink and the host-side endpoint that drains it.
    pub fn pair(id: impl Into<String>, capabilities: SinkCapabilities) -> (Self, SinkEndpoint) {
        let (tx, rx) = mpsc::channel(DEFAULT_QUEUE);
        (
            Self {
                id: id.into(),
                tx,
                capabilities,
            },
            SinkEndpoint { commands: rx },
        )
    }

    async fn send(&self, command: SinkCommand) -> Result<(), SinkError> {
        self.tx
            .send_timeout(command, COMMAND_TIMEOUT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    SinkError::Rejected("sink is not keeping up".into())
                }
                mpsc::error::SendTimeoutError::Closed(_) => SinkError::Disconnected,
            })
    }

    fn require(&self, supported: bool, feature: &'static str) -> Result<(), SinkError> {
        if supported {
            Ok(())
        } else {
            Err(SinkError::Unsupported(feature))
        }
    }
}

#[async_trait]
impl RenderSink for ChannelSink {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn capabilities(&self) -> SinkCapabilities {
        self.capabilities
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    fn push_parameters(&self, frame: Arc<BlendFrame>) -> Result<(), SinkError> {
        match self.tx.try_send(SinkCommand::Parameters(frame)) {
            Ok(()) => Ok(()),
            // A newer frame follows within one tick.
            Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Disconnected),
        }
    }

    async fn set_expression(&self, name: &str) -> Result<(), SinkError> {
        self.send(SinkCommand::Expression {
            name: name.to_string(),
        })
        .await
    }

    async fn trigger_motion(&self, group: &str, index: u32, priority: u32) -> Result<(), SinkError> {
        self.require(self.capabilities.motion, "motion")?;
        self.send(SinkCommand::Motion {
            group: group.to_string(),
            index,
            priority,
        })
        .await
    }

    async fn set_background(&self, kind: &str) -> Result<(), SinkError> {
        self.require(self.capabilities.background, "background")?;
        self.send(SinkCommand::Background {
            kind: kind.to_string(),
        })
        .await
    }

    async fn show_message(&self, text: &str, duration_ms: u64) -> Result<(), SinkError> {
        self.require(self.capabilities.message, "message")?;
        self.send(SinkCommand::Message {
            text: text.to_string(),
            duration_ms,
        })
        .await
    }

    async fn control_window(&self, action: &WindowAction) -> Result<(), SinkError> {
        self.require(self.capabilities.window, "window")?;
        self.send(SinkCommand::Window(action.clone())).await
    }
}

/// Host-shell side of a [`ChannelSink`]. Dropping it disconnects the sink.
pub struct SinkEndpoint {
    commands: mpsc::Receiver<SinkCommand>,
}

impl SinkEndpoint {
    pub async fn recv(&mut self) -> Option<SinkCommand> {
        self.commands.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SinkCommand> {
        self.commands.try_recv().ok()
    }
}

// ── Connector ──────────────────────────────────────────

/// Source of fresh sink connections, polled by the reconnect supervisor.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RenderSink>, SinkError>;
}

/// Connector fed by host shells calling [`SinkAttacher::attach`].
pub struct ChannelConnector {
    pending: Mutex<mpsc::UnboundedReceiver<Arc<ChannelSink>>>,
}

/// Cloneable handle the host shell uses to (re)attach itself.
#[derive(Clone)]
pub struct SinkAttacher {
    tx: mpsc::UnboundedSender<Arc<ChannelSink>>,
}

pub fn channel_connector() -> (ChannelConnector, SinkAttacher) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelConnector {
            pending: Mutex::new(rx),
        },
        SinkAttacher { tx },
    )
}

impl SinkAttacher {
    /// Offer a new sink connection. The supervisor picks it up on its next attempt.
    pub fn attach(&self, id: &str, capabilities: SinkCapabilities) -> SinkEndpoint {
        let (sink, endpoint) = ChannelSink::pair(id, capabilities);
        if self.tx.send(Arc::new(sink)).is_err() {
            tracing::warn!(sink = %id, "sink supervisor is gone, attach ignored");
        }
        endpoint
    }
}

#[async_trait]
impl SinkConnector for ChannelConnector {
    async fn connect(&self) -> Result<Arc<dyn RenderSink>, SinkError> {
        let mut pending = self.pending.lock().await;
        // Skip shells that detached before being picked up.
        while let Ok(sink) = pending.try_recv() {
            if sink.is_connected() {
                return Ok(sink as Arc<dyn RenderSink>);
            }
        }
        Err(SinkError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_reach_the_endpoint() {
        let (sink, mut endpoint) = ChannelSink::pair("test", SinkCapabilities::all());
        sink.set_expression("happy").await.unwrap();
        sink.trigger_motion("tap", 0, 2).await.unwrap();
        assert_eq!(
            endpoint.recv().await,
            Some(SinkCommand::Expression {
                name: "happy".into()
            })
        );
        assert!(matches!(
            endpoint.recv().await,
            Some(SinkCommand::Motion { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn missing_capability_is_unsupported() {
        let (sink, _endpoint) = ChannelSink::pair("test", SinkCapabilities::default());
        assert_eq!(
            sink.set_background("image:x.png").await,
            Err(SinkError::Unsupported("background"))
        );
        assert_eq!(
            sink.control_window(&WindowAction::Hide).await,
            Err(SinkError::Unsupported("window"))
        );
    }

    #[tokio::test]
    async fn dropped_endpoint_disconnects() {
        let (sink, endpoint) = ChannelSink::pair("test", SinkCapabilities::all());
        drop(endpoint);
        assert!(!sink.is_connected());
        assert_eq!(sink.set_expression("happy").await, Err(SinkError::Disconnected));
        assert_eq!(
            sink.push_parameters(Arc::new(BlendFrame::default())),
            Err(SinkError::Disconnected)
        );
    }

    #[tokio::test]
    async fn full_queue_drops_parameter_frames_quietly() {
        let (sink, _endpoint) = ChannelSink::pair("test", SinkCapabilities::all());
        for _ in 0..(DEFAULT_QUEUE * 2) {
            assert!(sink.push_parameters(Arc::new(BlendFrame::default())).is_ok());
        }
    }

    #[tokio::test]
    async fn connector_skips_detached_shells() {
        let (connector, attacher) = channel_connector();
        assert!(connector.connect().await.is_err());
        let stale = attacher.attach("old", SinkCapabilities::all());
        drop(stale);
        let _live = attacher.attach("new", SinkCapabilities::all());
        let sink = connector.connect().await.unwrap();
        assert_eq!(sink.id(), "new");
    }
}
