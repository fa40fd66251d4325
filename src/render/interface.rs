//! Render Sink: the boundary to whatever actually draws the character.
//!
//! The core only assumes the sink accepts parameter vectors and
//! expression/motion commands asynchronously. Optional features are
//! advertised through [`SinkCapabilities`]; the default trait methods
//! report them as unsupported instead of panicking or silently succeeding.

use crate::animation::BlendFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ── Error Types ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("render sink is not connected")]
    Disconnected,
    #[error("render sink does not support {0}")]
    Unsupported(&'static str),
    #[error("render sink rejected the command: {0}")]
    Rejected(String),
}

// ── Commands ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WindowAction {
    Move { x: i32, y: i32 },
    Opacity { opacity: f32 },
    Hide,
    Show,
}

impl WindowAction {
    pub fn name(&self) -> &'static str {
        match self {
            WindowAction::Move { .. } => "move",
            WindowAction::Opacity { .. } => "opacity",
            WindowAction::Hide => "hide",
            WindowAction::Show => "show",
        }
    }
}

/// Everything the core can ask of a sink, as a message.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    Parameters(Arc<BlendFrame>),
    Expression { name: String },
    Motion { group: String, index: u32, priority: u32 },
    Background { kind: String },
    Message { text: String, duration_ms: u64 },
    Window(WindowAction),
}

// ── Capability Flags ───────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkCapabilities {
    pub motion: bool,
    pub background: bool,
    pub message: bool,
    pub window: bool,
}

impl SinkCapabilities {
    pub fn all() -> Self {
        Self {
            motion: true,
            background: true,
            message: true,
            window: true,
        }
    }
}

// ── Sink Trait ─────────────────────────────────────────

#[async_trait]
pub trait RenderSink: Send + Sync {
    fn id(&self) -> String;

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::default()
    }

    fn is_connected(&self) -> bool;

    /// Resolves once the sink has gone away.
    async fn closed(&self);

    /// Latest-wins parameter write. Must not wait on the sink.
    fn push_parameters(&self, frame: Arc<BlendFrame>) -> Result<(), SinkError>;

    async fn set_expression(&self, name: &str) -> Result<(), SinkError>;

    async fn trigger_motion(&self, _group: &str, _index: u32, _priority: u32) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("motion"))
    }

    async fn set_background(&self, _kind: &str) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("background"))
    }

    async fn show_message(&self, _text: &str, _duration_ms: u64) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("message"))
    }

    async fn control_window(&self, _action: &WindowAction) -> Result<(), SinkError> {
        Err(SinkError::Unsupported("window"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ParametersOnly;

    #[async_trait]
    impl RenderSink for ParametersOnly {
        fn id(&self) -> String {
            "parameters-only".into()
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn closed(&self) {}
        fn push_parameters(&self, _frame: Arc<BlendFrame>) -> Result<(), SinkError> {
            Ok(())
        }
        async fn set_expression(&self, _name: &str) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn optional_features_default_to_unsupported() {
        let sink = ParametersOnly;
        assert_eq!(sink.capabilities(), SinkCapabilities::default());
        assert_eq!(
            sink.trigger_motion("tap", 0, 2).await,
            Err(SinkError::Unsupported("motion"))
        );
        assert_eq!(
            sink.set_background("image:/tmp/a.png").await,
            Err(SinkError::Unsupported("background"))
        );
        assert_eq!(
            sink.control_window(&WindowAction::Hide).await,
            Err(SinkError::Unsupported("window"))
        );
    }

    #[test]
    fn commands_carry_their_payload() {
        let frame = Arc::new(BlendFrame::default());
        let commands = vec![
            SinkCommand::Parameters(frame.clone()),
            SinkCommand::Background {
                kind: "image:/tmp/a.png".into(),
            },
            SinkCommand::Window(WindowAction::Opacity { opacity: 0.5 }),
        ];
        assert_eq!(commands.clone(), commands);
        assert!(matches!(&commands[0], SinkCommand::Parameters(f) if Arc::ptr_eq(f, &frame)));
    }

    #[test]
    fn window_actions_use_the_protocol_names() {
        let json = serde_json::to_value(WindowAction::Move { x: 3, y: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"action": "move", "x": 3, "y": 4}));
        assert_eq!(WindowAction::Show.name(), "show");
    }
}
