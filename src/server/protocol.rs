//! Wire format of the control protocol.
//!
//! Every frame in either direction is one JSON text message:
//! `{"type": "...", "data": {...}, "success"?: bool, "version"?: int}`.

use crate::ai::mood::MoodError;
use crate::animation::BlendError;
use crate::render::{SinkError, UnknownExpression};
use crate::tts::TtsError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Highest envelope version this server understands. A missing version is 1.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Envelope {
    pub fn success(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            success: Some(true),
            version: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".into(),
            data: json!({ "message": message.into() }),
            success: Some(false),
            version: None,
        }
    }

    /// Server-initiated frame with no request behind it.
    pub fn broadcast(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            success: None,
            version: None,
        }
    }

    pub fn to_text(&self) -> String {
        // Serializing a Value-backed struct cannot fail; keep a valid frame regardless.
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","data":{"message":"encode failed"},"success":false}"#.into())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Decode(String),
    #[error("Unknown message type: {0}")]
    UnknownCommand(String),
    #[error("{0}")]
    InvalidParameter(String),
    #[error("{0}")]
    UpstreamUnavailable(String),
    #[error("{0}")]
    InvalidState(String),
}

impl ProtocolError {
    pub fn to_envelope(&self) -> Envelope {
        Envelope::error(self.to_string())
    }
}

impl From<SinkError> for ProtocolError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Disconnected => {
                ProtocolError::UpstreamUnavailable("Render sink is not connected".into())
            }
            other => ProtocolError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<TtsError> for ProtocolError {
    fn from(e: TtsError) -> Self {
        match e {
            TtsError::ProviderNotFound(_) => ProtocolError::InvalidParameter(e.to_string()),
            other => ProtocolError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<MoodError> for ProtocolError {
    fn from(e: MoodError) -> Self {
        match e {
            MoodError::Stopped => ProtocolError::UpstreamUnavailable(e.to_string()),
            other => ProtocolError::InvalidState(other.to_string()),
        }
    }
}

impl From<UnknownExpression> for ProtocolError {
    fn from(e: UnknownExpression) -> Self {
        ProtocolError::InvalidParameter(e.to_string())
    }
}

impl From<BlendError> for ProtocolError {
    fn from(e: BlendError) -> Self {
        ProtocolError::InvalidParameter(e.to_string())
    }
}

// ── Inbound commands ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExpressionRequest {
    #[serde(default)]
    pub name: String,
}

fn default_motion_group() -> String {
    "tap".into()
}

fn default_motion_priority() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MotionRequest {
    #[serde(default = "default_motion_group")]
    pub group: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default = "default_motion_priority")]
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterRequest {
    #[serde(default, alias = "param_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterBatchRequest {
    #[serde(default)]
    pub params: HashMap<String, f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LookAtRequest {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

fn default_background() -> String {
    "transparent".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackgroundRequest {
    #[serde(rename = "type", default = "default_background")]
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
}

impl BackgroundRequest {
    /// Value forwarded to the sink: `image:<path>` for images with a path.
    pub fn resolved(&self) -> String {
        match (&*self.kind, &self.path) {
            ("image", Some(path)) if !path.is_empty() => format!("image:{}", path),
            _ => self.kind.clone(),
        }
    }
}

pub const DEFAULT_MESSAGE_MS: u64 = 5000;

fn default_message_ms() -> u64 {
    DEFAULT_MESSAGE_MS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_message_ms")]
    pub duration: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub opacity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TouchRequest {
    #[serde(default = "default_touch_action")]
    pub action: String,
    #[serde(default)]
    pub part: String,
}

fn default_touch_action() -> String {
    "tap".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MoodRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Expression(ExpressionRequest),
    Motion(MotionRequest),
    Parameter(ParameterRequest),
    ParameterBatch(ParameterBatchRequest),
    LookAt(LookAtRequest),
    Background(BackgroundRequest),
    Message(MessageRequest),
    Speak(SpeakRequest),
    GetStatus,
    Window(WindowRequest),
    TouchEvent(TouchRequest),
    Mood(MoodRequest),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Expression(_) => "expression",
            Command::Motion(_) => "motion",
            Command::Parameter(_) => "parameter",
            Command::ParameterBatch(_) => "parameter_batch",
            Command::LookAt(_) => "look_at",
            Command::Background(_) => "background",
            Command::Message(_) => "message",
            Command::Speak(_) => "speak",
            Command::GetStatus => "get_status",
            Command::Window(_) => "window",
            Command::TouchEvent(_) => "touch_event",
            Command::Mood(_) => "mood",
        }
    }
}

fn data_as<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    let data = match data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(data)
        .map_err(|e| ProtocolError::InvalidParameter(format!("Invalid data for '{}': {}", kind, e)))
}

/// Decode one inbound text frame.
///
/// Order matters: a frame that is not an envelope at all is a decode error,
/// an unsupported version is a decode error, an unknown `type` is reported
/// as such before its payload is looked at.
pub fn decode(text: &str) -> Result<Command, ProtocolError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))?;

    if let Some(version) = envelope.version {
        if version > PROTOCOL_VERSION {
            return Err(ProtocolError::Decode(format!(
                "unsupported protocol version {} (max {})",
                version, PROTOCOL_VERSION
            )));
        }
    }

    let kind = envelope.kind.as_str();
    let data = envelope.data;
    let command = match kind {
        "expression" => Command::Expression(data_as(kind, data)?),
        "motion" => Command::Motion(data_as(kind, data)?),
        "parameter" => Command::Parameter(data_as(kind, data)?),
        "parameter_batch" => Command::ParameterBatch(data_as(kind, data)?),
        "look_at" => Command::LookAt(data_as(kind, data)?),
        "background" => Command::Background(data_as(kind, data)?),
        "message" => Command::Message(data_as(kind, data)?),
        "speak" => Command::Speak(data_as(kind, data)?),
        "get_status" => Command::GetStatus,
        "window" => Command::Window(data_as(kind, data)?),
        "touch_event" => Command::TouchEvent(data_as(kind, data)?),
        "mood" => Command::Mood(data_as(kind, data)?),
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_and_missing_type_are_decode_errors() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(
            decode(r#"{"data":{}}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn unknown_type_names_the_type() {
        let err = decode(r#"{"type":"unknown_cmd","data":{}}"#).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownCommand("unknown_cmd".into()));
        assert!(err.to_string().contains("unknown_cmd"));
    }

    #[test]
    fn newer_version_is_rejected_older_and_missing_accepted() {
        assert!(matches!(
            decode(r#"{"type":"get_status","version":2}"#),
            Err(ProtocolError::Decode(_))
        ));
        assert_eq!(
            decode(r#"{"type":"get_status","version":1}"#).unwrap(),
            Command::GetStatus
        );
        assert_eq!(decode(r#"{"type":"get_status"}"#).unwrap(), Command::GetStatus);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        match decode(r#"{"type":"motion","data":{}}"#).unwrap() {
            Command::Motion(m) => {
                assert_eq!(m.group, "tap");
                assert_eq!(m.index, 0);
                assert_eq!(m.priority, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        match decode(r#"{"type":"message","data":{"text":"hi"}}"#).unwrap() {
            Command::Message(m) => assert_eq!(m.duration, DEFAULT_MESSAGE_MS),
            other => panic!("unexpected {:?}", other),
        }
        match decode(r#"{"type":"look_at","data":null}"#).unwrap() {
            Command::LookAt(l) => assert_eq!((l.x, l.y), (0.0, 0.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn param_id_is_accepted_for_id() {
        match decode(r#"{"type":"parameter","data":{"param_id":"ParamAngleX","value":15}}"#)
            .unwrap()
        {
            Command::Parameter(p) => {
                assert_eq!(p.id.as_deref(), Some("ParamAngleX"));
                assert_eq!(p.value, 15.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wrong_field_type_is_invalid_parameter() {
        assert!(matches!(
            decode(r#"{"type":"parameter","data":{"id":"ParamAngleX","value":"high"}}"#),
            Err(ProtocolError::InvalidParameter(_))
        ));
    }

    #[test]
    fn background_image_carries_its_path() {
        let req = BackgroundRequest {
            kind: "image".into(),
            path: Some("bg/room.png".into()),
        };
        assert_eq!(req.resolved(), "image:bg/room.png");
        let plain = BackgroundRequest {
            kind: "green".into(),
            path: None,
        };
        assert_eq!(plain.resolved(), "green");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        assert!(matches!(
            decode(r#"{"type":"expression","data":{"name":"happy","fade":true},"trace":"x"}"#),
            Ok(Command::Expression(_))
        ));
    }

    #[test]
    fn outbound_envelopes_survive_a_round_trip() {
        let frames = [
            Envelope::success("status", json!({"state": "idle", "connected_clients": 2})),
            Envelope::error("Unknown message type: x"),
            Envelope::broadcast("lip_sync", json!({"param_id": "ParamMouthOpenY", "value": 0.5})),
        ];
        for frame in frames {
            let back: Envelope = serde_json::from_str(&frame.to_text()).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn error_envelope_shape() {
        let text = Envelope::error("boom").to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "data": {"message": "boom"}, "success": false})
        );
    }
}
