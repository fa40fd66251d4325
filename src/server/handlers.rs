//! Dispatch table for inbound commands.
//!
//! Every handler returns either a success envelope or a [`ProtocolError`];
//! the connection loop renders errors as `error` envelopes and keeps going.

use super::observers::ObserverSet;
use super::protocol::{
    self, BackgroundRequest, Command, Envelope, ExpressionRequest, LookAtRequest, MessageRequest,
    MoodRequest, MotionRequest, ParameterBatchRequest, ParameterRequest, ProtocolError,
    SpeakRequest, TouchRequest, WindowRequest, DEFAULT_MESSAGE_MS, PROTOCOL_VERSION,
};
use crate::ai::heartbeat::Presenter;
use crate::ai::mood::InteractionKind;
use crate::ai::mood_actor::MoodHandle;
use crate::ai::touch::TouchReactionRouter;
use crate::animation::{canonical_id, BlendHandle, GazeHold, PointerFollowEngine};
use crate::render::{ExpressionCatalog, SinkError, SinkLink, WindowAction};
use crate::tts::{SpeechService, TtsParams};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// How many expression names replies list.
const LISTED_EXPRESSIONS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub x: i32,
    pub y: i32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { x: 100, y: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    pub revert_after_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            revert_after_ms: 3000,
        }
    }
}

/// What the sink was last told to show, as reported by `get_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationState {
    pub expression: String,
    pub x: i32,
    pub y: i32,
    pub opacity: f32,
    pub visible: bool,
    pub background: String,
}

impl PresentationState {
    pub fn new(window: &WindowConfig) -> Self {
        Self {
            expression: "normal".into(),
            x: window.x,
            y: window.y,
            opacity: 1.0,
            visible: true,
            background: "transparent".into(),
        }
    }
}

/// Services the handlers work against. Built once by the session.
pub struct ControlServices {
    pub blend: BlendHandle,
    pub mood: MoodHandle,
    pub sink: SinkLink,
    pub speech: SpeechService,
    pub observers: ObserverSet,
    pub touch: TouchReactionRouter,
    pub catalog: ExpressionCatalog,
    pub pointer: PointerFollowEngine,
    pub gaze_hold: GazeHold,
    pub window: WindowConfig,
}

pub struct ControlContext {
    blend: BlendHandle,
    mood: MoodHandle,
    sink: SinkLink,
    speech: SpeechService,
    observers: ObserverSet,
    touch: TouchReactionRouter,
    catalog: ExpressionCatalog,
    pointer: PointerFollowEngine,
    gaze_hold: GazeHold,
    look_at_hold: Duration,
    state: Arc<RwLock<PresentationState>>,
    rng: Mutex<StdRng>,
    revert: Mutex<Option<JoinHandle<()>>>,
}

impl ControlContext {
    pub fn new(services: ControlServices, rng: StdRng) -> Self {
        let look_at_hold = Duration::from_millis(services.pointer.config().look_at_hold_ms);
        let mut state = PresentationState::new(&services.window);
        state.expression = services.mood.snapshot().expression.to_string();
        Self {
            blend: services.blend,
            mood: services.mood,
            sink: services.sink,
            speech: services.speech,
            observers: services.observers,
            touch: services.touch,
            catalog: services.catalog,
            pointer: services.pointer,
            gaze_hold: services.gaze_hold,
            look_at_hold,
            state: Arc::new(RwLock::new(state)),
            rng: Mutex::new(rng),
            revert: Mutex::new(None),
        }
    }

    pub fn observers(&self) -> &ObserverSet {
        &self.observers
    }

    pub fn speech(&self) -> &SpeechService {
        &self.speech
    }

    pub async fn presentation(&self) -> PresentationState {
        self.state.read().await.clone()
    }

    /// Decode, dispatch and render the reply for one inbound text frame.
    pub async fn handle_text(&self, text: &str) -> Envelope {
        let result = match protocol::decode(text) {
            Ok(command) => {
                let name = command.name();
                tracing::debug!(command = name, "dispatching");
                self.dispatch(command).await
            }
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "command failed");
            e.to_envelope()
        })
    }

    pub async fn dispatch(&self, command: Command) -> Result<Envelope, ProtocolError> {
        match command {
            Command::Expression(req) => self.set_expression(req).await,
            Command::Motion(req) => self.trigger_motion(req).await,
            Command::Parameter(req) => self.set_parameter(req),
            Command::ParameterBatch(req) => self.set_parameter_batch(req),
            Command::LookAt(req) => self.look_at(req),
            Command::Background(req) => self.set_background(req).await,
            Command::Message(req) => self.show_message(req).await,
            Command::Speak(req) => self.speak(req).await,
            Command::GetStatus => Ok(self.status().await),
            Command::Window(req) => self.control_window(req).await,
            Command::TouchEvent(req) => self.touch(req).await,
            Command::Mood(req) => self.request_mood(req).await,
        }
    }

    fn listed_expressions(&self) -> Vec<String> {
        self.catalog
            .names()
            .iter()
            .take(LISTED_EXPRESSIONS)
            .cloned()
            .collect()
    }

    /// Resolve, forward to the sink and record an expression.
    async fn present_expression(&self, requested: &str) -> Result<String, ProtocolError> {
        let actual = self.catalog.resolve(requested)?;
        self.sink.set_expression(&actual).await?;
        self.state.write().await.expression = actual.clone();
        Ok(actual)
    }

    // ── Handlers ───────────────────────────────────────

    async fn set_expression(&self, req: ExpressionRequest) -> Result<Envelope, ProtocolError> {
        if req.name.trim().is_empty() {
            return Err(ProtocolError::InvalidParameter(
                "Expression name is required".into(),
            ));
        }
        let actual = self.present_expression(&req.name).await?;
        Ok(Envelope::success(
            "expression_set",
            json!({
                "requested_name": req.name,
                "actual_name": actual,
                "available_expressions": self.listed_expressions(),
            }),
        ))
    }

    async fn trigger_motion(&self, req: MotionRequest) -> Result<Envelope, ProtocolError> {
        self.sink
            .trigger_motion(&req.group, req.index, req.priority)
            .await?;
        Ok(Envelope::success(
            "motion_triggered",
            json!({ "group": req.group, "index": req.index, "priority": req.priority }),
        ))
    }

    fn require_finite(id: &str, value: f32) -> Result<(), ProtocolError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(ProtocolError::InvalidParameter(format!(
                "Parameter '{}' needs a finite value",
                id
            )))
        }
    }

    fn blend_stopped() -> ProtocolError {
        ProtocolError::UpstreamUnavailable("Animation loop is not running".into())
    }

    fn set_parameter(&self, req: ParameterRequest) -> Result<Envelope, ProtocolError> {
        let id = req
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProtocolError::InvalidParameter("Parameter ID is required".into()))?;
        Self::require_finite(&id, req.value)?;
        let id = canonical_id(&id).to_string();

        let previous = self.blend.value(&id);
        if !self.blend.set_target(id.as_str(), req.value) {
            return Err(Self::blend_stopped());
        }
        Ok(Envelope::success(
            "parameter_set",
            json!({
                "param_id": id,
                "requested_value": req.value,
                "previous_value": previous,
            }),
        ))
    }

    fn set_parameter_batch(&self, req: ParameterBatchRequest) -> Result<Envelope, ProtocolError> {
        for (id, value) in &req.params {
            if id.trim().is_empty() {
                return Err(ProtocolError::InvalidParameter(
                    "Parameter ID is required".into(),
                ));
            }
            Self::require_finite(id, *value)?;
        }
        let count = req.params.len();
        if !self
            .blend
            .set_targets(req.params.iter().map(|(k, v)| (k.clone(), *v)))
        {
            return Err(Self::blend_stopped());
        }
        Ok(Envelope::success(
            "parameter_batch_set",
            json!({ "count": count, "params": req.params }),
        ))
    }

    fn look_at(&self, req: LookAtRequest) -> Result<Envelope, ProtocolError> {
        if !req.x.is_finite() || !req.y.is_finite() {
            return Err(ProtocolError::InvalidParameter(
                "look_at needs finite x and y".into(),
            ));
        }
        let x = req.x.clamp(-1.0, 1.0);
        let y = req.y.clamp(-1.0, 1.0);
        let targets = self.pointer.targets_for(x, y);
        if !self.blend.set_targets(targets.as_pairs()) {
            return Err(Self::blend_stopped());
        }
        self.gaze_hold.hold_for(self.look_at_hold);
        Ok(Envelope::success("looking_at", json!({ "x": x, "y": y })))
    }

    async fn set_background(&self, req: BackgroundRequest) -> Result<Envelope, ProtocolError> {
        let kind = req.resolved();
        self.sink.set_background(&kind).await?;
        self.state.write().await.background = kind.clone();
        Ok(Envelope::success("background_set", json!({ "type": kind })))
    }

    async fn show_message(&self, req: MessageRequest) -> Result<Envelope, ProtocolError> {
        self.sink.show_message(&req.text, req.duration).await?;
        Ok(Envelope::success(
            "message_shown",
            json!({ "text": req.text, "duration": req.duration }),
        ))
    }

    async fn speak(&self, req: SpeakRequest) -> Result<Envelope, ProtocolError> {
        let text = req.text.trim();
        if text.is_empty() {
            return Err(ProtocolError::InvalidParameter(
                "Text is required for speak command".into(),
            ));
        }
        // The bubble is a nicety; speech goes ahead without a sink.
        if let Err(e) = self.sink.show_message(text, DEFAULT_MESSAGE_MS).await {
            tracing::debug!(error = %e, "speech bubble not shown");
        }
        let params = TtsParams {
            voice: req.voice,
            ..Default::default()
        };
        let report = self
            .speech
            .speak(text, req.provider.as_deref(), params)
            .await?;
        Ok(Envelope::success("speak_completed", json!(report)))
    }

    pub async fn status(&self) -> Envelope {
        let state = self.presentation().await;
        let mood = self.mood.snapshot();
        let speaking = self.speech.is_speaking();
        let frame = self.blend.snapshot();
        Envelope::success(
            "status",
            json!({
                "state": if speaking { "speaking" } else { "idle" },
                "expression": state.expression,
                "position": { "x": state.x, "y": state.y },
                "connected_clients": self.observers.len(),
                "available_expressions": self.listed_expressions(),
                "total_expressions": self.catalog.len(),
                "mood": mood.mood,
                "affection": mood.affection,
                "tier": mood.tier,
                "speaking": speaking,
                "protocol_version": PROTOCOL_VERSION,
                "sink_connected": self.sink.is_connected(),
                "window": { "opacity": state.opacity, "visible": state.visible },
                "background": state.background,
                "parameters": frame.params,
            }),
        )
    }

    async fn control_window(&self, req: WindowRequest) -> Result<Envelope, ProtocolError> {
        let action = {
            let state = self.state.read().await;
            match req.action.as_str() {
                "move" => WindowAction::Move {
                    x: req.x.unwrap_or(state.x),
                    y: req.y.unwrap_or(state.y),
                },
                "opacity" => {
                    let opacity = req.opacity.unwrap_or(1.0);
                    if !opacity.is_finite() {
                        return Err(ProtocolError::InvalidParameter(
                            "opacity must be a number".into(),
                        ));
                    }
                    WindowAction::Opacity {
                        opacity: opacity.clamp(0.0, 1.0),
                    }
                }
                "hide" => WindowAction::Hide,
                "show" => WindowAction::Show,
                other => {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "Unknown window action: {}",
                        other
                    )))
                }
            }
        };

        self.sink.control_window(&action).await?;
        let mut state = self.state.write().await;
        match action {
            WindowAction::Move { x, y } => {
                state.x = x;
                state.y = y;
            }
            WindowAction::Opacity { opacity } => state.opacity = opacity,
            WindowAction::Hide => state.visible = false,
            WindowAction::Show => state.visible = true,
        }
        Ok(Envelope::success(
            "window_updated",
            json!({ "action": action.name() }),
        ))
    }

    async fn touch(&self, req: TouchRequest) -> Result<Envelope, ProtocolError> {
        let (_, snapshot) = self
            .mood
            .record_interaction(InteractionKind::parse(&req.action))
            .await?;
        let reaction = match self.rng.lock() {
            Ok(mut rng) => self.touch.react(&req.part, &snapshot, &mut *rng),
            Err(_) => return Err(ProtocolError::InvalidState("touch router unavailable".into())),
        };

        // Presentation is best effort: the interaction already counted.
        let expression = match self.present_expression(&reaction.expression).await {
            Ok(actual) => actual,
            Err(e) => {
                tracing::debug!(error = %e, "touch expression not shown");
                reaction.expression.clone()
            }
        };
        match self.sink.trigger_motion(&reaction.motion, 0, 2).await {
            Ok(()) | Err(SinkError::Unsupported(_)) => {}
            Err(e) => tracing::debug!(error = %e, "touch motion not played"),
        }
        self.say_in_background(&reaction.line);
        self.schedule_revert(reaction.resting_expression.clone(), reaction.revert_after);

        self.observers.broadcast(&Envelope::broadcast(
            "touch_event",
            json!({
                "action": req.action,
                "part": req.part,
                "region": reaction.region,
                "expression": expression,
            }),
        ));

        Ok(Envelope::success(
            "touch_reaction",
            json!({
                "part": req.part,
                "region": reaction.region,
                "expression": expression,
                "motion": reaction.motion,
                "line": reaction.line,
                "affection": snapshot.affection,
                "tier": snapshot.tier,
                "mood": snapshot.mood,
            }),
        ))
    }

    async fn request_mood(&self, req: MoodRequest) -> Result<Envelope, ProtocolError> {
        if req.name.trim().is_empty() {
            return Err(ProtocolError::InvalidParameter("Mood name is required".into()));
        }
        let (changed, snapshot) = self.mood.set_mood(&req.name).await?;
        if changed {
            if let Err(e) = self.present_expression(snapshot.expression).await {
                tracing::debug!(error = %e, "mood expression not shown");
            }
        }
        Ok(Envelope::success(
            "mood_set",
            json!({
                "mood": snapshot.mood,
                "expression": snapshot.expression,
                "changed": changed,
            }),
        ))
    }

    // ── Background work ────────────────────────────────

    /// Return to `expression` after `delay`, replacing any pending revert.
    fn schedule_revert(&self, expression: String, delay: Duration) {
        let catalog = self.catalog.clone();
        let sink = self.sink.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Ok(actual) = catalog.resolve(&expression) else {
                return;
            };
            match sink.set_expression(&actual).await {
                Ok(()) => state.write().await.expression = actual,
                Err(e) => tracing::debug!(error = %e, "expression revert skipped"),
            }
        });
        if let Ok(mut pending) = self.revert.lock() {
            if let Some(previous) = pending.replace(task) {
                previous.abort();
            }
        }
    }

    /// Show `text` in a bubble and speak it without waiting for either.
    fn say_in_background(&self, text: &str) {
        let text = text.to_string();
        let sink = self.sink.clone();
        let speech = self.speech.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.show_message(&text, DEFAULT_MESSAGE_MS).await {
                tracing::debug!(error = %e, "speech bubble not shown");
            }
            if let Err(e) = speech.speak(&text, None, TtsParams::default()).await {
                tracing::debug!(error = %e, "line not spoken");
            }
        });
    }
}

impl Presenter for ControlContext {
    fn show_expression(&self, name: &str) {
        let Ok(actual) = self.catalog.resolve(name) else {
            tracing::debug!(expression = name, "expression not in catalog");
            return;
        };
        let sink = self.sink.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            match sink.set_expression(&actual).await {
                Ok(()) => state.write().await.expression = actual,
                Err(e) => tracing::debug!(error = %e, "expression not shown"),
            }
        });
    }

    fn say(&self, text: &str) {
        self.say_in_background(text);
    }
}

impl Drop for ControlContext {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.revert.lock() {
            if let Some(task) = pending.take() {
                task.abort();
            }
        }
    }
}
