//! Session: builds every service of one companion session and owns its tasks.
//!
//! Nothing here is global: each service is constructed once, handed to the
//! tasks that need it, and torn down together when the session stops.

use crate::ai::{heartbeat_loop, spawn_mood_actor, BuiltinLines, MoodEngine, Presenter, TouchReactionRouter};
use crate::animation::{
    pointer_follow_loop, spawn_blend_loop, BlendError, FrameOutput, GazeHold, ManualPointer,
    PointerFollowEngine,
};
use crate::config::CompanionConfig;
use crate::render::{channel_connector, supervise_sink, ExpressionCatalog, SinkAttacher, SinkLink};
use crate::server::{
    self, ControlContext, ControlServices, FrameBroadcaster, LipSyncBroadcaster, ObserverSet,
    ServerError,
};
use crate::tts::{AmplitudeEnvelopeExtractor, ClockedOutput, SpeechService};
use crate::utils::shutdown::{shutdown_pair, ShutdownTrigger};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long `shutdown` waits for each task before giving up on it.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid blend configuration: {0}")]
    Blend(#[from] BlendError),
    #[error(transparent)]
    Server(#[from] ServerError),
}

pub struct Session {
    trigger: ShutdownTrigger,
    ctx: Arc<ControlContext>,
    attacher: SinkAttacher,
    pointer: Arc<ManualPointer>,
    addr: SocketAddr,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    /// Build and start a session. Fails only on bad blend settings or when
    /// the control server cannot bind.
    pub async fn start(config: CompanionConfig) -> Result<Self, SessionError> {
        let (trigger, signal) = shutdown_pair();
        let mut tasks = Vec::new();

        let observers = ObserverSet::new(config.server.observer_queue);
        let link = SinkLink::new();

        // ── Animation ──
        let blender = config.blend.build_blender()?;
        let mut outputs: Vec<Arc<dyn FrameOutput>> = vec![Arc::new(link.clone())];
        if config.blend.broadcast_frames {
            outputs.push(Arc::new(FrameBroadcaster::new(observers.clone())));
        }
        let (blend, blend_task) =
            spawn_blend_loop(blender, config.blend.rate_hz, outputs, signal.clone());
        tasks.push(("blend", blend_task));

        let pointer = Arc::new(ManualPointer::new());
        let gaze_hold = GazeHold::default();
        let pointer_engine = PointerFollowEngine::new(config.pointer.clone());
        tasks.push((
            "pointer",
            tokio::spawn(pointer_follow_loop(
                pointer_engine.clone(),
                pointer.clone(),
                blend.clone(),
                gaze_hold.clone(),
                signal.clone(),
            )),
        ));

        // ── Mood ──
        let engine = MoodEngine::new(
            config.mood.initial_affection,
            config.mood.tap_increment,
            Instant::now(),
        );
        let (mood, mood_task) = spawn_mood_actor(engine, StdRng::from_entropy(), signal.clone());
        tasks.push(("mood", mood_task));

        // ── Speech ──
        let lip_sync = Arc::new(LipSyncBroadcaster::new(
            &config.lip_sync,
            blend.clone(),
            observers.clone(),
        ));
        let speech = SpeechService::init_from_config(
            &config.tts,
            AmplitudeEnvelopeExtractor::new(config.lip_sync.clone()),
            Arc::new(ClockedOutput),
            lip_sync,
        )
        .await;
        if speech.provider_ids().await.is_empty() {
            tracing::warn!("no speech provider configured, speak requests will fail");
        }

        // ── Render sink ──
        let (connector, attacher) = channel_connector();
        tasks.push((
            "sink",
            tokio::spawn(supervise_sink(
                link.clone(),
                Arc::new(connector),
                config.sink.clone(),
                signal.clone(),
            )),
        ));

        // ── Control surface ──
        let ctx = Arc::new(ControlContext::new(
            ControlServices {
                blend,
                mood: mood.clone(),
                sink: link,
                speech,
                observers,
                touch: TouchReactionRouter::new(Duration::from_millis(config.touch.revert_after_ms)),
                catalog: ExpressionCatalog::new(&config.expressions),
                pointer: pointer_engine,
                gaze_hold,
                window: config.window.clone(),
            },
            StdRng::from_entropy(),
        ));

        let (addr, server_task) = match server::serve(&config.server, ctx.clone(), signal.clone()) {
            Ok(bound) => bound,
            Err(e) => {
                trigger.trigger();
                stop_tasks(tasks).await;
                return Err(e.into());
            }
        };
        tasks.push(("server", server_task));

        let presenter: Arc<dyn Presenter> = ctx.clone();
        tasks.push((
            "heartbeat",
            tokio::spawn(heartbeat_loop(
                config.mood.clone(),
                mood,
                Arc::new(BuiltinLines::default()),
                presenter,
                StdRng::from_entropy(),
                signal,
            )),
        ));

        tracing::info!(%addr, "session started");
        Ok(Self {
            trigger,
            ctx,
            attacher,
            pointer,
            addr,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle the host shell uses to attach (and re-attach) its render sink.
    pub fn attacher(&self) -> SinkAttacher {
        self.attacher.clone()
    }

    /// Pointer source the host shell feeds with desktop pointer positions.
    pub fn pointer(&self) -> Arc<ManualPointer> {
        self.pointer.clone()
    }

    pub fn context(&self) -> &Arc<ControlContext> {
        &self.ctx
    }

    /// Cancel every periodic task and close every observer connection.
    pub async fn shutdown(self) {
        tracing::info!("session stopping");
        self.trigger.trigger();
        self.ctx.speech().stop();
        self.ctx.observers().close_all();
        stop_tasks(self.tasks).await;
        tracing::info!("session stopped");
    }
}

async fn stop_tasks(tasks: Vec<(&'static str, JoinHandle<()>)>) {
    for (name, task) in tasks {
        match tokio::time::timeout(TASK_STOP_TIMEOUT, task).await {
            Ok(Ok(())) => tracing::debug!(task = name, "task stopped"),
            Ok(Err(e)) => tracing::warn!(task = name, error = %e, "task ended abnormally"),
            Err(_) => tracing::warn!(task = name, "task did not stop in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MoodConfig;
    use crate::render::{SinkCapabilities, SinkCommand};
    use crate::server::ServerConfig;

    fn test_config() -> CompanionConfig {
        CompanionConfig {
            server: ServerConfig {
                port: 0,
                ..Default::default()
            },
            mood: MoodConfig {
                greet_on_start: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn session_starts_attaches_a_shell_and_stops() {
        let session = Session::start(test_config()).await.unwrap();
        assert_ne!(session.local_addr().port(), 0);

        let mut shell = session.attacher().attach("shell", SinkCapabilities::all());
        let frame = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match shell.recv().await {
                    Some(SinkCommand::Parameters(frame)) => return frame,
                    Some(_) => continue,
                    None => panic!("shell detached"),
                }
            }
        })
        .await
        .expect("parameter frame in time");
        assert!(frame.params.contains_key(crate::animation::PARAM_ANGLE_X));

        let status = session.context().status().await;
        assert_eq!(status.data["affection"], 30);

        tokio::time::timeout(Duration::from_secs(10), session.shutdown())
            .await
            .expect("session shut down in time");
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let first = Session::start(test_config()).await.unwrap();
        let mut config = test_config();
        config.server.port = first.local_addr().port();
        let err = Session::start(config).await.err().expect("second bind fails");
        assert!(matches!(err, SessionError::Server(ServerError::Bind(_))));
        first.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_smoothing_is_rejected_at_start() {
        let mut config = test_config();
        config.blend.default_smoothing = 0.0;
        assert!(matches!(
            Session::start(config).await,
            Err(SessionError::Blend(_))
        ));
    }
}
