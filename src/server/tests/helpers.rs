use crate::ai::mood::MoodEngine;
use crate::ai::mood_actor::{spawn_mood_actor, MoodHandle};
use crate::ai::touch::TouchReactionRouter;
use crate::animation::{
    spawn_blend_loop, BlendHandle, FrameOutput, GazeHold, ParameterBlender, PointerConfig,
    PointerFollowEngine,
};
use crate::render::{
    channel_connector, supervise_sink, ExpressionCatalog, ExpressionConfig, SinkCapabilities,
    SinkCommand, SinkConfig, SinkLink,
};
use crate::server::{routes, ControlContext, ControlServices, LipSyncBroadcaster, ObserverSet, WindowConfig};
use crate::tts::{
    AmplitudeEnvelopeExtractor, ClockedOutput, LipSyncConfig, SpeechProvider, SpeechService,
    TtsError, TtsParams,
};
use crate::utils::shutdown::{shutdown_pair, ShutdownSignal, ShutdownTrigger};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use warp::test::WsClient;

// ── Speech ──────────────────────────────────────────────────

/// 8 kHz mono square wave, `millis` long.
pub fn tone(amplitude: i16, millis: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(8 * millis) {
            let s = if i % 2 == 0 { amplitude } else { -amplitude };
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub struct ToneProvider {
    pub amplitude: i16,
    pub millis: u32,
}

#[async_trait]
impl SpeechProvider for ToneProvider {
    fn id(&self) -> String {
        "tone".into()
    }
    async fn is_available(&self) -> bool {
        true
    }
    async fn synthesize(&self, _text: &str, _params: &TtsParams) -> Result<Vec<u8>, TtsError> {
        Ok(tone(self.amplitude, self.millis))
    }
}

// ── Session harness ─────────────────────────────────────────

pub struct Harness {
    pub ctx: Arc<ControlContext>,
    pub blend: BlendHandle,
    pub mood: MoodHandle,
    pub gaze_hold: GazeHold,
    /// Non-parameter commands the fake shell received, in order.
    pub shell: Arc<Mutex<Vec<SinkCommand>>>,
    pub trigger: ShutdownTrigger,
    pub signal: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl Harness {
    pub async fn client(&self) -> WsClient {
        warp::test::ws()
            .path("/sprite")
            .handshake(routes(self.ctx.clone(), "sprite", self.signal.clone()))
            .await
            .expect("handshake")
    }

    /// Commands the shell has drained so far, after letting it catch up.
    pub async fn shell_commands(&self) -> Vec<SinkCommand> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.shell.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.trigger.trigger();
        for task in self.tasks {
            let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
        }
    }
}

/// A full control session. `with_shell` attaches a fake render shell.
pub async fn harness(with_shell: bool, speech_amplitude: i16) -> Harness {
    harness_with_speech(with_shell, speech_amplitude, 300).await
}

/// Like [`harness`], with utterances lasting `speech_millis`.
pub async fn harness_with_speech(with_shell: bool, speech_amplitude: i16, speech_millis: u32) -> Harness {
    let (trigger, signal) = shutdown_pair();
    let observers = ObserverSet::new(64);
    let link = SinkLink::new();
    let mut tasks = Vec::new();

    let blender = ParameterBlender::with_standard_channels(0.15).unwrap();
    let outputs: Vec<Arc<dyn FrameOutput>> = vec![Arc::new(link.clone())];
    let (blend, blend_task) = spawn_blend_loop(blender, 60, outputs, signal.clone());
    tasks.push(blend_task);

    let engine = MoodEngine::new(30, 5, tokio::time::Instant::now());
    let (mood, mood_task) = spawn_mood_actor(engine, StdRng::seed_from_u64(11), signal.clone());
    tasks.push(mood_task);

    let lip_sync = LipSyncConfig::default();
    let speech = SpeechService::new(
        AmplitudeEnvelopeExtractor::new(lip_sync.clone()),
        Arc::new(ClockedOutput),
        Arc::new(LipSyncBroadcaster::new(&lip_sync, blend.clone(), observers.clone())),
    );
    speech
        .register_provider(Arc::new(ToneProvider {
            amplitude: speech_amplitude,
            millis: speech_millis,
        }))
        .await;

    let shell = Arc::new(Mutex::new(Vec::new()));
    if with_shell {
        let (connector, attacher) = channel_connector();
        let mut endpoint = attacher.attach("test-shell", SinkCapabilities::all());
        tasks.push(tokio::spawn(supervise_sink(
            link.clone(),
            Arc::new(connector),
            SinkConfig::default(),
            signal.clone(),
        )));
        let record = shell.clone();
        tasks.push(tokio::spawn(async move {
            // Keep the attacher alive so the shell could re-attach.
            let _attacher = attacher;
            while let Some(command) = endpoint.recv().await {
                if !matches!(command, SinkCommand::Parameters(_)) {
                    record.lock().unwrap().push(command);
                }
            }
        }));
        for _ in 0..100 {
            if link.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(link.is_connected(), "fake shell never attached");
    }

    let gaze_hold = GazeHold::default();
    let ctx = Arc::new(ControlContext::new(
        ControlServices {
            blend: blend.clone(),
            mood: mood.clone(),
            sink: link,
            speech,
            observers,
            touch: TouchReactionRouter::new(Duration::from_millis(200)),
            catalog: ExpressionCatalog::new(&ExpressionConfig::default()),
            pointer: PointerFollowEngine::new(PointerConfig::default()),
            gaze_hold: gaze_hold.clone(),
            window: WindowConfig::default(),
        },
        StdRng::seed_from_u64(3),
    ));

    Harness {
        ctx,
        blend,
        mood,
        gaze_hold,
        shell,
        trigger,
        signal,
        tasks,
    }
}

// ── Client helpers ──────────────────────────────────────────

pub async fn next_frame(client: &mut WsClient) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed");
    serde_json::from_str(message.to_str().expect("text frame")).expect("valid json")
}

/// Next frame that answers a request, skipping broadcasts.
pub async fn next_reply(client: &mut WsClient) -> Value {
    loop {
        let frame = next_frame(client).await;
        if frame.get("success").is_some() {
            return frame;
        }
    }
}

/// Next broadcast of the given type, skipping everything else.
pub async fn next_broadcast(client: &mut WsClient, kind: &str) -> Value {
    loop {
        let frame = next_frame(client).await;
        if frame.get("success").is_none() && frame["type"] == kind {
            return frame;
        }
    }
}

pub async fn request(client: &mut WsClient, frame: Value) -> Value {
    client.send_text(frame.to_string()).await;
    next_reply(client).await
}
