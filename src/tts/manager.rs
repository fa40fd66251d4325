use super::config::{ProviderConfig, ProviderKind, TtsSystemConfig};
use super::interface::{SpeechProvider, TtsError, TtsParams};
use super::lipsync::AmplitudeEnvelopeExtractor;
use super::openai::OpenAITtsProvider;
use super::playback::{play_utterance, AudioOutput, LipSyncTarget, PlaybackOutcome};

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

// ── Utterance Report ───────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpeechReport {
    pub text: String,
    pub provider: String,
    pub duration_ms: u64,
    /// Number of lip-sync frames played (0 when no envelope was available).
    pub frames: usize,
    pub interrupted: bool,
}

// ── SpeechService ──────────────────────────────────────

/// Routes speech to a provider and plays it with lip sync, one utterance at
/// a time. A newer utterance interrupts the one currently playing.
#[derive(Clone)]
pub struct SpeechService {
    providers: Arc<RwLock<HashMap<String, Arc<dyn SpeechProvider>>>>,
    default_provider: Arc<RwLock<Option<String>>>,
    default_speed: Option<f32>,
    extractor: Arc<AmplitudeEnvelopeExtractor>,
    output: Arc<dyn AudioOutput>,
    lip_sync: Arc<dyn LipSyncTarget>,
    /// Bumped by each new utterance; playing utterances watch it to notice supersession.
    generation: Arc<watch::Sender<u64>>,
    playback: Arc<Mutex<()>>,
    speaking: Arc<AtomicBool>,
}

impl SpeechService {
    pub fn new(
        extractor: AmplitudeEnvelopeExtractor,
        output: Arc<dyn AudioOutput>,
        lip_sync: Arc<dyn LipSyncTarget>,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            default_provider: Arc::new(RwLock::new(None)),
            default_speed: None,
            extractor: Arc::new(extractor),
            output,
            lip_sync,
            generation: Arc::new(generation),
            playback: Arc::new(Mutex::new(())),
            speaking: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Build the service and register every enabled provider from config.
    pub async fn init_from_config(
        config: &TtsSystemConfig,
        extractor: AmplitudeEnvelopeExtractor,
        output: Arc<dyn AudioOutput>,
        lip_sync: Arc<dyn LipSyncTarget>,
    ) -> Self {
        let mut service = Self::new(extractor, output, lip_sync);
        service.default_speed = config.default_speed;
        *service.default_provider.write().await = config.default_provider.clone();

        for provider_config in &config.providers {
            if !provider_config.enabled {
                tracing::info!(provider = %provider_config.id, "skipping disabled speech provider");
                continue;
            }
            match Self::build_provider(provider_config) {
                Some(provider) => {
                    tracing::info!(provider = %provider_config.id, "registering speech provider");
                    service.register_provider(provider).await;
                }
                None => {
                    tracing::warn!(
                        provider = %provider_config.id,
                        kind = ?provider_config.kind,
                        "failed to build speech provider, check config and API keys"
                    );
                }
            }
        }
        service
    }

    fn build_provider(config: &ProviderConfig) -> Option<Arc<dyn SpeechProvider>> {
        match config.kind {
            ProviderKind::Openai => OpenAITtsProvider::from_config(config)
                .map(|p| Arc::new(p) as Arc<dyn SpeechProvider>),
            ProviderKind::Unsupported => {
                tracing::warn!(provider = %config.id, "unsupported speech provider type");
                None
            }
        }
    }

    /// Register a provider. The first one becomes the default if none is configured.
    pub async fn register_provider(&self, provider: Arc<dyn SpeechProvider>) {
        let id = provider.id();
        {
            let mut default = self.default_provider.write().await;
            if default.is_none() {
                *default = Some(id.clone());
            }
        }
        self.providers.write().await.insert(id, provider);
    }

    pub async fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    async fn route(&self, requested: Option<&str>) -> Result<Arc<dyn SpeechProvider>, TtsError> {
        let providers = self.providers.read().await;
        if let Some(id) = requested.filter(|id| !id.is_empty()) {
            return providers
                .get(id)
                .cloned()
                .ok_or_else(|| TtsError::ProviderNotFound(id.to_string()));
        }
        let default = self.default_provider.read().await.clone();
        default
            .and_then(|id| providers.get(&id).cloned())
            .or_else(|| providers.values().next().cloned())
            .ok_or_else(|| TtsError::Unavailable("no speech provider configured".into()))
    }

    /// Interrupt whatever is playing. The mouth closes on the next clock step.
    pub fn stop(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Synthesize `text` and play it, driving lip sync. Waits for playback to end.
    pub async fn speak(
        &self,
        text: &str,
        provider_id: Option<&str>,
        mut params: TtsParams,
    ) -> Result<SpeechReport, TtsError> {
        if params.speed.is_none() {
            params.speed = self.default_speed;
        }
        let provider = self.route(provider_id).await?;
        if !provider.is_available().await {
            return Err(TtsError::Unavailable(format!(
                "provider '{}' is not ready",
                provider.id()
            )));
        }

        let audio = provider.synthesize(text, &params).await?;
        let frames = self.extractor.openness_frames(&audio);
        if frames.is_empty() {
            tracing::debug!(provider = %provider.id(), "no lip-sync data for utterance");
        }

        // Take over from the current utterance, then wait for it to wind down.
        self.stop();
        let mut generation = self.generation.subscribe();
        let my_generation = *generation.borrow_and_update();
        let _playing = self.playback.lock().await;
        if *generation.borrow() != my_generation {
            // An even newer utterance arrived while we waited.
            return Ok(SpeechReport {
                text: text.to_string(),
                provider: provider.id(),
                duration_ms: 0,
                frames: 0,
                interrupted: true,
            });
        }

        self.speaking.store(true, Ordering::SeqCst);
        let started = tokio::time::Instant::now();
        let superseded = async move {
            let _ = generation.changed().await;
        };
        let outcome = play_utterance(
            self.output.as_ref(),
            &audio,
            &frames,
            self.lip_sync.as_ref(),
            superseded,
        )
        .await;
        self.speaking.store(false, Ordering::SeqCst);

        let report = SpeechReport {
            text: text.to_string(),
            provider: provider.id(),
            duration_ms: started.elapsed().as_millis() as u64,
            frames: frames.len(),
            interrupted: outcome == PlaybackOutcome::Interrupted,
        };
        match outcome {
            PlaybackOutcome::Failed(e) => Err(e),
            _ => {
                tracing::info!(
                    provider = %report.provider,
                    duration_ms = report.duration_ms,
                    interrupted = report.interrupted,
                    "utterance finished"
                );
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::lipsync::LipSyncConfig;
    use crate::tts::playback::ClockedOutput;
    use async_trait::async_trait;
    use std::io::Cursor;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Mouth {
        values: StdMutex<Vec<f32>>,
    }

    impl LipSyncTarget for Mouth {
        fn frame(&self, openness: f32) {
            self.values.lock().unwrap().push(openness);
        }
    }

    struct ToneProvider {
        id: &'static str,
        amplitude: i16,
        seconds: u32,
    }

    fn tone(amplitude: i16, seconds: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(8_000 * seconds) {
                let s = if i % 2 == 0 { amplitude } else { -amplitude };
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[async_trait]
    impl SpeechProvider for ToneProvider {
        fn id(&self) -> String {
            self.id.to_string()
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn synthesize(&self, _text: &str, _params: &TtsParams) -> Result<Vec<u8>, TtsError> {
            Ok(tone(self.amplitude, self.seconds))
        }
    }

    async fn service_with(provider: ToneProvider) -> (SpeechService, Arc<Mouth>) {
        let mouth = Arc::new(Mouth::default());
        let service = SpeechService::new(
            AmplitudeEnvelopeExtractor::new(LipSyncConfig::default()),
            Arc::new(ClockedOutput),
            mouth.clone(),
        );
        service.register_provider(Arc::new(provider)).await;
        (service, mouth)
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_utterance_never_opens_the_mouth() {
        let (service, mouth) = service_with(ToneProvider {
            id: "tone",
            amplitude: 400,
            seconds: 2,
        })
        .await;
        let report = service
            .speak("shh", None, TtsParams::default())
            .await
            .unwrap();
        assert_eq!(report.frames, 60);
        assert!(!report.interrupted);
        let values = mouth.values.lock().unwrap().clone();
        assert!(!values.is_empty());
        assert!(values.iter().all(|v| *v == 0.0));
        assert!(!service.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_provider_is_reported() {
        let (service, _) = service_with(ToneProvider {
            id: "tone",
            amplitude: 400,
            seconds: 1,
        })
        .await;
        let err = service
            .speak("hi", Some("elevenlabs"), TtsParams::default())
            .await
            .unwrap_err();
        assert_eq!(err, TtsError::ProviderNotFound("elevenlabs".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn no_providers_means_unavailable() {
        let service = SpeechService::new(
            AmplitudeEnvelopeExtractor::new(LipSyncConfig::default()),
            Arc::new(ClockedOutput),
            Arc::new(Mouth::default()),
        );
        let err = service
            .speak("hi", None, TtsParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_utterance_supersedes_the_current_one() {
        let (service, mouth) = service_with(ToneProvider {
            id: "tone",
            amplitude: 20_000,
            seconds: 3,
        })
        .await;

        let first = {
            let service = service.clone();
            tokio::spawn(async move { service.speak("one", None, TtsParams::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(service.is_speaking());
        let second = service
            .speak("two", None, TtsParams::default())
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert!(first.interrupted);
        assert!(!second.interrupted);
        let closes = mouth
            .values
            .lock()
            .unwrap()
            .iter()
            .filter(|v| **v == 0.0)
            .count();
        assert_eq!(closes, 2, "each utterance closes the mouth exactly once");
    }

    #[tokio::test]
    async fn config_registers_only_buildable_enabled_providers() {
        let config: TtsSystemConfig = serde_json::from_str(
            r#"{
                "default_provider": "cloud",
                "providers": [
                    {"id": "cloud", "type": "openai", "api_key": "sk-1"},
                    {"id": "off", "type": "openai", "api_key": "sk-2", "enabled": false},
                    {"id": "keyless", "type": "openai"},
                    {"id": "local", "type": "piper"}
                ]
            }"#,
        )
        .unwrap();
        let service = SpeechService::init_from_config(
            &config,
            AmplitudeEnvelopeExtractor::new(LipSyncConfig::default()),
            Arc::new(ClockedOutput),
            Arc::new(Mouth::default()),
        )
        .await;
        assert_eq!(service.provider_ids().await, vec!["cloud".to_string()]);
        assert_eq!(service.route(None).await.unwrap().id(), "cloud");
    }
}
