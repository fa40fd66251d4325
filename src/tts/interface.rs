use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ── Error Types ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TtsError {
    #[error("TTS provider not found: {0}")]
    ProviderNotFound(String),
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("TTS unavailable: {0}")]
    Unavailable(String),
    #[error("TTS config error: {0}")]
    ConfigError(String),
    #[error("Playback failed: {0}")]
    Playback(String),
    /// A newer utterance took over before this one finished.
    #[error("utterance superseded")]
    Superseded,
}

// ── Synthesis Parameters ───────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsParams {
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

// ── Provider Trait ──────────────────────────────────────

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Unique identifier for this provider (e.g. "openai").
    fn id(&self) -> String;

    /// Check if the provider is currently reachable / operational.
    async fn is_available(&self) -> bool;

    /// Synthesize text to WAV bytes.
    async fn synthesize(&self, text: &str, params: &TtsParams) -> Result<Vec<u8>, TtsError>;
}
