pub mod config;
pub mod interface;
pub mod lipsync;
pub mod manager;
pub mod openai;
pub mod playback;

pub use config::{ProviderConfig, ProviderKind, TtsSystemConfig};
pub use interface::{SpeechProvider, TtsError, TtsParams};
pub use lipsync::{AmplitudeEnvelopeExtractor, AmplitudeFrames, LipSyncConfig, LipSyncSmoother};
pub use manager::{SpeechReport, SpeechService};
pub use playback::{play_utterance, AudioOutput, ClockedOutput, LipSyncTarget, PlaybackOutcome};
