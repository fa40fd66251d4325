//! Audio output seam and the lip-sync playback clock.

use super::interface::TtsError;
use super::lipsync::AmplitudeFrames;
use async_trait::async_trait;
use std::future::Future;
use std::io::Cursor;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Plays a rendered clip. Returns once playback has finished.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: &[u8]) -> Result<(), TtsError>;
}

/// Receives mouth openness values while an utterance plays.
pub trait LipSyncTarget: Send + Sync {
    fn frame(&self, openness: f32);

    /// Final frame of an utterance. Called at most once per utterance.
    fn close(&self) {
        self.frame(0.0);
    }
}

/// Output for headless sessions: no sound, but it takes as long as the clip
/// would, so lip sync and `speaking` state behave as with a real device.
#[derive(Debug, Default, Clone)]
pub struct ClockedOutput;

pub fn wav_duration(audio: &[u8]) -> Option<Duration> {
    let reader = hound::WavReader::new(Cursor::new(audio)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(
        reader.duration() as f64 / spec.sample_rate as f64,
    ))
}

#[async_trait]
impl AudioOutput for ClockedOutput {
    async fn play(&self, audio: &[u8]) -> Result<(), TtsError> {
        let duration = wav_duration(audio)
            .ok_or_else(|| TtsError::Playback("clip is not playable WAV".into()))?;
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Completed,
    Interrupted,
    Failed(TtsError),
}

/// Emits the closing 0.0 at most once.
struct MouthCloser<'a> {
    target: &'a dyn LipSyncTarget,
    closed: bool,
}

impl MouthCloser<'_> {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.target.close();
        }
    }
}

/// Advance one frame per analysis period. Resolves when frames run out.
async fn run_clock(frames: &AmplitudeFrames, target: &dyn LipSyncTarget) {
    let mut interval = tokio::time::interval(frames.frame_duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    for value in frames.iter() {
        interval.tick().await;
        target.frame(value);
    }
    // Hold the last frame for its full duration.
    interval.tick().await;
}

/// Play `audio` while stepping the mouth through `frames` in lock-step.
///
/// Whatever ends the utterance (audio done, frames exhausted, `cancelled`
/// resolving, playback error), the target receives a final 0.0 exactly once.
/// Empty `frames` means no lip-sync data: audio plays, the mouth is left alone.
pub async fn play_utterance<C>(
    output: &dyn AudioOutput,
    audio: &[u8],
    frames: &AmplitudeFrames,
    target: &dyn LipSyncTarget,
    cancelled: C,
) -> PlaybackOutcome
where
    C: Future<Output = ()>,
{
    let mut closer = MouthCloser {
        target,
        closed: frames.is_empty(),
    };
    let playback = output.play(audio);
    let clock = run_clock(frames, target);
    tokio::pin!(playback, clock, cancelled);

    let mut clock_done = frames.is_empty();
    let outcome = loop {
        tokio::select! {
            result = &mut playback => {
                break match result {
                    Ok(()) => PlaybackOutcome::Completed,
                    Err(e) => PlaybackOutcome::Failed(e),
                };
            }
            _ = &mut clock, if !clock_done => {
                clock_done = true;
                closer.close();
            }
            _ = &mut cancelled => break PlaybackOutcome::Interrupted,
        }
    };
    closer.close();
    outcome
}
