//! Heartbeat: background loop for autonomous character behavior.
//!
//! Ticks the mood engine every few seconds and pushes the resting
//! expression on every tick. Also reports affection, occasionally shows an
//! unlocked expression with an idle line, and reminds the user to drink water.

use super::lines::{greeting, mood_line, LineBook, LineCategory};
use super::mood::TierLevel;
use super::mood_actor::MoodHandle;
use crate::utils::shutdown::ShutdownSignal;
use chrono::Timelike;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Mood and autonomous-behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    pub initial_affection: u8,
    pub tick_secs: u64,
    pub tap_increment: u8,
    pub report_every_secs: u64,
    /// Chance per tick of saying something unprompted.
    pub idle_speech_chance: f64,
    pub water_reminder_secs: u64,
    pub greet_on_start: bool,
}

impl Default for MoodConfig {
    fn default() -> Self {
        Self {
            initial_affection: 30,
            tick_secs: 10,
            tap_increment: 5,
            report_every_secs: 60,
            idle_speech_chance: 0.15,
            water_reminder_secs: 45 * 60,
            greet_on_start: true,
        }
    }
}

/// Where autonomous behavior goes. Both calls are fire-and-forget so a slow
/// sink or speech provider never stalls the heartbeat.
pub trait Presenter: Send + Sync {
    fn show_expression(&self, name: &str);
    fn say(&self, text: &str);
}

fn local_hour() -> u32 {
    chrono::Local::now().hour()
}

async fn greet(
    presenter: &dyn Presenter,
    lines: &dyn LineBook,
    mood: &MoodHandle,
    rng: &mut StdRng,
    shutdown: &mut ShutdownSignal,
) {
    presenter.show_expression("happy");
    presenter.say(&greeting(lines, local_hour(), rng));
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        _ = shutdown.wait() => return,
    }
    presenter.show_expression(mood.snapshot().expression);
}

/// Main heartbeat loop. Spawned once per session.
pub async fn heartbeat_loop(
    config: MoodConfig,
    mood: MoodHandle,
    lines: Arc<dyn LineBook>,
    presenter: Arc<dyn Presenter>,
    mut rng: StdRng,
    mut shutdown: ShutdownSignal,
) {
    if config.greet_on_start {
        greet(
            presenter.as_ref(),
            lines.as_ref(),
            &mood,
            &mut rng,
            &mut shutdown,
        )
        .await;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(config.tick_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately.
    interval.tick().await;

    let report_every = Duration::from_secs(config.report_every_secs.max(1));
    let water_every = Duration::from_secs(config.water_reminder_secs.max(1));
    let mut last_report = Instant::now();
    let mut last_water = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.wait() => break,
        }

        // ── Mood tick ──
        let (change, snapshot) = match mood.tick().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "mood tick failed, stopping heartbeat");
                break;
            }
        };
        // Pushed every tick so a push lost while the sink was away gets repaired.
        presenter.show_expression(snapshot.expression);
        if change.tier_changed() {
            tracing::info!(
                from = change.affection_before,
                to = change.affection_after,
                tier = snapshot.tier_label,
                "affection tier changed"
            );
        }
        tracing::trace!(
            affection = snapshot.affection,
            mood = %snapshot.mood,
            idle_secs = snapshot.idle_secs,
            "heartbeat"
        );

        // ── Affection report ──
        if last_report.elapsed() >= report_every {
            last_report = Instant::now();
            tracing::info!(
                affection = snapshot.affection,
                tier = snapshot.tier_label,
                mood = %snapshot.mood,
                "affection report"
            );
            match snapshot.tier {
                TierLevel::Tsundere => {
                    presenter.say(&lines.pick(LineCategory::AffectionLow, &mut rng))
                }
                TierLevel::Adoring if snapshot.affection > 80 => {
                    presenter.say(&lines.pick(LineCategory::AffectionHigh, &mut rng))
                }
                _ => {}
            }
        }

        // ── Idle chatter ──
        if rng.gen_bool(config.idle_speech_chance.clamp(0.0, 1.0)) {
            match mood.random_unlocked_mood().await {
                Ok(flourish) => presenter.show_expression(flourish.expression()),
                Err(e) => tracing::debug!(error = %e, "no idle flourish"),
            }
            presenter.say(&mood_line(
                lines.as_ref(),
                snapshot.mood,
                local_hour(),
                &mut rng,
            ));
        }

        // ── Water reminder ──
        if last_water.elapsed() >= water_every {
            last_water = Instant::now();
            presenter.show_expression("surprised");
            presenter.say(&lines.pick(LineCategory::RemindWater, &mut rng));
        }
    }
    tracing::debug!("heartbeat stopped");
}
