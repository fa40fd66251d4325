//! Mood Engine: affection score, affection tiers and the discrete mood state machine.
//!
//! Affection rises with interaction and decays while the user is away.
//! The affection band the score falls in (the tier) decides which moods
//! the character may show; idle moods (lonely, tired, surprised) are
//! reachable from every tier.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

pub const MAX_AFFECTION: u8 = 100;
/// Idle decay never pushes affection below this floor.
pub const DECAY_FLOOR: u8 = 10;
const DECAY_STEP: u8 = 2;
const DECAY_INTERVAL: Duration = Duration::from_secs(5 * 60);
const LONELY_AFTER: Duration = Duration::from_secs(30 * 60);
const TIRED_AFTER: Duration = Duration::from_secs(60 * 60);

// ── Moods ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Normal,
    Happy,
    Tired,
    Lonely,
    Excited,
    Surprised,
    Angry,
    Blush,
    Daze,
    StarEye,
    CatPaw,
    Heart,
    CatMouth,
    QStyle,
}

impl Mood {
    pub const ALL: [Mood; 14] = [
        Mood::Normal,
        Mood::Happy,
        Mood::Tired,
        Mood::Lonely,
        Mood::Excited,
        Mood::Surprised,
        Mood::Angry,
        Mood::Blush,
        Mood::Daze,
        Mood::StarEye,
        Mood::CatPaw,
        Mood::Heart,
        Mood::CatMouth,
        Mood::QStyle,
    ];

    /// Moods reachable from every tier, driven by idleness or events.
    pub const AMBIENT: [Mood; 3] = [Mood::Lonely, Mood::Tired, Mood::Surprised];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Normal => "normal",
            Mood::Happy => "happy",
            Mood::Tired => "tired",
            Mood::Lonely => "lonely",
            Mood::Excited => "excited",
            Mood::Surprised => "surprised",
            Mood::Angry => "angry",
            Mood::Blush => "blush",
            Mood::Daze => "daze",
            Mood::StarEye => "star_eye",
            Mood::CatPaw => "cat_paw",
            Mood::Heart => "heart",
            Mood::CatMouth => "cat_mouth",
            Mood::QStyle => "q_style",
        }
    }

    pub fn from_name(name: &str) -> Option<Mood> {
        let lower = name.trim().to_lowercase();
        Mood::ALL.into_iter().find(|m| m.as_str() == lower)
    }

    /// Model expression shown while in this mood.
    pub fn expression(&self) -> &'static str {
        match self {
            Mood::Tired => "sleepy",
            Mood::Lonely => "sad",
            Mood::Excited => "love",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Affection Tiers ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Tsundere,
    Shy,
    Cheerful,
    Adoring,
}

/// One half-open affection band `[min, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AffectionTier {
    pub level: TierLevel,
    pub min: u8,
    pub max: u8,
    pub label: &'static str,
    pub moods: &'static [Mood],
    /// Mood the character settles into when nothing else applies.
    pub resting: Mood,
    /// Mood a friendly interaction pushes toward.
    pub warm: Mood,
}

impl AffectionTier {
    pub fn contains(&self, affection: u8) -> bool {
        self.min <= affection && affection < self.max
    }

    pub fn width(&self) -> u8 {
        self.max - self.min
    }

    pub fn unlocks(&self, mood: Mood) -> bool {
        self.moods.contains(&mood) || Mood::AMBIENT.contains(&mood)
    }
}

pub static AFFECTION_TIERS: [AffectionTier; 4] = [
    AffectionTier {
        level: TierLevel::Tsundere,
        min: 0,
        max: 30,
        label: "tsundere",
        moods: &[Mood::Angry, Mood::Normal],
        resting: Mood::Normal,
        warm: Mood::Normal,
    },
    AffectionTier {
        level: TierLevel::Shy,
        min: 30,
        max: 60,
        label: "shy",
        moods: &[Mood::Blush, Mood::Daze, Mood::Normal],
        resting: Mood::Normal,
        warm: Mood::Blush,
    },
    AffectionTier {
        level: TierLevel::Cheerful,
        min: 60,
        max: 80,
        label: "cheerful",
        moods: &[Mood::Happy, Mood::StarEye, Mood::CatPaw],
        resting: Mood::Happy,
        warm: Mood::Happy,
    },
    AffectionTier {
        level: TierLevel::Adoring,
        min: 80,
        max: 101,
        label: "adoring",
        moods: &[Mood::Excited, Mood::Heart, Mood::CatMouth, Mood::QStyle],
        resting: Mood::Excited,
        warm: Mood::Excited,
    },
];

/// Tier whose band contains `affection`. Scores above 100 land in the top band.
pub fn tier_for(affection: u8) -> &'static AffectionTier {
    let affection = affection.min(MAX_AFFECTION);
    AFFECTION_TIERS
        .iter()
        .find(|t| t.contains(affection))
        .unwrap_or(&AFFECTION_TIERS[0])
}

// ── Interaction ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    Tap,
    Chat,
    Other(String),
}

impl InteractionKind {
    pub fn parse(action: &str) -> Self {
        match action.trim().to_lowercase().as_str() {
            "tap" | "click" | "touch" | "pat" => InteractionKind::Tap,
            "chat" | "talk" | "message" => InteractionKind::Chat,
            other => InteractionKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MoodError {
    #[error("unknown mood '{0}'")]
    UnknownMood(String),
    #[error("mood '{mood}' is locked at the {tier} tier")]
    Locked { mood: Mood, tier: &'static str },
    #[error("mood engine is not running")]
    Stopped,
}

/// Serializable view of the engine, handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodSnapshot {
    pub mood: Mood,
    pub expression: &'static str,
    pub affection: u8,
    pub tier: TierLevel,
    pub tier_label: &'static str,
    pub unlocked_moods: Vec<Mood>,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodChange {
    pub affection_before: u8,
    pub affection_after: u8,
    pub mood_before: Mood,
    pub mood_after: Mood,
}

impl MoodChange {
    pub fn mood_changed(&self) -> bool {
        self.mood_before != self.mood_after
    }

    pub fn affection_changed(&self) -> bool {
        self.affection_before != self.affection_after
    }

    pub fn tier_changed(&self) -> bool {
        tier_for(self.affection_before).level != tier_for(self.affection_after).level
    }
}

// ── Engine ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MoodEngine {
    affection: u8,
    mood: Mood,
    last_interaction: Instant,
    /// Affection at the last interaction; idle decay is measured from here.
    decay_base: u8,
    tap_increment: u8,
}

impl MoodEngine {
    pub fn new(initial_affection: u8, tap_increment: u8, now: Instant) -> Self {
        let affection = initial_affection.min(MAX_AFFECTION);
        Self {
            affection,
            mood: tier_for(affection).resting,
            last_interaction: now,
            decay_base: affection,
            tap_increment,
        }
    }

    pub fn affection(&self) -> u8 {
        self.affection
    }

    pub fn mood(&self) -> Mood {
        self.mood
    }

    pub fn tier(&self) -> &'static AffectionTier {
        tier_for(self.affection)
    }

    pub fn current_expression(&self) -> &'static str {
        self.mood.expression()
    }

    pub fn unlocked_moods(&self) -> &'static [Mood] {
        self.tier().moods
    }

    pub fn random_unlocked_mood<R: Rng + ?Sized>(&self, rng: &mut R) -> Mood {
        let tier = self.tier();
        tier.moods.choose(rng).copied().unwrap_or(tier.resting)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_interaction)
    }

    fn change_from(&self, affection_before: u8, mood_before: Mood) -> MoodChange {
        MoodChange {
            affection_before,
            affection_after: self.affection,
            mood_before,
            mood_after: self.mood,
        }
    }

    fn transition(&mut self, mood: Mood) -> bool {
        if mood == self.mood {
            return false;
        }
        tracing::info!(from = %self.mood, to = %mood, "mood changed");
        self.mood = mood;
        true
    }

    /// Keep the current mood inside what the tier unlocks.
    fn reproject(&mut self) {
        let tier = self.tier();
        if !tier.unlocks(self.mood) {
            self.transition(tier.resting);
        }
    }

    fn raise_affection(&mut self) {
        let before = self.affection;
        self.affection = self
            .affection
            .saturating_add(self.tap_increment)
            .min(MAX_AFFECTION);
        if before != self.affection {
            tracing::info!(from = before, to = self.affection, "affection rose");
        }
    }

    /// Register a user interaction at `now`.
    pub fn record_interaction<R: Rng + ?Sized>(
        &mut self,
        kind: &InteractionKind,
        now: Instant,
        rng: &mut R,
    ) -> MoodChange {
        let (affection_before, mood_before) = (self.affection, self.mood);
        self.last_interaction = now;

        match kind {
            InteractionKind::Tap => {
                self.raise_affection();
                let tier = self.tier();
                let roll: f32 = rng.gen();
                if tier.level == TierLevel::Adoring && self.affection > 80 && roll < 0.5 {
                    self.transition(Mood::Excited);
                } else if roll < 0.7 {
                    self.transition(tier.warm);
                }
            }
            InteractionKind::Chat => {
                self.raise_affection();
                let warm = self.tier().warm;
                self.transition(warm);
            }
            InteractionKind::Other(_) => {}
        }

        self.reproject();
        self.decay_base = self.affection;
        self.change_from(affection_before, mood_before)
    }

    /// Periodic update: idle decay then idle-driven mood transitions.
    pub fn tick(&mut self, now: Instant) -> MoodChange {
        let (affection_before, mood_before) = (self.affection, self.mood);
        let idle = self.idle_for(now);

        let intervals = (idle.as_secs() / DECAY_INTERVAL.as_secs()) as u32;
        if intervals > 0 {
            let decay = (intervals.saturating_mul(DECAY_STEP as u32)).min(u8::MAX as u32) as u8;
            let decayed = self.decay_base.saturating_sub(decay).max(DECAY_FLOOR);
            if decayed < self.affection {
                tracing::info!(
                    from = self.affection,
                    to = decayed,
                    idle_secs = idle.as_secs(),
                    "affection decayed while idle"
                );
                self.affection = decayed;
            }
        }

        // The longer idle threshold takes precedence.
        if idle > TIRED_AFTER {
            self.transition(Mood::Tired);
        } else if idle > LONELY_AFTER {
            self.transition(Mood::Lonely);
        }

        self.reproject();
        self.change_from(affection_before, mood_before)
    }

    /// Explicit mood request. Unknown or tier-locked moods leave state unchanged.
    pub fn set_mood(&mut self, mood: Mood) -> Result<bool, MoodError> {
        let tier = self.tier();
        if !tier.unlocks(mood) {
            return Err(MoodError::Locked {
                mood,
                tier: tier.label,
            });
        }
        Ok(self.transition(mood))
    }

    pub fn set_mood_by_name(&mut self, name: &str) -> Result<bool, MoodError> {
        let mood = Mood::from_name(name).ok_or_else(|| MoodError::UnknownMood(name.to_string()))?;
        self.set_mood(mood)
    }

    pub fn snapshot(&self, now: Instant) -> MoodSnapshot {
        let tier = self.tier();
        MoodSnapshot {
            mood: self.mood,
            expression: self.current_expression(),
            affection: self.affection,
            tier: tier.level,
            tier_label: tier.label,
            unlocked_moods: tier.moods.to_vec(),
            idle_secs: self.idle_for(now).as_secs(),
        }
    }
}
