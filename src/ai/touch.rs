//! Touch Reactions: maps a touched body region to expression, motion and a spoken line.
//!
//! Expression choice is gated by the affection tier: a tsundere character
//! pouts, a shy one blushes, an adoring one throws hearts when you hold
//! her hand.

use super::mood::{Mood, MoodSnapshot, TierLevel};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchRegion {
    Head,
    Cheek,
    EarLeft,
    EarRight,
    Body,
    HandLeft,
    HandRight,
    Tail,
}

impl TouchRegion {
    /// Resolve a region tag. Accepts the English tags and the hit-area names
    /// the character model ships with. Anything else is treated as the body.
    pub fn parse(part: &str) -> TouchRegion {
        match part.trim().to_lowercase().as_str() {
            "head" | "头顶" => TouchRegion::Head,
            "cheek" | "face" | "脸颊" => TouchRegion::Cheek,
            "ear_left" | "ear-left" | "left_ear" | "左耳" => TouchRegion::EarLeft,
            "ear_right" | "ear-right" | "right_ear" | "右耳" => TouchRegion::EarRight,
            "hand_left" | "hand-left" | "left_hand" | "左手" => TouchRegion::HandLeft,
            "hand_right" | "hand-right" | "right_hand" | "右手" => TouchRegion::HandRight,
            "tail" | "尾巴" => TouchRegion::Tail,
            _ => TouchRegion::Body,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TouchRegion::Head => "head",
            TouchRegion::Cheek => "cheek",
            TouchRegion::EarLeft => "ear_left",
            TouchRegion::EarRight => "ear_right",
            TouchRegion::Body => "body",
            TouchRegion::HandLeft => "hand_left",
            TouchRegion::HandRight => "hand_right",
            TouchRegion::Tail => "tail",
        }
    }

    pub fn is_hand(&self) -> bool {
        matches!(self, TouchRegion::HandLeft | TouchRegion::HandRight)
    }

    /// Regions where a shy character always blushes.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, TouchRegion::Cheek | TouchRegion::Body)
    }
}

/// Canned motion and lines for one region.
#[derive(Debug, Clone)]
pub struct RegionReaction {
    pub motion: &'static str,
    pub lines: &'static [&'static str],
}

pub fn region_reaction(region: TouchRegion) -> RegionReaction {
    match region {
        TouchRegion::Head => RegionReaction {
            motion: "Tap",
            lines: &[
                "Head pats... so happy...",
                "Your hand is so gentle, I'm melting~",
                "Meow~ your pats are the best!",
                "Pat pat on the head, that feels nice~",
            ],
        },
        TouchRegion::Cheek => RegionReaction {
            motion: "Tap",
            lines: &[
                "D-don't squish my cheeks...",
                "You pinched my cheek, so embarrassing...",
                "Hey! Honestly...",
                "I'll get chubby cheeks, you know...",
            ],
        },
        TouchRegion::EarLeft => RegionReaction {
            motion: "Tap",
            lines: &[
                "Ears are sensitive...",
                "Meow~ ear rubs feel so good...",
                "You stroked my left ear~",
            ],
        },
        TouchRegion::EarRight => RegionReaction {
            motion: "Tap",
            lines: &[
                "Ears are sensitive...",
                "Meow~ ear rubs feel so good...",
                "You stroked my right ear~",
            ],
        },
        TouchRegion::Body => RegionReaction {
            motion: "Idle",
            lines: &[
                "Eek! That tickles...",
                "Honestly... touching me there...",
                "You're hugging me...",
                "Your arms are so warm...",
            ],
        },
        TouchRegion::HandLeft => RegionReaction {
            motion: "Tap",
            lines: &[
                "You're holding my hand...",
                "Hand in hand~ so happy~",
                "Your big warm hand is holding mine...",
            ],
        },
        TouchRegion::HandRight => RegionReaction {
            motion: "Idle",
            lines: &[
                "You're holding my hand...",
                "Hand in hand~ so happy~",
                "You caught my paw~",
            ],
        },
        TouchRegion::Tail => RegionReaction {
            motion: "Idle",
            lines: &[
                "You grabbed my tail!",
                "Meow~ don't pull my tail...",
                "My tail is sensitive...",
            ],
        },
    }
}

/// Bonus lines available only in some moods.
fn mood_bonus_lines(mood: Mood) -> &'static [&'static str] {
    match mood {
        Mood::Excited => &["My heart is racing...", "Being touched by you feels amazing..."],
        Mood::Happy => &["I love it when you pat me...", "More, please..."],
        _ => &[],
    }
}

/// Tier-dependent expression rule table.
pub fn choose_expression<R: Rng + ?Sized>(
    tier: TierLevel,
    region: TouchRegion,
    rng: &mut R,
) -> &'static str {
    let pool: &[&'static str] = match tier {
        TierLevel::Tsundere => &["angry", "normal"],
        TierLevel::Shy if region.is_sensitive() => &["blush"],
        TierLevel::Shy => &["daze", "blush"],
        TierLevel::Cheerful => &["happy", "star_eye", "cat_paw"],
        TierLevel::Adoring if region.is_hand() => &["heart"],
        TierLevel::Adoring => &["love", "cat_mouth", "q_style"],
    };
    pool.choose(rng).copied().unwrap_or("normal")
}

/// Everything one touch produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TouchReaction {
    pub region: TouchRegion,
    pub expression: String,
    pub motion: String,
    pub line: String,
    /// Expression to return to once `revert_after` has elapsed.
    pub resting_expression: String,
    #[serde(skip)]
    pub revert_after: Duration,
}

#[derive(Debug, Clone)]
pub struct TouchReactionRouter {
    revert_after: Duration,
}

impl Default for TouchReactionRouter {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl TouchReactionRouter {
    pub fn new(revert_after: Duration) -> Self {
        Self { revert_after }
    }

    /// Build the reaction for `part`, given the mood state *after* the touch
    /// has been recorded.
    pub fn react<R: Rng + ?Sized>(
        &self,
        part: &str,
        mood: &MoodSnapshot,
        rng: &mut R,
    ) -> TouchReaction {
        let region = TouchRegion::parse(part);
        let canned = region_reaction(region);
        let expression = choose_expression(mood.tier, region, rng);

        let candidates: Vec<&str> = canned
            .lines
            .iter()
            .chain(mood_bonus_lines(mood.mood).iter())
            .copied()
            .collect();
        let line = candidates.choose(rng).copied().unwrap_or("...");

        TouchReaction {
            region,
            expression: expression.to_string(),
            motion: canned.motion.to_string(),
            line: line.to_string(),
            resting_expression: mood.expression.to_string(),
            revert_after: self.revert_after,
        }
    }
}
