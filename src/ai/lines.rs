//! Line Book: spoken flavour lines, looked up by category.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCategory {
    GreetingMorning,
    GreetingNight,
    IdleHappy,
    IdleLonely,
    Tired,
    RemindWater,
    AffectionLow,
    AffectionHigh,
}

const FALLBACK_LINE: &str = "Meow~";

/// Lookup interface for dialogue lines. The engine never cares where they live.
pub trait LineBook: Send + Sync {
    fn lines(&self, category: LineCategory) -> &[String];

    fn pick(&self, category: LineCategory, rng: &mut dyn rand::RngCore) -> String {
        self.lines(category)
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| FALLBACK_LINE.to_string())
    }
}

/// Category for a time-of-day greeting.
pub fn greeting_category(hour: u32) -> LineCategory {
    match hour {
        5..=10 => LineCategory::GreetingMorning,
        22..=23 | 0..=4 => LineCategory::GreetingNight,
        _ => LineCategory::IdleHappy,
    }
}

pub fn greeting(book: &dyn LineBook, hour: u32, rng: &mut dyn rand::RngCore) -> String {
    book.pick(greeting_category(hour), rng)
}

/// Line matching the current mood for unprompted chatter.
pub fn mood_line<R: Rng>(
    book: &dyn LineBook,
    mood: crate::ai::mood::Mood,
    hour: u32,
    rng: &mut R,
) -> String {
    use crate::ai::mood::Mood;
    match mood {
        Mood::Happy | Mood::Excited | Mood::StarEye | Mood::Heart => {
            book.pick(LineCategory::IdleHappy, rng)
        }
        Mood::Lonely => book.pick(LineCategory::IdleLonely, rng),
        Mood::Tired => book.pick(LineCategory::Tired, rng),
        _ => greeting(book, hour, rng),
    }
}

/// Built-in lines, overridable per category from config.
#[derive(Debug, Clone)]
pub struct BuiltinLines {
    table: HashMap<LineCategory, Vec<String>>,
}

impl Default for BuiltinLines {
    fn default() -> Self {
        let raw: [(LineCategory, &[&str]); 8] = [
            (
                LineCategory::GreetingMorning,
                &[
                    "Good morning! Let's make today a great one, meow!",
                    "You're up! I've been waiting for you~",
                    "Morning... I dreamt about you last night.",
                ],
            ),
            (
                LineCategory::GreetingNight,
                &[
                    "Still awake? I'll keep you company~",
                    "It's late. Want me to stay up with you?",
                    "Good night. I hope I show up in your dreams~",
                ],
            ),
            (
                LineCategory::IdleHappy,
                &[
                    "Being next to you makes me so happy~",
                    "Look at me! Aren't I the cutest?",
                    "I like you the most! Meow~",
                ],
            ),
            (
                LineCategory::IdleLonely,
                &[
                    "You haven't talked to me in ages... so lonely...",
                    "I want head pats... even a tap on the screen is fine...",
                    "Busy? I'll wait for you, I promise.",
                ],
            ),
            (
                LineCategory::Tired,
                &["I'm getting sleepy... can I nap in the corner of your desktop?"],
            ),
            (
                LineCategory::RemindWater,
                &[
                    "Time for some water and a short break!",
                    "You've been staring at the screen too long. Look far away for a bit!",
                ],
            ),
            (
                LineCategory::AffectionLow,
                &[
                    "Hmph... you keep ignoring me...",
                    "I'm mad at you, you know.",
                    "Keep this up and I'll turn to the dark side...",
                ],
            ),
            (
                LineCategory::AffectionHigh,
                &[
                    "I like you more than anyone!",
                    "I want to stay with you forever~",
                    "Pat me, pat me~",
                ],
            ),
        ];
        let table = raw
            .into_iter()
            .map(|(cat, lines)| (cat, lines.iter().map(|s| s.to_string()).collect()))
            .collect();
        Self { table }
    }
}

impl BuiltinLines {
    pub fn with_overrides(overrides: HashMap<LineCategory, Vec<String>>) -> Self {
        let mut book = Self::default();
        for (category, lines) in overrides {
            if !lines.is_empty() {
                book.table.insert(category, lines);
            }
        }
        book
    }
}

impl LineBook for BuiltinLines {
    fn lines(&self, category: LineCategory) -> &[String] {
        self.table.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }
}
