pub mod heartbeat;
pub mod lines;
pub mod mood;
pub mod mood_actor;
pub mod touch;

pub use heartbeat::{heartbeat_loop, MoodConfig, Presenter};
pub use lines::{BuiltinLines, LineBook, LineCategory};
pub use mood::{
    tier_for, AffectionTier, InteractionKind, Mood, MoodChange, MoodEngine, MoodError,
    MoodSnapshot, TierLevel,
};
pub use mood_actor::{spawn_mood_actor, MoodHandle};
pub use touch::{TouchReaction, TouchReactionRouter, TouchRegion};
