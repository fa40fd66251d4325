pub mod blender;
pub mod pointer;
pub mod runtime;

pub use blender::{
    canonical_id, BlendError, ParameterBlender, ParameterVector, SmoothingChannel, SmoothingScope,
    PARAM_ANGLE_X, PARAM_ANGLE_Y, PARAM_EYE_BALL_X, PARAM_EYE_BALL_Y, PARAM_MOUTH_OPEN_Y,
};
pub use pointer::{
    apply_dead_zone, pointer_follow_loop, GazeHold, GazeTargets, ManualPointer, NoPointer, PointerConfig,
    PointerError, PointerFollowEngine, PointerSample, PointerSource, ScreenBounds,
};
pub use runtime::{spawn_blend_loop, BlendConfig, BlendFrame, BlendHandle, FrameOutput};
