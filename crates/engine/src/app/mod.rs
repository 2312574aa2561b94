mod clock;
mod loop_runner;
mod metrics;
mod rendering;

pub use clock::{Clock, ManualClock, SystemClock};
pub use loop_runner::{
    FrameContext, FrameHook, FrameInfo, FrameReport, FrameScheduler, FrameToken, HookError,
    LoopConfig, LoopError, LoopState, LoopStyle, RenderLoop,
};
pub use rendering::{
    prerender, DestRect, DrawingSurface, Effect, EffectContext, Fade, PrerenderReport,
    RasterSurface, Rumble, SourceRect, StageRenderer, Transform,
};
