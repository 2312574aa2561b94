pub mod app;
pub mod content;
pub mod stage;

pub use app::{
    prerender, Clock, DrawingSurface, Effect, Fade, FrameContext, FrameScheduler, FrameToken,
    LoopConfig, LoopError, LoopState, LoopStyle, ManualClock, PrerenderReport, RasterSurface,
    RenderLoop, Rumble, StageRenderer, SystemClock,
};
pub use content::{
    load_stage_file, parse_stage_str, AssetError, AssetProvider, ContentError, ImageAssets,
    StageData,
};
pub use stage::{
    InstanceId, PathError, Projection, Range, Stage, StageConfig, StageError, Synchronizer,
    TileCoord, Vector3, View,
};
