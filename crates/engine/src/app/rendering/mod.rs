mod prerender;
mod renderer;
mod surface;

pub use prerender::{prerender, PrerenderReport};
pub use renderer::{Effect, EffectContext, Fade, Rumble, StageRenderer};
pub use surface::{DestRect, DrawingSurface, RasterSurface, SourceRect, Transform};
