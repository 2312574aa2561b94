use std::collections::HashSet;

use image::RgbaImage;
use tracing::warn;

use crate::content::AssetProvider;
use crate::stage::{ImageSource, ScreenRect, Stage};

use super::surface::{DestRect, DrawingSurface, SourceRect};

/// What an effect may touch around the element pass.
pub struct EffectContext<'a> {
    pub surface: &'a mut dyn DrawingSurface,
    /// Visible stage rectangle, in the surface's current local coordinates.
    pub viewport: ScreenRect,
    pub timestamp: f64,
}

pub trait Effect {
    fn pre_process(&mut self, _context: &mut EffectContext<'_>) {}
    fn post_process(&mut self, _context: &mut EffectContext<'_>) {}
    fn is_over(&self) -> bool;
}

/// Screen shake: shifts the surface by `amplitude` pixels, flipping direction
/// every `period` frames, for `duration` frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Rumble {
    amplitude: f64,
    period: u32,
    duration: u32,
    frames: u32,
}

impl Rumble {
    pub fn new(amplitude: f64, period: u32, duration: u32) -> Self {
        Self {
            amplitude,
            period: period.max(1),
            duration,
            frames: 0,
        }
    }
}

impl Effect for Rumble {
    fn pre_process(&mut self, context: &mut EffectContext<'_>) {
        let sign = if (self.frames / self.period) % 2 == 0 {
            1.0
        } else {
            -1.0
        };
        self.frames = self.frames.saturating_add(1);
        context
            .surface
            .translate(sign * self.amplitude, sign * self.amplitude * 0.5);
    }

    fn is_over(&self) -> bool {
        self.frames >= self.duration
    }
}

/// Full-viewport colour overlay whose opacity ramps over `duration` frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Fade {
    color: [u8; 3],
    duration: u32,
    frames: u32,
    fade_in: bool,
}

impl Fade {
    /// Transparent to opaque.
    pub fn out(color: [u8; 3], duration: u32) -> Self {
        Self {
            color,
            duration: duration.max(1),
            frames: 0,
            fade_in: false,
        }
    }

    /// Opaque to transparent.
    pub fn reveal(color: [u8; 3], duration: u32) -> Self {
        Self {
            fade_in: true,
            ..Self::out(color, duration)
        }
    }

    pub fn alpha(&self) -> u8 {
        let progress = f64::from(self.frames.min(self.duration)) / f64::from(self.duration);
        let progress = if self.fade_in { 1.0 - progress } else { progress };
        (progress * 255.0).round() as u8
    }
}

impl Effect for Fade {
    fn post_process(&mut self, context: &mut EffectContext<'_>) {
        self.frames = self.frames.saturating_add(1);
        let [r, g, b] = self.color;
        context.surface.set_fill_color([r, g, b, self.alpha()]);
        let viewport = context.viewport;
        context.surface.fill_rect(DestRect {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
        });
    }

    fn is_over(&self) -> bool {
        self.frames >= self.duration
    }
}

#[derive(Default)]
pub struct StageRenderer {
    effects: Vec<Box<dyn Effect>>,
    warned_images: HashSet<String>,
}

impl StageRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_effect(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Draws one frame at animation time `timestamp`; returns the number of
    /// blitted elements.
    pub fn render(
        &mut self,
        stage: &Stage,
        surface: &mut dyn DrawingSurface,
        assets: &dyn AssetProvider,
        timestamp: f64,
    ) -> usize {
        let view = stage.view();
        let (origin_x, origin_y) = view.origin();
        let visible = view.visible_rect();

        surface.save();
        surface.translate(origin_x, origin_y);
        surface.clear_rect(DestRect {
            x: visible.x,
            y: visible.y,
            width: visible.width,
            height: visible.height,
        });

        self.effects.retain(|effect| !effect.is_over());
        for effect in &mut self.effects {
            effect.pre_process(&mut EffectContext {
                surface: &mut *surface,
                viewport: visible,
                timestamp,
            });
        }

        let warned = &mut self.warned_images;
        let mut drawn = 0usize;
        stage
            .buckets()
            .for_each_element(visible, timestamp, stage.frames(), |element| {
                let frame = element.frame;
                let Some(image) = frame_image(stage, assets, &frame.source) else {
                    warn_missing_image_once(warned, &frame.source);
                    return;
                };
                surface.draw_image(
                    image,
                    SourceRect {
                        x: frame.sx,
                        y: frame.sy,
                        width: frame.width,
                        height: frame.height,
                    },
                    DestRect {
                        x: f64::from(element.x),
                        y: f64::from(element.y),
                        width: f64::from(frame.width),
                        height: f64::from(frame.height),
                    },
                );
                drawn += 1;
            });

        for effect in self.effects.iter_mut().rev() {
            effect.post_process(&mut EffectContext {
                surface: &mut *surface,
                viewport: visible,
                timestamp,
            });
        }
        surface.restore();
        drawn
    }
}

pub(crate) fn frame_image<'a>(
    stage: &'a Stage,
    assets: &'a dyn AssetProvider,
    source: &ImageSource,
) -> Option<&'a RgbaImage> {
    match source {
        ImageSource::Asset(id) => assets.image(id),
        ImageSource::Prerendered(index) => stage.prerendered(*index),
    }
}

fn warn_missing_image_once(warned: &mut HashSet<String>, source: &ImageSource) {
    let key = match source {
        ImageSource::Asset(id) => id.clone(),
        ImageSource::Prerendered(index) => format!("#prerendered/{index}"),
    };
    if !warned.insert(key.clone()) {
        return;
    }
    warn!(image = %key, "missing_frame_image");
}
