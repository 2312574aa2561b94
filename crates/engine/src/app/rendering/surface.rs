use image::{Rgba, RgbaImage};

/// Axis-aligned device transform: `device = local * scale + translate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale_x: f64,
    pub scale_y: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale_x: 1.0,
        scale_y: 1.0,
        translate_x: 0.0,
        translate_y: 0.0,
    };

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.scale_x + self.translate_x,
            y * self.scale_y + self.translate_y,
        )
    }
}

/// Source sub-rectangle of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Destination rectangle in local (pre-transform) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DestRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The raster operations the renderer needs from its host.
pub trait DrawingSurface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn save(&mut self);
    fn restore(&mut self);
    fn transform(&self) -> Transform;
    fn set_transform(&mut self, transform: Transform);

    fn translate(&mut self, dx: f64, dy: f64) {
        let mut transform = self.transform();
        transform.translate_x += dx * transform.scale_x;
        transform.translate_y += dy * transform.scale_y;
        self.set_transform(transform);
    }

    fn set_fill_color(&mut self, color: [u8; 4]);
    fn clear_rect(&mut self, rect: DestRect);
    fn fill_rect(&mut self, rect: DestRect);
    fn draw_image(&mut self, source: &RgbaImage, src: SourceRect, dest: DestRect);
}

#[derive(Debug, Clone, Copy)]
struct SavedState {
    transform: Transform,
    fill: [u8; 4],
}

/// Software surface over an RGBA buffer.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    image: RgbaImage,
    transform: Transform,
    fill: [u8; 4],
    stack: Vec<SavedState>,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_image(RgbaImage::new(width, height))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image,
            transform: Transform::IDENTITY,
            fill: [0, 0, 0, 255],
            stack: Vec::new(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        (x < self.image.width() && y < self.image.height()).then(|| self.image.get_pixel(x, y).0)
    }

    /// Device pixel span `[start, end)` covered by a local rectangle, clipped.
    fn device_span(&self, rect: DestRect) -> Option<DeviceSpan> {
        let (x0, y0) = self.transform.apply(rect.x, rect.y);
        let (x1, y1) = self.transform.apply(rect.x + rect.width, rect.y + rect.height);
        let (x0, x1) = (x0.min(x1), x0.max(x1));
        let (y0, y1) = (y0.min(y1), y0.max(y1));
        let span = DeviceSpan {
            origin_x: x0.round(),
            origin_y: y0.round(),
            extent_x: x1.round() - x0.round(),
            extent_y: y1.round() - y0.round(),
            left: clamp_axis(x0.round(), self.image.width()),
            top: clamp_axis(y0.round(), self.image.height()),
            right: clamp_axis(x1.round(), self.image.width()),
            bottom: clamp_axis(y1.round(), self.image.height()),
        };
        (span.left < span.right && span.top < span.bottom).then_some(span)
    }
}

#[derive(Debug, Clone, Copy)]
struct DeviceSpan {
    origin_x: f64,
    origin_y: f64,
    extent_x: f64,
    extent_y: f64,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

fn clamp_axis(value: f64, limit: u32) -> u32 {
    value.clamp(0.0, f64::from(limit)) as u32
}

impl DrawingSurface for RasterSurface {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn save(&mut self) {
        self.stack.push(SavedState {
            transform: self.transform,
            fill: self.fill,
        });
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.transform = state.transform;
            self.fill = state.fill;
        }
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    fn set_fill_color(&mut self, color: [u8; 4]) {
        self.fill = color;
    }

    fn clear_rect(&mut self, rect: DestRect) {
        let Some(span) = self.device_span(rect) else {
            return;
        };
        for y in span.top..span.bottom {
            for x in span.left..span.right {
                self.image.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
    }

    fn fill_rect(&mut self, rect: DestRect) {
        let Some(span) = self.device_span(rect) else {
            return;
        };
        let color = self.fill;
        for y in span.top..span.bottom {
            for x in span.left..span.right {
                blend_over(self.image.get_pixel_mut(x, y), color);
            }
        }
    }

    fn draw_image(&mut self, source: &RgbaImage, src: SourceRect, dest: DestRect) {
        let src_right = src.x.saturating_add(src.width).min(source.width());
        let src_bottom = src.y.saturating_add(src.height).min(source.height());
        if src.x >= src_right || src.y >= src_bottom {
            return;
        }
        let Some(span) = self.device_span(dest) else {
            return;
        };
        if span.extent_x <= 0.0 || span.extent_y <= 0.0 {
            return;
        }
        let step_x = f64::from(src.width) / span.extent_x;
        let step_y = f64::from(src.height) / span.extent_y;
        for y in span.top..span.bottom {
            let offset_y = ((f64::from(y) - span.origin_y + 0.5) * step_y).floor() as u32;
            let sy = (src.y + offset_y).min(src_bottom - 1);
            for x in span.left..span.right {
                let offset_x = ((f64::from(x) - span.origin_x + 0.5) * step_x).floor() as u32;
                let sx = (src.x + offset_x).min(src_right - 1);
                let color = source.get_pixel(sx, sy).0;
                blend_over(self.image.get_pixel_mut(x, y), color);
            }
        }
    }
}

/// Source-over compositing of straight-alpha colours.
fn blend_over(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let alpha = u32::from(src[3]);
    if alpha == 0 {
        return;
    }
    if alpha == 255 {
        dst.0 = src;
        return;
    }
    let dst_alpha = u32::from(dst.0[3]);
    let inverse = 255 - alpha;
    let out_alpha = alpha * 255 + dst_alpha * inverse;
    if out_alpha == 0 {
        dst.0 = [0, 0, 0, 0];
        return;
    }
    for channel in 0..3 {
        let value = u32::from(src[channel]) * alpha * 255
            + u32::from(dst.0[channel]) * dst_alpha * inverse;
        dst.0[channel] = ((value + out_alpha / 2) / out_alpha) as u8;
    }
    dst.0[3] = ((out_alpha + 127) / 255) as u8;
}
