use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::content::Offset;
use super::{ScreenRect, StageError, TileCoord, Vector3};

const SINGULAR_EPSILON: f64 = 1e-12;

/// Affine tile-to-screen map: `screen = M * (i, j, k) + (x0, y0, 0)`.
/// Rows of `M` produce `x`, `y` and the depth key `z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    matrix: [[f64; 3]; 3],
    inverse: [[f64; 3]; 3],
    x0: f64,
    y0: f64,
}

/// Projected point; `z` is the integer depth section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
    pub z: i32,
}

/// Pixel-snapped element position, offset applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Projection {
    pub fn new(matrix: [[f64; 3]; 3], x0: f64, y0: f64) -> Result<Self, StageError> {
        let inverse = invert(&matrix)?;
        Ok(Self {
            matrix,
            inverse,
            x0,
            y0,
        })
    }

    pub fn matrix(&self) -> &[[f64; 3]; 3] {
        &self.matrix
    }

    pub fn inverse(&self) -> &[[f64; 3]; 3] {
        &self.inverse
    }

    pub fn project(&self, i: f64, j: f64, k: f64) -> ScreenPoint {
        let m = &self.matrix;
        ScreenPoint {
            x: self.x0 + m[0][0] * i + m[0][1] * j + m[0][2] * k,
            y: self.y0 + m[1][0] * i + m[1][1] * j + m[1][2] * k,
            z: (m[2][0] * i + m[2][1] * j + m[2][2] * k).round() as i32,
        }
    }

    pub fn unproject(&self, x: f64, y: f64, k: f64) -> Vector3 {
        let inv = &self.inverse;
        let dx = x - self.x0;
        let dy = y - self.y0;
        let z = (k + inv[2][0] * (self.x0 - x) + inv[2][1] * (self.y0 - y)) / inv[2][2];
        Vector3 {
            i: inv[0][0] * dx + inv[0][1] * dy + inv[0][2] * z,
            j: inv[1][0] * dx + inv[1][1] * dy + inv[1][2] * z,
            k,
        }
    }
}

fn invert(m: &[[f64; 3]; 3]) -> Result<[[f64; 3]; 3], StageError> {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    let c00 = cofactor(1, 2, 1, 2);
    let c01 = -cofactor(1, 2, 0, 2);
    let c02 = cofactor(1, 2, 0, 1);
    let det = m[0][0] * c00 + m[0][1] * c01 + m[0][2] * c02;
    if det.abs() < SINGULAR_EPSILON {
        return Err(StageError::SingularProjection(det));
    }
    let c10 = -cofactor(0, 2, 1, 2);
    let c11 = cofactor(0, 2, 0, 2);
    let c12 = -cofactor(0, 2, 0, 1);
    let c20 = cofactor(0, 1, 1, 2);
    let c21 = -cofactor(0, 1, 0, 2);
    let c22 = cofactor(0, 1, 0, 1);
    // inverse = adjugate / det, adjugate = transposed cofactors
    Ok([
        [c00 / det, c10 / det, c20 / det],
        [c01 / det, c11 / det, c21 / det],
        [c02 / det, c12 / det, c22 / det],
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewEvent {
    Drag,
}

impl FromStr for ViewEvent {
    type Err = StageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "drag" => Ok(ViewEvent::Drag),
            other => Err(StageError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DragListenerId(u64);

pub type DragHandler = Box<dyn FnMut(f64, f64)>;

/// Viewport over the projected plane. The origin is the translation applied
/// to the drawing surface: stage pixel `x` lands on screen at `x + origin_x`.
pub struct View {
    projection: Projection,
    width: u32,
    height: u32,
    origin_x: f64,
    origin_y: f64,
    listeners: Vec<(DragListenerId, DragHandler)>,
    next_listener_id: u64,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("projection", &self.projection)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("origin_x", &self.origin_x)
            .field("origin_y", &self.origin_y)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl View {
    pub fn new(projection: Projection, width: u32, height: u32) -> Result<Self, StageError> {
        if width == 0 || height == 0 {
            return Err(StageError::InvalidViewport { width, height });
        }
        Ok(Self {
            projection,
            width,
            height,
            origin_x: 0.0,
            origin_y: 0.0,
            listeners: Vec::new(),
            next_listener_id: 0,
        })
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.origin_x, self.origin_y)
    }

    /// Stage-pixel rectangle currently under the viewport.
    pub fn visible_rect(&self) -> ScreenRect {
        ScreenRect {
            x: -self.origin_x,
            y: -self.origin_y,
            width: f64::from(self.width),
            height: f64::from(self.height),
        }
    }

    pub fn project(&self, i: f64, j: f64, k: f64) -> ScreenPoint {
        self.projection.project(i, j, k)
    }

    pub fn project_element(&self, offset: Offset, i: f64, j: f64, k: f64) -> ElementPosition {
        let point = self.projection.project(i, j, k);
        ElementPosition {
            x: (point.x + offset.x).round() as i32,
            y: (point.y + offset.y).round() as i32,
            z: point.z,
        }
    }

    pub fn unproject(&self, x: f64, y: f64, k: f64) -> Vector3 {
        self.projection.unproject(x, y, k)
    }

    pub fn get_cell(&self, x: f64, y: f64, k: i32) -> TileCoord {
        let point = self.projection.unproject(x, y, f64::from(k));
        TileCoord::new(point.i.round() as i32, point.j.round() as i32, k)
    }

    /// Cell under a viewport pixel, accounting for the current origin.
    pub fn screen_to_cell(&self, px: f64, py: f64, k: i32) -> TileCoord {
        self.get_cell(px - self.origin_x, py - self.origin_y, k)
    }

    pub fn drag(&mut self, dx: f64, dy: f64) {
        self.drag_to(self.origin_x + dx, self.origin_y + dy);
    }

    pub fn drag_to(&mut self, x: f64, y: f64) {
        self.origin_x = x;
        self.origin_y = y;
        for (_, handler) in &mut self.listeners {
            handler(x, y);
        }
    }

    pub fn on(&mut self, event: &str, handler: DragHandler) -> Result<DragListenerId, StageError> {
        match event.parse::<ViewEvent>()? {
            ViewEvent::Drag => Ok(self.on_drag(handler)),
        }
    }

    pub fn on_drag(&mut self, handler: DragHandler) -> DragListenerId {
        let id = DragListenerId(self.next_listener_id);
        self.next_listener_id = self.next_listener_id.saturating_add(1);
        self.listeners.push((id, handler));
        id
    }

    /// Returns `false` once the listener is already gone.
    pub fn off_drag(&mut self, id: DragListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn create_synchronizer(
        &self,
        target_width: f64,
        target_height: f64,
        delay: f64,
    ) -> Result<Synchronizer, StageError> {
        if !(0.0..1.0).contains(&delay) {
            return Err(StageError::InvalidDelay(delay));
        }
        Ok(Synchronizer {
            target_width: target_width.min(f64::from(self.width)),
            target_height: target_height.min(f64::from(self.height)),
            delay,
        })
    }
}

/// Eases the viewport so a tracked rectangle stays inside the centred
/// `target_width x target_height` area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synchronizer {
    target_width: f64,
    target_height: f64,
    delay: f64,
}

impl Synchronizer {
    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn tick(&self, view: &mut View, target: ScreenRect) {
        let (origin_x, origin_y) = view.origin();
        let x1 = settle_axis(
            origin_x,
            f64::from(view.width),
            self.target_width,
            target.x,
            target.width,
        );
        let y1 = settle_axis(
            origin_y,
            f64::from(view.height),
            self.target_height,
            target.y,
            target.height,
        );
        if x1 == origin_x && y1 == origin_y {
            return;
        }
        let retain = 1.0 - self.delay;
        let next_x = origin_x + (x1 - origin_x) * retain;
        let next_y = origin_y + (y1 - origin_y) * retain;
        debug!(next_x, next_y, "view_synchronized");
        view.drag_to(next_x, next_y);
    }
}

/// Origin that brings the offending side of `[start, start + span]` back
/// inside the centred target band, or the current origin when it fits.
fn settle_axis(origin: f64, viewport: f64, band: f64, start: f64, span: f64) -> f64 {
    let margin = (viewport - band) * 0.5;
    let band_start = -origin + margin;
    let band_end = band_start + band;
    if start < band_start {
        margin - start
    } else if start + span > band_end {
        margin + band - start - span
    } else {
        origin
    }
}
