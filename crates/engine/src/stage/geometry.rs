/// Tile-space vector; used for positions and every motion triplet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub i: f64,
    pub j: f64,
    pub k: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        i: 0.0,
        j: 0.0,
        k: 0.0,
    };

    pub fn new(i: f64, j: f64, k: f64) -> Self {
        Self { i, j, k }
    }

    pub fn add_scaled(&mut self, other: Vector3, factor: f64) {
        self.i += other.i * factor;
        self.j += other.j * factor;
        self.k += other.k * factor;
    }

    pub fn sub(self, other: Vector3) -> Vector3 {
        Vector3 {
            i: self.i - other.i,
            j: self.j - other.j,
            k: self.k - other.k,
        }
    }

    pub fn plus(self, other: Vector3) -> Vector3 {
        Vector3 {
            i: self.i + other.i,
            j: self.j + other.j,
            k: self.k + other.k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub i: i32,
    pub j: i32,
    pub k: i32,
}

impl TileCoord {
    pub fn new(i: i32, j: i32, k: i32) -> Self {
        Self { i, j, k }
    }
}

/// Axis-aligned rectangle in the `(i, j)` plane of a layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    pub i: f64,
    pub j: f64,
    pub di: f64,
    pub dj: f64,
}

/// Separating push-back along `i` and `j`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PushBack {
    pub i: f64,
    pub j: f64,
}

impl PushBack {
    pub fn is_zero(&self) -> bool {
        self.i == 0.0 && self.j == 0.0
    }
}

/// Projected screen-space rectangle, in stage pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScreenRect {
    pub fn intersects(&self, other: &ScreenRect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}
