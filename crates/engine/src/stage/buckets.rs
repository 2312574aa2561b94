use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use super::frames::{AnimationId, Frame, FrameTable};
use super::{InstanceId, ScreenRect, StageError, TileCoord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Tile { coord: TileCoord, mutable: bool },
    Instance(InstanceId),
    /// Composite produced by the prerender pass.
    Prerendered(usize),
}

/// Everything needed to place a new element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSpec {
    pub kind: ElementKind,
    pub animation: AnimationId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub width: u32,
    pub height: u32,
    pub time_origin: f64,
}

#[derive(Debug)]
pub struct Element {
    kind: ElementKind,
    animation: AnimationId,
    x: i32,
    y: i32,
    z: i32,
    width: u32,
    height: u32,
    time_origin: f64,
    cells: Vec<CellKey>,
    visit: Cell<u64>,
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn animation(&self) -> AnimationId {
        self.animation
    }

    pub fn position(&self) -> (i32, i32, i32) {
        (self.x, self.y, self.z)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn time_origin(&self) -> f64 {
        self.time_origin
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn rect(&self) -> ScreenRect {
        ScreenRect {
            x: f64::from(self.x),
            y: f64::from(self.y),
            width: f64::from(self.width),
            height: f64::from(self.height),
        }
    }
}

/// Grid cell `(row, column)`.
type CellKey = (i32, i32);

#[derive(Debug, Default)]
struct Bucket {
    sections: BTreeMap<i32, Vec<ElementId>>,
}

impl Bucket {
    fn insert(&mut self, z: i32, id: ElementId) {
        self.sections.entry(z).or_default().push(id);
    }

    fn remove(&mut self, z: i32, id: ElementId) {
        if let Some(section) = self.sections.get_mut(&z) {
            section.retain(|entry| *entry != id);
            if section.is_empty() {
                self.sections.remove(&z);
            }
        }
    }
}

/// One enumerated element together with its current frame.
#[derive(Debug, Clone, Copy)]
pub struct VisibleElement<'a> {
    pub id: ElementId,
    pub kind: ElementKind,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub frame: &'a Frame,
}

/// Viewport-sized spatial hash with per-cell depth sections.
#[derive(Debug)]
pub struct Buckets {
    cell_width: f64,
    cell_height: f64,
    buckets: HashMap<CellKey, Bucket>,
    elements: HashMap<ElementId, Element>,
    erasers: HashMap<TileCoord, ElementId>,
    next_id: u64,
    visit_stamp: Cell<u64>,
}

impl Buckets {
    pub fn new(
        viewport_width: u32,
        viewport_height: u32,
        width_factor: f64,
        height_factor: f64,
    ) -> Result<Self, StageError> {
        for factor in [width_factor, height_factor] {
            if factor.is_nan() || factor < 1.0 {
                return Err(StageError::InvalidBucketFactor(factor));
            }
        }
        if viewport_width == 0 || viewport_height == 0 {
            return Err(StageError::InvalidViewport {
                width: viewport_width,
                height: viewport_height,
            });
        }
        Ok(Self {
            cell_width: f64::from(viewport_width) * width_factor,
            cell_height: f64::from(viewport_height) * height_factor,
            buckets: HashMap::new(),
            elements: HashMap::new(),
            erasers: HashMap::new(),
            next_id: 0,
            visit_stamp: Cell::new(0),
        })
    }

    pub fn cell_size(&self) -> (f64, f64) {
        (self.cell_width, self.cell_height)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn elements(&self) -> impl Iterator<Item = (ElementId, &Element)> + '_ {
        self.elements.iter().map(|(id, element)| (*id, element))
    }

    pub fn insert(&mut self, spec: ElementSpec) -> ElementId {
        self.insert_before(spec, None)
    }

    /// Inserts ahead of `anchor` in every section that holds it, so the new
    /// element paints first among equal depths.
    pub fn insert_before(&mut self, spec: ElementSpec, anchor: Option<ElementId>) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        let cells = self.covered_cells(spec.x, spec.y, spec.width, spec.height);
        for cell in &cells {
            let section = self
                .buckets
                .entry(*cell)
                .or_default()
                .sections
                .entry(spec.z)
                .or_default();
            match anchor.and_then(|anchor| section.iter().position(|entry| *entry == anchor)) {
                Some(index) => section.insert(index, id),
                None => section.push(id),
            }
        }
        self.elements.insert(
            id,
            Element {
                kind: spec.kind,
                animation: spec.animation,
                x: spec.x,
                y: spec.y,
                z: spec.z,
                width: spec.width,
                height: spec.height,
                time_origin: spec.time_origin,
                cells,
                visit: Cell::new(0),
            },
        );
        id
    }

    /// Detaches the element from every cell it occupies. Removing an
    /// unknown or already removed element returns `false`.
    pub fn remove(&mut self, id: ElementId) -> bool {
        let Some(element) = self.elements.remove(&id) else {
            return false;
        };
        for cell in &element.cells {
            if let Some(bucket) = self.buckets.get_mut(cell) {
                bucket.remove(element.z, id);
            }
        }
        if let ElementKind::Tile { coord, .. } = element.kind {
            if self.erasers.get(&coord) == Some(&id) {
                self.erasers.remove(&coord);
            }
        }
        true
    }

    /// Moves an element; it is re-inserted only when its depth section or
    /// covered cells change.
    pub fn update_position(&mut self, id: ElementId, x: i32, y: i32, z: i32) -> bool {
        let Some(element) = self.elements.get(&id) else {
            return false;
        };
        let cells = self.covered_cells(x, y, element.width, element.height);
        let old_z = element.z;
        let relocate = old_z != z || cells != element.cells;
        if relocate {
            let old_cells = element.cells.clone();
            for cell in &old_cells {
                if let Some(bucket) = self.buckets.get_mut(cell) {
                    bucket.remove(old_z, id);
                }
            }
            for cell in &cells {
                self.buckets.entry(*cell).or_default().insert(z, id);
            }
        }
        if let Some(element) = self.elements.get_mut(&id) {
            element.x = x;
            element.y = y;
            element.z = z;
            if relocate {
                element.cells = cells;
            }
        }
        true
    }

    pub fn set_animation(&mut self, id: ElementId, animation: AnimationId, time_origin: f64) {
        if let Some(element) = self.elements.get_mut(&id) {
            element.animation = animation;
            element.time_origin = time_origin;
        }
    }

    /// Mutable tiles register an eraser under their cell; immutable tiles
    /// can only be dropped through the returned id.
    pub fn add_tile(&mut self, spec: ElementSpec) -> ElementId {
        let eraser = match spec.kind {
            ElementKind::Tile {
                coord,
                mutable: true,
            } => Some(coord),
            _ => None,
        };
        let id = self.insert(spec);
        if let Some(coord) = eraser {
            if let Some(previous) = self.erasers.insert(coord, id) {
                self.remove(previous);
            }
        }
        id
    }

    pub fn remove_tile(&mut self, coord: TileCoord) -> bool {
        match self.erasers.remove(&coord) {
            Some(id) => self.remove(id),
            None => false,
        }
    }

    pub fn replace_tile(&mut self, coord: TileCoord, spec: ElementSpec) -> ElementId {
        self.remove_tile(coord);
        self.add_tile(spec)
    }

    pub fn has_eraser(&self, coord: TileCoord) -> bool {
        self.erasers.contains_key(&coord)
    }

    /// Occupied cells in row-major order.
    pub fn cells(&self) -> Vec<(i32, i32)> {
        let mut cells: Vec<CellKey> = self.buckets.keys().copied().collect();
        cells.sort_unstable();
        cells
    }

    /// Depth sections of one cell with their element ids, ascending in `z`.
    pub fn sections(&self, cell: (i32, i32)) -> Vec<(i32, Vec<ElementId>)> {
        self.buckets
            .get(&cell)
            .map(|bucket| {
                bucket
                    .sections
                    .iter()
                    .map(|(z, ids)| (*z, ids.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Walks the elements intersecting `visible` in ascending depth order.
    /// Each element is reported once even when it spans several cells.
    pub fn for_each_element<'a, F>(
        &'a self,
        visible: ScreenRect,
        now: f64,
        frames: &'a FrameTable,
        mut action: F,
    ) -> usize
    where
        F: FnMut(VisibleElement<'a>),
    {
        let stamp = self.visit_stamp.get().wrapping_add(1);
        self.visit_stamp.set(stamp);

        let row = (visible.y / self.cell_height).floor() as i32;
        let column = (visible.x / self.cell_width).floor() as i32;
        let quad = [
            (row, column),
            (row, column + 1),
            (row + 1, column),
            (row + 1, column + 1),
        ];
        let buckets: Vec<&Bucket> = quad
            .iter()
            .filter_map(|cell| self.buckets.get(cell))
            .collect();
        let depths: BTreeSet<i32> = buckets
            .iter()
            .flat_map(|bucket| bucket.sections.keys().copied())
            .collect();

        let mut visited = 0usize;
        for z in depths {
            for bucket in &buckets {
                let Some(section) = bucket.sections.get(&z) else {
                    continue;
                };
                for id in section {
                    let Some(element) = self.elements.get(id) else {
                        continue;
                    };
                    if element.visit.get() == stamp {
                        continue;
                    }
                    element.visit.set(stamp);
                    if !element.rect().intersects(&visible) {
                        continue;
                    }
                    let Some(frame) = frames.resolve(element.animation, now - element.time_origin)
                    else {
                        continue;
                    };
                    visited += 1;
                    action(VisibleElement {
                        id: *id,
                        kind: element.kind,
                        x: element.x,
                        y: element.y,
                        z: element.z,
                        frame,
                    });
                }
            }
        }
        visited
    }

    fn covered_cells(&self, x: i32, y: i32, width: u32, height: u32) -> Vec<CellKey> {
        let right = f64::from(x) + f64::from(width.max(1)) - 1.0;
        let bottom = f64::from(y) + f64::from(height.max(1)) - 1.0;
        let row0 = (f64::from(y) / self.cell_height).floor() as i32;
        let row1 = (bottom / self.cell_height).floor() as i32;
        let column0 = (f64::from(x) / self.cell_width).floor() as i32;
        let column1 = (right / self.cell_width).floor() as i32;
        let mut cells = Vec::with_capacity(4);
        for row in row0..=row1 {
            for column in column0..=column1 {
                cells.push((row, column));
            }
        }
        if cells.len() > 4 {
            debug!(x, y, width, height, cells = cells.len(), "oversized_element");
        }
        cells
    }
}
