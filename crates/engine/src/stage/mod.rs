mod buckets;
mod error;
mod frames;
mod geometry;
mod instance;
mod pathfinding;
mod props;
mod tilemap;
mod view;

#[cfg(test)]
pub(crate) mod test_support;
#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::content::{AssetProvider, EntityDescriptor, Offset, StageData};

pub use buckets::{Buckets, Element, ElementId, ElementKind, ElementSpec, VisibleElement};
pub use error::StageError;
pub use frames::{Animation, AnimationId, AnimationKey, Frame, FrameCycle, FrameTable, ImageSource};
pub use geometry::{PushBack, ScreenRect, TileCoord, TileRect, Vector3};
pub use instance::{Instance, InstanceId, InstanceIdAllocator};
pub use pathfinding::{find_path, PathError, PathNode, PathOptions};
pub use props::{matches_properties, Properties};
pub use tilemap::{SolidPredicate, TileMap, TileNode, SWEEP_TOLERANCE};
pub use view::{
    DragHandler, DragListenerId, ElementPosition, Projection, ScreenPoint, Synchronizer, View,
    ViewEvent,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageConfig {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub bucket_width_factor: f64,
    pub bucket_height_factor: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            viewport_width: 640,
            viewport_height: 480,
            bucket_width_factor: 1.0,
            bucket_height_factor: 1.0,
        }
    }
}

/// Centred `width x height` window of the viewport used to cull simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub width: f64,
    pub height: f64,
}

impl Range {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn bounds(&self, view: &View) -> ScreenRect {
        let visible = view.visible_rect();
        ScreenRect {
            x: visible.x + (visible.width - self.width) * 0.5,
            y: visible.y + (visible.height - self.height) * 0.5,
            width: self.width,
            height: self.height,
        }
    }

    fn contains(bounds: &ScreenRect, point: &ScreenPoint) -> bool {
        point.x >= bounds.x
            && point.x < bounds.x + bounds.width
            && point.y >= bounds.y
            && point.y < bounds.y + bounds.height
    }
}

/// Prerendered surface plus the tiles folded into it.
#[derive(Debug)]
struct Composite {
    image: RgbaImage,
    element: Option<ElementId>,
    coords: Vec<TileCoord>,
}

pub struct Stage {
    name: String,
    properties: Properties,
    entities: BTreeMap<String, EntityDescriptor>,
    view: View,
    frames: FrameTable,
    buckets: Buckets,
    tile_map: TileMap,
    fixed_tiles: HashMap<TileCoord, ElementId>,
    instances: BTreeMap<InstanceId, Instance>,
    physics: BTreeSet<InstanceId>,
    allocator: InstanceIdAllocator,
    prerendered: Vec<Composite>,
    folded: HashMap<TileCoord, usize>,
    time_ms: f64,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("view", &self.view)
            .field("elements", &self.buckets.len())
            .field("tiles", &self.tile_map.len())
            .field("instances", &self.instances.len())
            .field("prerendered", &self.prerendered.len())
            .finish()
    }
}

impl Stage {
    /// Builds the runtime stage. `data` is only read; frame rectangles are
    /// resolved against the decoded images `assets` already holds.
    pub fn new(
        data: &StageData,
        config: StageConfig,
        assets: &dyn AssetProvider,
    ) -> Result<Self, StageError> {
        let projection = Projection::new(data.matrix, data.x0, data.y0)?;
        let view = View::new(projection, config.viewport_width, config.viewport_height)?;
        let buckets = Buckets::new(
            config.viewport_width,
            config.viewport_height,
            config.bucket_width_factor,
            config.bucket_height_factor,
        )?;

        let image_size = |id: &str| assets.image_size(id);
        let mut frames = FrameTable::new();
        for (id, tile) in &data.tiles {
            frames.register(AnimationKey::Tile(id.clone()), &tile.frames, &image_size);
        }
        for (id, entity) in &data.entities {
            frames.register(AnimationKey::Entity(id.clone()), &entity.frames, &image_size);
        }

        let tile_map = TileMap::new(data.tiles.clone(), &data.map)?;
        let mut stage = Self {
            name: data.name.clone(),
            properties: data.properties.clone(),
            entities: data.entities.clone(),
            view,
            frames,
            buckets,
            tile_map,
            fixed_tiles: HashMap::new(),
            instances: BTreeMap::new(),
            physics: BTreeSet::new(),
            allocator: InstanceIdAllocator::default(),
            prerendered: Vec::new(),
            folded: HashMap::new(),
            time_ms: 0.0,
        };

        let placements: Vec<(TileCoord, String)> = stage
            .tile_map
            .placements()
            .map(|(coord, id)| (coord, id.to_string()))
            .collect();
        for (coord, id) in &placements {
            stage.attach_tile(*coord, id)?;
        }
        for descriptor in data.instances.values() {
            stage.create_instance_with(
                descriptor.entity_id.as_str(),
                Vector3::new(descriptor.i, descriptor.j, descriptor.k),
                descriptor.properties.clone(),
            )?;
        }

        info!(
            name = %stage.name,
            tile_count = placements.len(),
            instance_count = stage.instances.len(),
            element_count = stage.buckets.len(),
            "stage_loaded"
        );
        Ok(stage)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn buckets(&self) -> &Buckets {
        &self.buckets
    }

    pub fn tile_map(&self) -> &TileMap {
        &self.tile_map
    }

    pub fn prerendered(&self, index: usize) -> Option<&RgbaImage> {
        self.prerendered.get(index).map(|composite| &composite.image)
    }

    pub fn prerendered_count(&self) -> usize {
        self.prerendered.len()
    }

    /// Animation clock used as the time origin of newly attached elements.
    pub fn time(&self) -> f64 {
        self.time_ms
    }

    pub fn set_time(&mut self, time_ms: f64) {
        self.time_ms = time_ms;
    }

    /// Rebuilds every animation table against the loop period.
    pub fn synchronize(&mut self, period_ms: u64) {
        self.frames.synchronize(period_ms);
    }

    pub fn tick(&mut self, dt: f64) {
        for id in &self.physics {
            if let Some(instance) = self.instances.get_mut(id) {
                instance.tick(dt);
            }
        }
    }

    pub fn update(&mut self) {
        let ids: Vec<InstanceId> = self.physics.iter().copied().collect();
        for id in ids {
            self.place_element(id);
        }
    }

    pub fn tick_range(&mut self, range: Range, dt: f64) {
        for id in self.physics_in_range(range) {
            if let Some(instance) = self.instances.get_mut(&id) {
                instance.tick(dt);
            }
        }
    }

    pub fn update_range(&mut self, range: Range) {
        for id in self.physics_in_range(range) {
            self.place_element(id);
        }
    }

    /// Integrates the sub-steps of one display frame. Afterwards
    /// `previous_position` holds the frame-start position, so collision
    /// sweeps the whole frame's displacement.
    pub fn tick_frame(&mut self, range: Option<Range>, steps: &[f64]) {
        let ids: Vec<InstanceId> = match range {
            Some(range) => self.physics_in_range(range),
            None => self.physics.iter().copied().collect(),
        };
        for id in ids {
            if let Some(instance) = self.instances.get_mut(&id) {
                let frame_start = instance.position;
                for &dt in steps {
                    instance.tick(dt);
                }
                instance.previous_position = frame_start;
            }
        }
    }

    fn physics_in_range(&self, range: Range) -> Vec<InstanceId> {
        let bounds = range.bounds(&self.view);
        self.physics
            .iter()
            .filter(|id| {
                self.instances.get(id).is_some_and(|instance| {
                    let position = instance.position;
                    let point = self.view.project(position.i, position.j, position.k);
                    Range::contains(&bounds, &point)
                })
            })
            .copied()
            .collect()
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntityDescriptor> {
        self.entities.get(entity_id)
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(&id)
    }

    pub fn is_physics_enabled(&self, id: InstanceId) -> bool {
        self.physics.contains(&id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn create_instance(
        &mut self,
        entity_id: &str,
        i: f64,
        j: f64,
        k: f64,
    ) -> Result<InstanceId, StageError> {
        self.create_instance_with(entity_id, Vector3::new(i, j, k), Properties::new())
    }

    pub fn create_instance_with(
        &mut self,
        entity_id: &str,
        position: Vector3,
        properties: Properties,
    ) -> Result<InstanceId, StageError> {
        let bounding_box = self.entity_descriptor(entity_id)?.bounding_box;
        let id = self.allocator.allocate();
        let instance = Instance::new(id, entity_id, bounding_box, position, properties);
        self.register_instance(instance);
        debug!(instance = id.0, entity = entity_id, "instance_created");
        Ok(id)
    }

    /// Idempotent; `false` when the instance was already gone.
    pub fn remove_instance(&mut self, id: InstanceId) -> bool {
        let Some(instance) = self.instances.remove(&id) else {
            return false;
        };
        self.physics.remove(&id);
        if let Some(element) = instance.element {
            self.buckets.remove(element);
        }
        debug!(instance = id.0, "instance_removed");
        true
    }

    /// Swaps the backing entity. The successor keeps position, motion and
    /// properties; `id` becomes removed.
    pub fn replace_instance(
        &mut self,
        id: InstanceId,
        entity_id: &str,
    ) -> Result<InstanceId, StageError> {
        let bounding_box = self.entity_descriptor(entity_id)?.bounding_box;
        let previous = self.live_instance(id)?.clone();
        let successor_id = self.allocator.allocate();
        let successor = previous.successor(successor_id, entity_id, bounding_box);
        self.remove_instance(id);
        self.register_instance(successor);
        debug!(
            instance = id.0,
            successor = successor_id.0,
            entity = entity_id,
            "instance_replaced"
        );
        Ok(successor_id)
    }

    pub fn fork_instance(
        &mut self,
        id: InstanceId,
        entity_id: Option<&str>,
    ) -> Result<InstanceId, StageError> {
        let source = self.live_instance(id)?.clone();
        let entity_id = entity_id.unwrap_or(source.entity_id());
        let bounding_box = self.entity_descriptor(entity_id)?.bounding_box;
        let fork_id = self.allocator.allocate();
        let fork = source.successor(fork_id, entity_id, bounding_box);
        self.register_instance(fork);
        Ok(fork_id)
    }

    /// Moves the instance's element to its current position.
    pub fn update_instance(&mut self, id: InstanceId) -> Result<(), StageError> {
        self.live_instance(id)?;
        self.place_element(id);
        Ok(())
    }

    pub fn test_tile_collision(
        &self,
        id: InstanceId,
        predicate: Option<SolidPredicate<'_>>,
    ) -> Result<PushBack, StageError> {
        Ok(self
            .live_instance(id)?
            .test_tile_collision(&self.tile_map, predicate))
    }

    pub fn tile_collision(
        &mut self,
        id: InstanceId,
        predicate: Option<SolidPredicate<'_>>,
    ) -> Result<PushBack, StageError> {
        let tile_map = &self.tile_map;
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| missing_instance(&self.allocator, id))?;
        Ok(instance.tile_collision(tile_map, predicate))
    }

    pub fn rectangle_collision(
        &self,
        id: InstanceId,
        rect: TileRect,
        di_moved: f64,
        dj_moved: f64,
    ) -> Result<PushBack, StageError> {
        Ok(self
            .live_instance(id)?
            .rectangle_collision(rect, di_moved, dj_moved))
    }

    /// Separates `id` from `other`, treating `other` as the solid.
    pub fn collide(&mut self, id: InstanceId, other: InstanceId) -> Result<PushBack, StageError> {
        let mover = self.live_instance(id)?;
        let (rect, moved) = (mover.rect(), mover.displacement());
        let push = self
            .live_instance(other)?
            .rectangle_collision(rect, moved.i, moved.j);
        if let Some(mover) = self.instances.get_mut(&id) {
            mover.apply_push_back(push);
        }
        Ok(push)
    }

    /// Live instances whose properties (falling back to their entity's)
    /// match `filter`.
    pub fn instances(&self, filter: Option<&Properties>) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|instance| self.instance_matches(instance, filter))
            .map(Instance::id)
            .collect()
    }

    pub fn instances_of(
        &self,
        entity_id: &str,
        filter: Option<&Properties>,
    ) -> Result<Vec<InstanceId>, StageError> {
        self.entity_descriptor(entity_id)?;
        Ok(self
            .instances
            .values()
            .filter(|instance| instance.entity_id() == entity_id)
            .filter(|instance| self.instance_matches(instance, filter))
            .map(Instance::id)
            .collect())
    }

    pub fn for_each_instance<F>(&mut self, filter: Option<&Properties>, mut action: F)
    where
        F: FnMut(&mut Instance),
    {
        let ids = self.instances(filter);
        for id in ids {
            if let Some(instance) = self.instances.get_mut(&id) {
                action(instance);
            }
        }
    }

    pub fn entities(&self, filter: Option<&Properties>) -> Vec<&str> {
        let empty = Properties::new();
        self.entities
            .iter()
            .filter(|(_, entity)| props::filter_matches(filter, &entity.properties, &empty))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Places `tile_id` at `coord`, replacing whatever tile was there. A
    /// prerendered composite holding `coord` is split back into its tiles.
    pub fn put_tile(&mut self, coord: TileCoord, tile_id: &str) -> Result<(), StageError> {
        self.tile_map.put_at(coord, tile_id)?;
        self.detach_tile(coord);
        self.attach_tile(coord, tile_id)
    }

    pub fn remove_tile(&mut self, coord: TileCoord) -> bool {
        if self.tile_map.remove_at(coord).is_none() {
            return false;
        }
        self.detach_tile(coord);
        true
    }

    pub fn synchronize_view(
        &mut self,
        synchronizer: &Synchronizer,
        id: InstanceId,
    ) -> Result<(), StageError> {
        let instance = self.live_instance(id)?;
        let target = match instance.element.and_then(|element| self.buckets.element(element)) {
            Some(element) => element.rect(),
            None => {
                let position = instance.position;
                let point = self.view.project(position.i, position.j, position.k);
                ScreenRect {
                    x: point.x,
                    y: point.y,
                    width: 0.0,
                    height: 0.0,
                }
            }
        };
        synchronizer.tick(&mut self.view, target);
        Ok(())
    }

    pub(crate) fn buckets_mut(&mut self) -> &mut Buckets {
        &mut self.buckets
    }

    /// Stores a composite surface together with a constant animation for it.
    pub(crate) fn add_prerendered(&mut self, image: RgbaImage) -> (usize, AnimationId) {
        let index = self.prerendered.len();
        let (width, height) = image.dimensions();
        self.prerendered.push(Composite {
            image,
            element: None,
            coords: Vec::new(),
        });
        let animation = self.frames.insert(
            AnimationKey::Prerendered(index),
            Animation::Static(Frame {
                source: ImageSource::Prerendered(index),
                sx: 0,
                sy: 0,
                width,
                height,
            }),
        );
        (index, animation)
    }

    /// Drops the `tiles` elements now drawn by composite `index` as `element`.
    pub(crate) fn fold_tiles(&mut self, index: usize, element: ElementId, tiles: &[ElementId]) {
        let mut coords = Vec::with_capacity(tiles.len());
        for tile in tiles {
            let kind = self.buckets.element(*tile).map(Element::kind);
            if let Some(ElementKind::Tile { coord, .. }) = kind {
                self.fixed_tiles.remove(&coord);
                self.folded.insert(coord, index);
                coords.push(coord);
            }
            self.buckets.remove(*tile);
        }
        if let Some(composite) = self.prerendered.get_mut(index) {
            composite.element = Some(element);
            composite.coords = coords;
        }
    }

    /// Puts the tiles of composite `index` back as separate elements, in the
    /// composite's place, and retires the composite element.
    fn unfold(&mut self, index: usize) {
        let Some(composite) = self.prerendered.get_mut(index) else {
            return;
        };
        let Some(element) = composite.element.take() else {
            return;
        };
        let coords = std::mem::take(&mut composite.coords);
        for coord in &coords {
            self.folded.remove(coord);
            let Some(tile_id) = self.tile_map.get_at(*coord).map(str::to_string) else {
                continue;
            };
            if let Ok(Some(spec)) = self.tile_spec(*coord, &tile_id) {
                let restored = self.buckets.insert_before(spec, Some(element));
                self.fixed_tiles.insert(*coord, restored);
            }
        }
        self.buckets.remove(element);
        debug!(composite = index, tiles = coords.len(), "composite_unfolded");
    }

    fn entity_descriptor(&self, entity_id: &str) -> Result<&EntityDescriptor, StageError> {
        self.entities
            .get(entity_id)
            .ok_or_else(|| StageError::UnknownEntity(entity_id.to_string()))
    }

    fn live_instance(&self, id: InstanceId) -> Result<&Instance, StageError> {
        self.instances
            .get(&id)
            .ok_or_else(|| missing_instance(&self.allocator, id))
    }

    fn instance_matches(&self, instance: &Instance, filter: Option<&Properties>) -> bool {
        let empty = Properties::new();
        let fallback = self
            .entities
            .get(instance.entity_id())
            .map_or(&empty, |entity| &entity.properties);
        props::filter_matches(filter, &instance.properties, fallback)
    }

    fn register_instance(&mut self, mut instance: Instance) {
        let id = instance.id();
        let entity_id = instance.entity_id().to_string();
        if let Some(entity) = self.entities.get(&entity_id) {
            if entity.enable_physics {
                self.physics.insert(id);
            }
            instance.element = self.element_spec(
                AnimationKey::Entity(entity_id),
                ElementKind::Instance(id),
                entity.offset,
                (entity.width, entity.height),
                instance.position,
            )
            .map(|spec| self.buckets.insert(spec));
        }
        self.instances.insert(id, instance);
    }

    fn place_element(&mut self, id: InstanceId) {
        let Some(instance) = self.instances.get(&id) else {
            return;
        };
        let Some(element) = instance.element else {
            return;
        };
        let offset = self
            .entities
            .get(instance.entity_id())
            .map_or(Offset::default(), |entity| entity.offset);
        let position = instance.position;
        let placed = self
            .view
            .project_element(offset, position.i, position.j, position.k);
        self.buckets
            .update_position(element, placed.x, placed.y, placed.z);
    }

    fn tile_spec(
        &self,
        coord: TileCoord,
        tile_id: &str,
    ) -> Result<Option<ElementSpec>, StageError> {
        let tile = self
            .tile_map
            .descriptor(tile_id)
            .ok_or_else(|| StageError::UnknownTile(tile_id.to_string()))?;
        Ok(self.element_spec(
            AnimationKey::Tile(tile_id.to_string()),
            ElementKind::Tile {
                coord,
                mutable: tile.mutable,
            },
            tile.offset,
            (tile.width, tile.height),
            Vector3::new(f64::from(coord.i), f64::from(coord.j), f64::from(coord.k)),
        ))
    }

    fn attach_tile(&mut self, coord: TileCoord, tile_id: &str) -> Result<(), StageError> {
        let Some(spec) = self.tile_spec(coord, tile_id)? else {
            warn!(tile = tile_id, "tile_without_frames");
            return Ok(());
        };
        let element = self.buckets.add_tile(spec);
        if matches!(spec.kind, ElementKind::Tile { mutable: false, .. }) {
            self.fixed_tiles.insert(coord, element);
        }
        Ok(())
    }

    fn detach_tile(&mut self, coord: TileCoord) {
        if let Some(index) = self.folded.get(&coord).copied() {
            self.unfold(index);
        }
        if let Some(element) = self.fixed_tiles.remove(&coord) {
            self.buckets.remove(element);
        }
        self.buckets.remove_tile(coord);
    }

    fn element_spec(
        &self,
        key: AnimationKey,
        kind: ElementKind,
        offset: Offset,
        size: (Option<u32>, Option<u32>),
        position: Vector3,
    ) -> Option<ElementSpec> {
        let animation = self.frames.id(&key)?;
        let first = self.frames.resolve(animation, 0.0)?;
        let placed = self
            .view
            .project_element(offset, position.i, position.j, position.k);
        Some(ElementSpec {
            kind,
            animation,
            x: placed.x,
            y: placed.y,
            z: placed.z,
            width: size.0.unwrap_or(first.width),
            height: size.1.unwrap_or(first.height),
            time_origin: self.time_ms,
        })
    }
}

fn missing_instance(allocator: &InstanceIdAllocator, id: InstanceId) -> StageError {
    if allocator.was_issued(id) {
        StageError::InstanceRemoved(id)
    } else {
        StageError::UnknownInstance(id)
    }
}
