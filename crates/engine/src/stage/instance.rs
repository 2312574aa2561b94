use super::buckets::ElementId;
use super::props::Properties;
use super::tilemap::{cap_to_sweep, SolidPredicate, TileMap};
use super::{PushBack, TileRect, Vector3};
use crate::content::BoundingBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

#[derive(Debug, Default)]
pub struct InstanceIdAllocator {
    next: u64,
}

impl InstanceIdAllocator {
    pub fn allocate(&mut self) -> InstanceId {
        let id = InstanceId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    /// Ids are never reused, so any id below the cursor was handed out.
    pub fn was_issued(&self, id: InstanceId) -> bool {
        id.0 < self.next
    }
}

/// Placed occurrence of an entity. Motion state is public; placement in
/// the spatial index is owned by the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    id: InstanceId,
    entity_id: String,
    bounding_box: BoundingBox,
    pub(crate) element: Option<ElementId>,
    pub position: Vector3,
    pub previous_position: Vector3,
    pub velocity: Vector3,
    pub uniform_velocity: Vector3,
    pub acceleration: Vector3,
    pub properties: Properties,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        entity_id: &str,
        bounding_box: BoundingBox,
        position: Vector3,
        properties: Properties,
    ) -> Self {
        Self {
            id,
            entity_id: entity_id.to_string(),
            bounding_box,
            element: None,
            position,
            previous_position: position,
            velocity: Vector3::ZERO,
            uniform_velocity: Vector3::ZERO,
            acceleration: Vector3::ZERO,
            properties,
        }
    }

    /// Copy of the motion state under a new identity and entity.
    pub(crate) fn successor(
        &self,
        id: InstanceId,
        entity_id: &str,
        bounding_box: BoundingBox,
    ) -> Self {
        Self {
            id,
            entity_id: entity_id.to_string(),
            bounding_box,
            element: None,
            ..self.clone()
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    pub fn element(&self) -> Option<ElementId> {
        self.element
    }

    pub fn tick(&mut self, dt: f64) {
        let dt2 = dt * dt * 0.5;
        self.previous_position = self.position;
        self.position
            .add_scaled(self.velocity.plus(self.uniform_velocity), dt);
        self.position.add_scaled(self.acceleration, dt2);
        self.velocity.add_scaled(self.acceleration, dt);
    }

    /// Movement since the last tick.
    pub fn displacement(&self) -> Vector3 {
        self.position.sub(self.previous_position)
    }

    /// Bounding box in the `(i, j)` plane, centred on position plus box offset.
    pub fn rect(&self) -> TileRect {
        let bounds = &self.bounding_box;
        TileRect {
            i: self.position.i + bounds.i0 - bounds.i_span * 0.5,
            j: self.position.j + bounds.j0 - bounds.j_span * 0.5,
            di: bounds.i_span,
            dj: bounds.j_span,
        }
    }

    pub fn layer(&self) -> i32 {
        self.position.k.round() as i32
    }

    pub fn test_tile_collision(
        &self,
        tile_map: &TileMap,
        predicate: Option<SolidPredicate<'_>>,
    ) -> PushBack {
        let moved = self.displacement();
        tile_map.rectangle_collision(self.layer(), self.rect(), moved.i, moved.j, predicate)
    }

    pub fn tile_collision(
        &mut self,
        tile_map: &TileMap,
        predicate: Option<SolidPredicate<'_>>,
    ) -> PushBack {
        let push = self.test_tile_collision(tile_map, predicate);
        self.apply_push_back(push);
        push
    }

    /// Push-back for another rectangle that moved by `(di_moved, dj_moved)`
    /// into this instance's box, which acts as the solid.
    pub fn rectangle_collision(&self, other: TileRect, di_moved: f64, dj_moved: f64) -> PushBack {
        let solid = self.rect();
        let overlaps = other.i < solid.i + solid.di
            && solid.i < other.i + other.di
            && other.j < solid.j + solid.dj
            && solid.j < other.j + other.dj;
        if !overlaps {
            return PushBack::default();
        }
        PushBack {
            i: cap_to_sweep(
                separate(solid.i - other.i - other.di, solid.i + solid.di - other.i, di_moved),
                di_moved,
            ),
            j: cap_to_sweep(
                separate(solid.j - other.j - other.dj, solid.j + solid.dj - other.j, dj_moved),
                dj_moved,
            ),
        }
    }

    /// Moves by the push-back and cancels velocity that points into it.
    pub fn apply_push_back(&mut self, push: PushBack) {
        self.position.i += push.i;
        self.position.j += push.j;
        if push.i * self.velocity.i < 0.0 {
            self.velocity.i = 0.0;
        }
        if push.j * self.velocity.j < 0.0 {
            self.velocity.j = 0.0;
        }
    }
}

/// Chooses the exit that opposes the motion; without motion the shorter one.
fn separate(backward: f64, forward: f64, moved: f64) -> f64 {
    if moved > 0.0 {
        backward
    } else if moved < 0.0 {
        forward
    } else if backward.abs() <= forward.abs() {
        backward
    } else {
        forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(i: f64, j: f64) -> Instance {
        Instance::new(
            InstanceId(0),
            "hero",
            BoundingBox::default(),
            Vector3::new(i, j, 0.0),
            Properties::new(),
        )
    }

    #[test]
    fn allocator_is_monotonic() {
        let mut allocator = InstanceIdAllocator::default();
        let first = allocator.allocate();
        let second = allocator.allocate();
        assert_eq!((first.0, second.0), (0, 1));
        assert!(allocator.was_issued(second));
        assert!(!allocator.was_issued(InstanceId(2)));
    }

    #[test]
    fn tick_integrates_motion() {
        let mut hero = instance(1.0, 2.0);
        hero.velocity = Vector3::new(1.0, 0.0, 0.0);
        hero.uniform_velocity = Vector3::new(0.0, 2.0, 0.0);
        hero.acceleration = Vector3::new(0.0, 0.0, 4.0);
        hero.tick(0.5);

        assert_eq!(hero.previous_position, Vector3::new(1.0, 2.0, 0.0));
        assert_eq!(hero.position, Vector3::new(1.5, 3.0, 0.5));
        assert_eq!(hero.velocity, Vector3::new(1.0, 0.0, 2.0));
        assert_eq!(hero.uniform_velocity, Vector3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn constant_velocity_accumulates_exactly() {
        let mut hero = instance(0.0, 0.0);
        hero.velocity = Vector3::new(0.25, 0.0, 0.0);
        hero.uniform_velocity = Vector3::new(0.25, 0.5, 0.0);
        for _ in 0..8 {
            hero.tick(0.125);
        }
        assert_eq!(hero.position, Vector3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn rect_is_centred_on_position() {
        let hero = instance(0.5, 0.8);
        let rect = hero.rect();
        assert_eq!((rect.i, rect.di, rect.dj), (0.0, 1.0, 1.0));
        assert!((rect.j - 0.3).abs() < 1e-12);
    }

    #[test]
    fn entity_push_back_opposes_motion() {
        let wall = instance(2.5, 0.5);
        let mover = TileRect {
            i: 1.2,
            j: 0.0,
            di: 1.0,
            dj: 1.0,
        };
        let push = wall.rectangle_collision(mover, 0.3, 0.0);
        assert!((push.i + 0.2).abs() < 1e-9, "push = {push:?}");
        assert_eq!(push.j, 0.0);

        let apart = TileRect { i: 5.0, ..mover };
        assert!(wall.rectangle_collision(apart, 0.3, 0.0).is_zero());
        assert!(wall.rectangle_collision(mover, 0.1, 0.0).is_zero());
    }

    #[test]
    fn push_back_clamps_only_opposing_velocity() {
        let mut hero = instance(0.0, 0.0);
        hero.velocity = Vector3::new(2.0, 3.0, 0.0);
        hero.apply_push_back(PushBack { i: 0.5, j: -0.25 });
        assert_eq!(hero.position, Vector3::new(0.5, -0.25, 0.0));
        assert_eq!(hero.velocity, Vector3::new(2.0, 0.0, 0.0));
    }
}
