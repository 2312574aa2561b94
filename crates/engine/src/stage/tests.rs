use std::collections::BTreeSet;

use serde_json::json;

use super::test_support::{config, yard_assets, yard_data, yard_stage};
use super::*;

fn filter(value: serde_json::Value) -> Properties {
    value.as_object().cloned().expect("object filter")
}

fn instance_by_entity(stage: &Stage, entity_id: &str) -> InstanceId {
    stage
        .instances_of(entity_id, None)
        .expect("entity")
        .into_iter()
        .next()
        .expect("instance")
}

#[test]
fn load_registers_tiles_instances_and_physics() {
    let stage = yard_stage(4, &[((1, 1), "wall")]);
    assert_eq!(stage.name(), "yard");
    assert_eq!(stage.tile_map().len(), 16);
    assert_eq!(stage.instance_count(), 2);
    assert_eq!(stage.buckets().len(), 18);

    let hero = instance_by_entity(&stage, "hero");
    let crate_id = instance_by_entity(&stage, "crate");
    assert!(stage.is_physics_enabled(hero));
    assert!(!stage.is_physics_enabled(crate_id));
    assert!(stage.buckets().has_eraser(TileCoord::new(1, 1, 0)));
    assert!(!stage.buckets().has_eraser(TileCoord::new(0, 0, 0)));

    let element = stage
        .instance(hero)
        .and_then(Instance::element)
        .and_then(|id| stage.buckets().element(id))
        .expect("hero element");
    assert_eq!(element.position(), (32, 32, 0));
    assert_eq!(element.size(), (16, 16));
}

#[test]
fn unknown_references_fail_fast() {
    let mut data = yard_data(2, &[]);
    data.map
        .entry(0)
        .or_default()
        .entry(9)
        .or_default()
        .insert(9, "lava".into());
    let error = Stage::new(&data, config(64, 64), &yard_assets()).err();
    assert_eq!(error, Some(StageError::UnknownTile("lava".to_string())));

    let mut stage = yard_stage(2, &[]);
    assert_eq!(
        stage.create_instance("dragon", 0.0, 0.0, 0.0),
        Err(StageError::UnknownEntity("dragon".to_string()))
    );
    assert_eq!(
        stage.put_tile(TileCoord::new(0, 0, 0), "lava"),
        Err(StageError::UnknownTile("lava".to_string()))
    );
    assert!(matches!(
        Stage::new(
            &yard_data(1, &[]),
            StageConfig {
                bucket_width_factor: 0.5,
                ..config(64, 64)
            },
            &yard_assets()
        ),
        Err(StageError::InvalidBucketFactor(_))
    ));
}

#[test]
fn wall_slide_stops_vertical_motion_only() {
    let mut stage = yard_stage(3, &[((0, 1), "wall")]);
    let hero = stage.create_instance("hero", 0.5, 0.8, 0.0).expect("hero");
    {
        let instance = stage.instance_mut(hero).expect("instance");
        instance.previous_position = Vector3::new(0.5, 0.3, 0.0);
        instance.velocity = Vector3::new(0.7, 2.0, 0.0);
    }

    let probe = stage.test_tile_collision(hero, None).expect("probe");
    assert_eq!(probe.i, 0.0);
    assert!((probe.j + 0.3).abs() < 1e-9);
    assert!((stage.instance(hero).expect("hero").position.j - 0.8).abs() < 1e-12);

    stage.tile_collision(hero, None).expect("collision");
    let instance = stage.instance(hero).expect("hero");
    assert!((instance.position.i - 0.5).abs() < 1e-12);
    assert!((instance.position.j - 0.5).abs() < 1e-9);
    assert_eq!(instance.velocity.i, 0.7);
    assert_eq!(instance.velocity.j, 0.0);
}

#[test]
fn collision_leaves_no_overlap_with_solid_tiles() {
    let walls = [((3, 2), "wall"), ((3, 3), "wall"), ((3, 4), "wall")];
    let mut stage = yard_stage(6, &walls);
    let hero = stage.create_instance("hero", 2.0, 3.0, 0.0).expect("hero");
    stage.instance_mut(hero).expect("hero").velocity = Vector3::new(4.0, 0.0, 0.0);

    for _ in 0..10 {
        stage.tick(1.0 / 60.0);
        stage.tile_collision(hero, None).expect("collision");
        let rect = stage.instance(hero).expect("hero").rect();
        for ((i, j), _) in walls {
            let overlap = rect.i < f64::from(i + 1) - 1e-9
                && f64::from(i) < rect.i + rect.di - 1e-9
                && rect.j < f64::from(j + 1)
                && f64::from(j) < rect.j + rect.dj;
            assert!(!overlap, "rect {rect:?} overlaps wall ({i},{j})");
        }
    }
    assert_eq!(stage.instance(hero).expect("hero").velocity.i, 0.0);
}

#[test]
fn zero_acceleration_integrates_linearly() {
    let mut stage = yard_stage(2, &[]);
    let hero = instance_by_entity(&stage, "hero");
    {
        let instance = stage.instance_mut(hero).expect("hero");
        instance.velocity = Vector3::new(0.5, -0.25, 0.0);
        instance.uniform_velocity = Vector3::new(0.25, 0.0, 0.0);
    }
    for _ in 0..16 {
        stage.tick(0.0625);
    }
    assert_eq!(
        stage.instance(hero).expect("hero").position,
        Vector3::new(2.75, 1.75, 0.0)
    );
}

#[test]
fn remove_is_idempotent() {
    let mut stage = yard_stage(2, &[]);
    let hero = instance_by_entity(&stage, "hero");
    let elements = stage.buckets().len();

    assert!(stage.remove_instance(hero));
    assert!(!stage.remove_instance(hero));
    assert!(stage.instance(hero).is_none());
    assert!(!stage.is_physics_enabled(hero));
    assert_eq!(stage.buckets().len(), elements - 1);
    assert_eq!(
        stage.update_instance(hero),
        Err(StageError::InstanceRemoved(hero))
    );
    assert_eq!(
        stage.update_instance(InstanceId(999)),
        Err(StageError::UnknownInstance(InstanceId(999)))
    );
}

#[test]
fn replace_preserves_motion_and_retires_predecessor() {
    let mut stage = yard_stage(2, &[]);
    let hero = instance_by_entity(&stage, "hero");
    {
        let instance = stage.instance_mut(hero).expect("hero");
        instance.velocity = Vector3::new(1.0, 2.0, 0.0);
        instance.uniform_velocity = Vector3::new(0.5, 0.0, 0.0);
        instance.acceleration = Vector3::new(0.0, -9.8, 0.0);
    }
    stage.tick(0.1);
    let before = stage.instance(hero).expect("hero").clone();

    let successor = stage.replace_instance(hero, "crate").expect("replace");
    let after = stage.instance(successor).expect("successor");
    assert_eq!(after.entity_id(), "crate");
    assert_eq!(after.position, before.position);
    assert_eq!(after.previous_position, before.previous_position);
    assert_eq!(after.velocity, before.velocity);
    assert_eq!(after.uniform_velocity, before.uniform_velocity);
    assert_eq!(after.acceleration, before.acceleration);
    assert_eq!(after.properties, before.properties);
    assert!(after.element().is_some());
    assert!(!stage.is_physics_enabled(successor));

    assert!(stage.instance(hero).is_none());
    assert_eq!(
        stage.replace_instance(hero, "hero"),
        Err(StageError::InstanceRemoved(hero))
    );
}

#[test]
fn fork_copies_state_under_new_identity() {
    let mut stage = yard_stage(2, &[]);
    let hero = instance_by_entity(&stage, "hero");
    stage.instance_mut(hero).expect("hero").velocity = Vector3::new(3.0, 0.0, 0.0);

    let twin = stage.fork_instance(hero, None).expect("fork");
    let ghost = stage.fork_instance(hero, Some("ghost")).expect("fork");
    assert_ne!(twin, hero);
    assert_eq!(stage.instance_count(), 4);

    let original = stage.instance(hero).expect("hero");
    let copy = stage.instance(twin).expect("twin");
    assert_eq!(copy.entity_id(), "hero");
    assert_eq!(copy.velocity, original.velocity);
    assert_ne!(copy.element(), original.element());
    assert_eq!(stage.instance(ghost).expect("ghost").rect().di, 0.5);
    assert!(stage.is_physics_enabled(twin));
}

#[test]
fn property_queries_fall_back_to_entity() {
    let mut stage = yard_stage(2, &[]);
    stage.create_instance("hero", 1.0, 1.0, 0.0).expect("hero");

    let blue = stage.instances(Some(&filter(json!({ "team": "blue" }))));
    assert_eq!(blue.len(), 2);
    let named = stage.instances(Some(&filter(json!({ "name": "first", "team": "blue" }))));
    assert_eq!(named.len(), 1);
    let nested = stage.instances(Some(&filter(json!({ "stats": { "hp": 3 } }))));
    assert_eq!(nested.len(), 2);
    assert!(stage
        .instances(Some(&filter(json!({ "stats": { "hp": 4 } }))))
        .is_empty());
    assert_eq!(stage.instances(None).len(), 3);

    assert_eq!(stage.entities(Some(&filter(json!({ "team": "red" })))), vec!["ghost"]);
    assert_eq!(stage.entities(None), vec!["crate", "ghost", "hero"]);
    assert_eq!(
        stage.instances_of("crate", None).expect("crate").len(),
        1
    );
    assert!(stage.instances_of("dragon", None).is_err());

    let mut touched = 0;
    stage.for_each_instance(Some(&filter(json!({ "team": "blue" }))), |instance| {
        instance.velocity.k = 1.0;
        touched += 1;
    });
    assert_eq!(touched, 2);
}

#[test]
fn tile_edits_keep_map_and_buckets_in_step() {
    let mut stage = yard_stage(3, &[((1, 1), "wall")]);
    let tile_elements = |stage: &Stage| {
        stage
            .buckets()
            .elements()
            .filter(|(_, element)| matches!(element.kind(), ElementKind::Tile { .. }))
            .count()
    };
    assert_eq!(tile_elements(&stage), stage.tile_map().len());

    stage.put_tile(TileCoord::new(1, 1, 0), "sand").expect("mutable over");
    stage.put_tile(TileCoord::new(0, 0, 0), "wall").expect("immutable over");
    stage.put_tile(TileCoord::new(5, 5, 2), "grass").expect("new layer");
    assert_eq!(stage.tile_map().layers(), vec![0, 2]);
    assert_eq!(stage.tile_map().get_at(TileCoord::new(1, 1, 0)), Some("sand"));
    assert_eq!(tile_elements(&stage), stage.tile_map().len());

    assert!(stage.remove_tile(TileCoord::new(0, 0, 0)));
    assert!(!stage.remove_tile(TileCoord::new(0, 0, 0)));
    assert!(stage.remove_tile(TileCoord::new(2, 2, 0)));
    assert_eq!(tile_elements(&stage), stage.tile_map().len());
    assert_eq!(stage.tile_map().len(), 8);
}

#[test]
fn enumeration_matches_brute_force_visibility() {
    let mut stage = yard_stage(12, &[((3, 3), "water")]);
    stage.create_instance("hero", 5.5, 5.5, 1.0).expect("hero");

    for (dx, dy) in [(0.0, 0.0), (-40.0, -8.0), (-100.0, -100.0), (30.0, 20.0)] {
        stage.view_mut().drag_to(dx, dy);
        let visible = stage.view().visible_rect();
        let expected: BTreeSet<ElementId> = stage
            .buckets()
            .elements()
            .filter(|(_, element)| element.rect().intersects(&visible))
            .map(|(id, _)| id)
            .collect();

        let mut seen = BTreeSet::new();
        let mut depths = Vec::new();
        stage
            .buckets()
            .for_each_element(visible, 0.0, stage.frames(), |element| {
                assert!(seen.insert(element.id), "element enumerated twice");
                depths.push(element.z);
            });
        assert_eq!(seen, expected, "origin ({dx}, {dy})");
        assert!(depths.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}

#[test]
fn update_moves_elements_with_instances() {
    let mut stage = yard_stage(2, &[]);
    let hero = instance_by_entity(&stage, "hero");
    stage.instance_mut(hero).expect("hero").uniform_velocity = Vector3::new(1.0, 0.0, 0.0);
    stage.tick(0.5);
    stage.update();
    let element = stage
        .instance(hero)
        .and_then(Instance::element)
        .and_then(|id| stage.buckets().element(id))
        .expect("element");
    assert_eq!(element.position(), (40, 32, 0));
}

#[test]
fn range_limits_simulation_to_centre() {
    let mut stage = yard_stage(2, &[]);
    let near = stage.create_instance("hero", 2.0, 2.0, 0.0).expect("near");
    let far = stage.create_instance("hero", 30.0, 30.0, 0.0).expect("far");
    for id in [near, far] {
        stage.instance_mut(id).expect("hero").velocity = Vector3::new(1.0, 0.0, 0.0);
    }

    let range = Range::new(32.0, 32.0);
    stage.tick_range(range, 1.0);
    stage.update_range(range);
    assert_eq!(stage.instance(near).expect("near").position.i, 3.0);
    assert_eq!(stage.instance(far).expect("far").position.i, 30.0);
}

#[test]
fn view_follows_instance() {
    let mut stage = yard_stage(2, &[]);
    let hero = stage.create_instance("hero", 10.0, 1.0, 0.0).expect("hero");
    let sync = stage
        .view()
        .create_synchronizer(32.0, 32.0, 0.0)
        .expect("sync");
    stage.synchronize_view(&sync, hero).expect("sync tick");
    let (x, _) = stage.view().origin();
    assert_eq!(x, -128.0);
}
