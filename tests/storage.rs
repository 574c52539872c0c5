use std::sync::Arc;

use parallel_ecs::{
    ComponentFactory, ComponentTypeId, Entity, EntityManager, Read, Write,
};

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Position {
    x: f32,
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Velocity {
    dx: f32,
}

#[derive(Default, Clone, Copy)]
struct Tag;

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Health {
    points: u32,
}

fn make_factory() -> Arc<ComponentFactory> {
    let mut factory = ComponentFactory::new();
    factory.register_component::<Position>();
    factory.register_component::<Velocity>();
    factory.register_component::<Tag>();
    factory.register_component::<Health>();
    Arc::new(factory)
}

fn set_position(manager: &mut EntityManager, entity: Entity, x: f32) {
    let (position,) = manager.get_entity_components::<(Write<Position>,)>(entity);
    position.expect("entity has a Position").x = x;
}

fn set_velocity(manager: &mut EntityManager, entity: Entity, dx: f32) {
    let (velocity,) = manager.get_entity_components::<(Write<Velocity>,)>(entity);
    velocity.expect("entity has a Velocity").dx = dx;
}

#[test]
fn basic_query_returns_matches_in_insertion_order() {
    let mut manager = EntityManager::new(make_factory());

    let e1 = manager.add_entity();
    manager.add_component::<Position>(e1);
    set_position(&mut manager, e1, 1.0);

    let e2 = manager.add_entity();
    manager.add_component::<Position>(e2);
    set_position(&mut manager, e2, 2.0);
    manager.add_component::<Velocity>(e2);
    set_velocity(&mut manager, e2, 3.0);

    let mut positions = Vec::new();
    manager.for_each_component_set_with_entity::<(Read<Position>,)>(|entity, (position,)| {
        positions.push((entity, position.x));
    });
    assert_eq!(positions, vec![(e1, 1.0), (e2, 2.0)]);

    let mut moving = Vec::new();
    manager.for_each_component_set_with_entity::<(Read<Position>, Read<Velocity>)>(
        |entity, (position, velocity)| {
            moving.push((entity, position.x, velocity.dx));
        },
    );
    assert_eq!(moving, vec![(e2, 2.0, 3.0)]);
}

#[test]
fn removal_swaps_last_entity_into_place_and_recycles_the_id() {
    let mut manager = EntityManager::new(make_factory());

    let e1 = manager.add_entity();
    let e2 = manager.add_entity();
    let e3 = manager.add_entity();
    for &entity in &[e1, e2, e3] {
        manager.add_component::<Tag>(entity);
    }

    manager.init_index::<(Read<Tag>,)>();
    manager.remove_entity(e2);

    let mut tagged = Vec::new();
    manager.for_each_component_set_with_entity::<(Read<Tag>,)>(|entity, _| {
        tagged.push(entity);
    });
    assert_eq!(tagged.len(), 2);
    assert_eq!(tagged, vec![e1, e3]);

    // The freed raw id is reused with a bumped version.
    let recycled = manager.add_entity();
    assert_eq!(recycled.raw_id(), e2.raw_id());
    assert_eq!(recycled.version(), e2.version() + 1);
}

#[test]
fn stale_handles_fail_the_liveness_check() {
    let mut manager = EntityManager::new(make_factory());

    let original = manager.add_entity();
    manager.remove_entity(original);
    let replacement = manager.add_entity();

    assert_eq!(replacement.raw_id(), original.raw_id());
    assert!(!manager.has_entity(original));
    assert!(manager.has_entity(replacement));
}

#[test]
fn component_addresses_are_stable_across_growth() {
    let mut manager = EntityManager::new(make_factory());

    let entity = manager.add_entity();
    let recorded = manager.add_component::<Position>(entity).expect("registered type");

    // Push both the columns and the pool through several growth steps.
    for _ in 0..5000 {
        let other = manager.add_entity();
        manager.add_component::<Position>(other);
    }

    let (position,) = manager.get_entity_components::<(Read<Position>,)>(entity);
    let observed = position.expect("still present") as *const Position;
    assert_eq!(observed, recorded.as_ptr() as *const Position);

    let mut cached = Vec::new();
    manager.get_components_with_entities::<(Read<Position>,)>(&mut cached);
    let (_, (via_index,)) = cached
        .iter()
        .find(|(candidate, _)| *candidate == entity)
        .expect("entity is indexed");
    assert_eq!(*via_index as *const Position, recorded.as_ptr() as *const Position);
}

#[test]
fn add_then_remove_leaves_the_entity_observationally_unchanged() {
    let mut manager = EntityManager::new(make_factory());

    let entity = manager.add_entity();
    manager.add_component::<Position>(entity);

    manager.init_index::<(Read<Health>,)>();
    manager.add_component::<Health>(entity);
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 1);

    manager.remove_component::<Health>(entity);
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 0);
    assert_eq!(manager.get_matching_entities_count::<(Read<Position>,)>(), 1);

    let (health,) = manager.get_entity_components::<(Read<Health>,)>(entity);
    assert!(health.is_none());

    // The slot is reusable.
    manager.add_component::<Health>(entity);
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 1);
}

#[test]
fn entity_lifecycle_round_trip_restores_the_free_list() {
    let mut manager = EntityManager::new(make_factory());

    let entity = manager.add_entity();
    let raw_id = entity.raw_id();
    manager.remove_entity(entity);

    let next = manager.add_entity();
    assert_eq!(next.raw_id(), raw_id);
    assert_eq!(next.version(), entity.version() + 1);
}

#[test]
fn transfer_moves_components_without_copying() {
    let factory = make_factory();
    let mut source = EntityManager::new(factory.clone());
    let mut target = EntityManager::new(factory);

    let entity = source.add_entity();
    let recorded = source.add_component::<Position>(entity).expect("registered type");
    set_position(&mut source, entity, 7.0);

    let transferred = source.transfer_entity_to(&mut target, entity);

    assert!(!source.has_entity(entity));
    assert!(target.has_entity(transferred));

    let (position,) = target.get_entity_components::<(Read<Position>,)>(transferred);
    let position = position.expect("component moved");
    assert_eq!(position.x, 7.0);
    assert_eq!(position as *const Position, recorded.as_ptr() as *const Position);

    // The source slot is free for reuse.
    let reused = source.add_entity();
    assert_eq!(reused.raw_id(), entity.raw_id());
}

#[test]
fn scheduled_actions_are_invisible_until_executed() {
    let mut manager = EntityManager::new(make_factory());
    let entity = manager.add_entity();

    manager.init_index::<(Read<Health>,)>();
    manager.schedule_add_component::<Health>(entity);
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 0);

    manager.execute_scheduled_actions();
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 1);

    manager.schedule_remove_component::<Health>(entity);
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 1);

    manager.execute_scheduled_actions();
    assert_eq!(manager.get_matching_entities_count::<(Read<Health>,)>(), 0);
}

#[test]
fn unindexed_scan_matches_dynamic_signatures() {
    let mut manager = EntityManager::new(make_factory());

    let plain = manager.add_entity();
    manager.add_component::<Position>(plain);

    let moving = manager.add_entity();
    manager.add_component::<Position>(moving);
    manager.add_component::<Velocity>(moving);

    let signature = vec![ComponentTypeId::of::<Position>(), ComponentTypeId::of::<Velocity>()];
    let mut matches = Vec::new();
    manager.get_entities_having_components(&signature, &mut matches);
    assert_eq!(matches, vec![moving]);
}

#[test]
fn collect_all_entities_lists_live_entities_only() {
    let mut manager = EntityManager::new(make_factory());
    assert!(!manager.has_any_entity());

    let e1 = manager.add_entity();
    let e2 = manager.add_entity();
    let e3 = manager.add_entity();
    manager.remove_entity(e2);

    assert!(manager.has_any_entity());
    assert_eq!(manager.collect_all_entities(), vec![e1, e3]);
}

#[test]
fn empty_components_are_indexed_through_the_sentinel() {
    let mut manager = EntityManager::new(make_factory());

    let first = manager.add_entity();
    let second = manager.add_entity();
    manager.add_component::<Tag>(first);
    manager.add_component::<Tag>(second);

    assert_eq!(manager.get_matching_entities_count::<(Read<Tag>,)>(), 2);
    assert!(manager.has_component::<Tag>(first));

    manager.remove_component::<Tag>(first);
    assert_eq!(manager.get_matching_entities_count::<(Read<Tag>,)>(), 1);
}

#[test]
fn clear_drops_everything() {
    let mut manager = EntityManager::new(make_factory());

    let entity = manager.add_entity();
    manager.add_component::<Position>(entity);
    manager.init_index::<(Read<Position>,)>();

    manager.clear();

    assert!(!manager.has_entity(entity));
    assert!(!manager.has_any_entity());
    assert_eq!(manager.get_matching_entities_count::<(Read<Position>,)>(), 0);
}

#[test]
fn clear_caches_trims_trailing_slots() {
    let mut manager = EntityManager::new(make_factory());

    let keep = manager.add_entity();
    manager.add_component::<Position>(keep);
    let tail = manager.add_entity();
    manager.add_component::<Position>(tail);
    manager.add_component::<Velocity>(tail);

    manager.remove_entity(tail);
    manager.clear_caches();

    // The velocity column lost its only occupant and disappears.
    let velocity_column = manager.components_data().column(ComponentTypeId::of::<Velocity>());
    assert!(velocity_column.is_empty());
    let position_column = manager.components_data().column(ComponentTypeId::of::<Position>());
    assert_eq!(position_column.len(), keep.raw_id() as usize + 1);
}

#[test]
fn copyable_components_support_deep_manager_copies() {
    let mut factory = ComponentFactory::new();
    factory.register_copyable_component::<Position>();
    let factory = Arc::new(factory);

    let mut original = EntityManager::new(factory.clone());
    let entity = original.add_entity();
    original.add_component::<Position>(entity);
    set_position(&mut original, entity, 4.0);

    let mut copy = EntityManager::new(factory);
    copy.copy_entities_from(&original);

    assert!(copy.has_entity(entity));
    let (copied,) = copy.get_entity_components::<(Read<Position>,)>(entity);
    let copied = copied.expect("component cloned");
    assert_eq!(copied.x, 4.0);

    let (original_ref,) = original.get_entity_components::<(Read<Position>,)>(entity);
    assert!(!std::ptr::eq(copied, original_ref.expect("still present")));

    // The copy is independent.
    set_position(&mut copy, entity, 9.0);
    let (original_ref,) = original.get_entity_components::<(Read<Position>,)>(entity);
    assert_eq!(original_ref.expect("still present").x, 4.0);
}

#[test]
fn get_all_entity_components_lists_types_and_addresses() {
    let mut manager = EntityManager::new(make_factory());
    let entity = manager.add_entity();
    manager.add_component::<Position>(entity);
    manager.add_component::<Velocity>(entity);

    let mut components = manager.get_all_entity_components(entity);
    components.sort_by_key(|(type_id, _)| *type_id);

    let mut expected = vec![ComponentTypeId::of::<Position>(), ComponentTypeId::of::<Velocity>()];
    expected.sort();
    let types: Vec<_> = components.iter().map(|(type_id, _)| *type_id).collect();
    assert_eq!(types, expected);
    assert!(components.iter().all(|(_, address)| !address.is_null()));
}
