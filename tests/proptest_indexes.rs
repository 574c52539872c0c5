//! Property tests for storage/index coherence.
//!
//! Random operation sequences are applied to an [`EntityManager`] next to a
//! plain model of the expected state; afterwards the sparse-set indexes
//! must agree with the model exactly (soundness and completeness), entity
//! liveness must match, and component addresses recorded at insertion time
//! must still be the addresses the indexes serve.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use parallel_ecs::{ComponentFactory, Entity, EntityManager, Read};

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Pos {
    x: f32,
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Vel {
    dx: f32,
}

#[derive(Default, Clone, Copy, PartialEq, Debug)]
struct Health {
    points: u32,
}

#[derive(Debug, Clone)]
enum EcsOp {
    Spawn,
    Despawn(usize),
    InsertVel(usize),
    RemoveVel(usize),
}

fn ecs_op_strategy() -> impl Strategy<Value = EcsOp> {
    prop_oneof![
        3 => Just(EcsOp::Spawn),
        1 => (0..64usize).prop_map(EcsOp::Despawn),
        2 => (0..64usize).prop_map(EcsOp::InsertVel),
        1 => (0..64usize).prop_map(EcsOp::RemoveVel),
    ]
}

fn make_factory() -> Arc<ComponentFactory> {
    let mut factory = ComponentFactory::new();
    factory.register_component::<Pos>();
    factory.register_component::<Vel>();
    factory.register_component::<Health>();
    Arc::new(factory)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn indexes_stay_coherent_with_storage(ops in prop::collection::vec(ecs_op_strategy(), 1..60)) {
        let mut manager = EntityManager::new(make_factory());
        // Build both indexes up front so every mutation goes through the
        // incremental maintenance path rather than a fresh scan.
        manager.init_index::<(Read<Pos>,)>();
        manager.init_index::<(Read<Pos>, Read<Vel>)>();

        let mut alive: Vec<Entity> = Vec::new();
        let mut removed: Vec<Entity> = Vec::new();
        let mut vel_addresses: HashMap<Entity, usize> = HashMap::new();

        for op in ops {
            match op {
                EcsOp::Spawn => {
                    let entity = manager.add_entity();
                    manager.add_component::<Pos>(entity);
                    alive.push(entity);
                }
                EcsOp::Despawn(pick) => {
                    if !alive.is_empty() {
                        let entity = alive.remove(pick % alive.len());
                        manager.remove_entity(entity);
                        vel_addresses.remove(&entity);
                        removed.push(entity);
                    }
                }
                EcsOp::InsertVel(pick) => {
                    if !alive.is_empty() {
                        let entity = alive[pick % alive.len()];
                        if !vel_addresses.contains_key(&entity) {
                            let address = manager
                                .add_component::<Vel>(entity)
                                .expect("Vel is registered");
                            vel_addresses.insert(entity, address.as_ptr() as usize);
                        }
                    }
                }
                EcsOp::RemoveVel(pick) => {
                    if !alive.is_empty() {
                        let entity = alive[pick % alive.len()];
                        if vel_addresses.remove(&entity).is_some() {
                            manager.remove_component::<Vel>(entity);
                        }
                    }
                }
            }
        }

        // Liveness matches the model.
        for &entity in &alive {
            prop_assert!(manager.has_entity(entity));
        }
        for &entity in &removed {
            prop_assert!(!manager.has_entity(entity));
        }

        // Index over [Pos]: exactly the live entities.
        let mut pos_rows = Vec::new();
        manager.get_components_with_entities::<(Read<Pos>,)>(&mut pos_rows);
        let mut indexed: Vec<Entity> = pos_rows.iter().map(|(entity, _)| *entity).collect();
        indexed.sort();
        let mut expected = alive.clone();
        expected.sort();
        prop_assert_eq!(indexed, expected);

        // Index over [Pos, Vel]: exactly the model's velocity holders, and
        // every cached address equals the address handed out at insertion.
        let mut vel_rows = Vec::new();
        manager.get_components_with_entities::<(Read<Pos>, Read<Vel>)>(&mut vel_rows);
        prop_assert_eq!(vel_rows.len(), vel_addresses.len());
        for (entity, (_, vel_ptr)) in &vel_rows {
            let recorded = vel_addresses.get(entity);
            prop_assert_eq!(recorded, Some(&(*vel_ptr as usize)));
        }
    }

    #[test]
    fn deferred_application_matches_immediate_application(
        toggles in prop::collection::vec((0..8usize, any::<bool>()), 1..40)
    ) {
        let factory = make_factory();
        let mut immediate = EntityManager::new(factory.clone());
        let mut deferred = EntityManager::new(factory);

        let immediate_entities: Vec<Entity> = (0..8).map(|_| immediate.add_entity()).collect();
        let deferred_entities: Vec<Entity> = (0..8).map(|_| deferred.add_entity()).collect();

        // Track presence so both managers only see valid transitions. A
        // batch applies its additions before its removals, so a slot may be
        // touched at most once per batch; a second touch starts a new one.
        let mut present = [false; 8];
        let mut touched_this_batch = [false; 8];
        for (slot, add) in toggles {
            if touched_this_batch[slot] {
                deferred.execute_scheduled_actions();
                touched_this_batch = [false; 8];
            }

            if add && !present[slot] {
                immediate.add_component::<Health>(immediate_entities[slot]);
                deferred.schedule_add_component::<Health>(deferred_entities[slot]);
                present[slot] = true;
                touched_this_batch[slot] = true;
            } else if !add && present[slot] {
                immediate.remove_component::<Health>(immediate_entities[slot]);
                deferred.schedule_remove_component::<Health>(deferred_entities[slot]);
                present[slot] = false;
                touched_this_batch[slot] = true;
            }
        }

        deferred.execute_scheduled_actions();

        for slot in 0..8 {
            prop_assert_eq!(
                immediate.has_component::<Health>(immediate_entities[slot]),
                deferred.has_component::<Health>(deferred_entities[slot])
            );
            prop_assert_eq!(
                immediate.has_component::<Health>(immediate_entities[slot]),
                present[slot]
            );
        }
    }
}
