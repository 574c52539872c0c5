#![allow(dead_code)]

use std::sync::Arc;

use parallel_ecs::{ComponentFactory, EntityManager, Write};

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;
pub const AGENTS_LARGE: usize = 1_000_000;

#[derive(Default, Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Default, Clone, Copy)]
pub struct Wealth {
    pub value: f64,
}

#[derive(Default, Clone, Copy)]
pub struct Productivity {
    pub rate: f64,
}

pub fn make_factory() -> Arc<ComponentFactory> {
    let mut factory = ComponentFactory::new();
    factory.register_component::<Position>();
    factory.register_component::<Wealth>();
    factory.register_component::<Productivity>();
    Arc::new(factory)
}

pub fn populate(manager: &mut EntityManager, agent_count: usize) {
    for _ in 0..agent_count {
        let entity = manager.add_entity();
        manager.add_component::<Position>(entity);
        manager.add_component::<Wealth>(entity);
        manager.add_component::<Productivity>(entity);
    }

    manager.for_each_component_set::<(Write<Wealth>, Write<Productivity>)>(
        |(wealth, productivity)| {
            wealth.value = 100.0;
            productivity.rate = 1.0;
        },
    );
}
