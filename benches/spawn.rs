use criterion::*;
use std::hint::black_box;

use parallel_ecs::EntityManager;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    group.throughput(Throughput::Elements(AGENTS_SMALL as u64));

    group.bench_function("spawn_3_components_10k", |b| {
        b.iter_batched(
            || EntityManager::new(make_factory()),
            |mut manager| {
                populate(&mut manager, AGENTS_SMALL);
                black_box(manager);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("spawn_despawn_churn_10k", |b| {
        b.iter_batched(
            || {
                let mut manager = EntityManager::new(make_factory());
                populate(&mut manager, AGENTS_SMALL);
                let entities = manager.collect_all_entities();
                (manager, entities)
            },
            |(mut manager, entities)| {
                for entity in entities {
                    manager.remove_entity(entity);
                }
                populate(&mut manager, AGENTS_SMALL);
                black_box(manager);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
