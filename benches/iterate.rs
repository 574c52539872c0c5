use criterion::*;
use std::hint::black_box;

use parallel_ecs::{EntityManager, Read, Write};

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    let mut manager = EntityManager::new(make_factory());
    populate(&mut manager, AGENTS_MED);
    manager.init_index::<(Read<Productivity>, Write<Wealth>)>();

    group.bench_function("read_write_pair_100k", |b| {
        b.iter(|| {
            manager.for_each_component_set::<(Read<Productivity>, Write<Wealth>)>(
                |(productivity, wealth)| {
                    wealth.value += productivity.rate;
                },
            );
            black_box(&manager);
        });
    });

    group.bench_function("cached_rows_100k", |b| {
        b.iter(|| {
            let mut rows = Vec::new();
            manager.get_components::<(Read<Wealth>,)>(&mut rows);
            black_box(rows);
        });
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
