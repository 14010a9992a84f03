use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use stixrule::{
    catalog, BundleBuilder, InMemoryGraph, InferenceLifecycle, RelationLookup, Relationship,
    RelationshipEvent, RuleManager, RuleRuntime, RuntimeConfig, StixObject,
};

/// A graph with `fan_in` actors targeting one organization.
fn make_graph(fan_in: usize) -> (Arc<InMemoryGraph>, RuleManager) {
    let graph = Arc::new(InMemoryGraph::new());
    for i in 0..fan_in {
        graph
            .upsert_relationship(Relationship::new(format!("t{i}"), "targets", format!("apt{i}"), "acme"))
            .unwrap();
    }
    let manager = RuleManager::new(
        catalog::builtin_rules(),
        Arc::clone(&graph) as Arc<dyn RelationLookup>,
        Arc::clone(&graph) as Arc<dyn InferenceLifecycle>,
    )
    .unwrap();
    (graph, manager)
}

fn bench_dispatch_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_fan_in");
    for fan_in in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(fan_in as u64));
        group.bench_with_input(BenchmarkId::from_parameter(fan_in), &fan_in, |b, &fan_in| {
            b.iter_custom(|iters| {
                // Fresh graph per sample.
                let (graph, manager) = make_graph(fan_in);
                let start = Instant::now();
                for i in 0..iters {
                    let rel = Relationship::new(format!("l{i}"), "located-at", "acme", format!("c{i}"));
                    graph.upsert_relationship(rel.clone()).unwrap();
                    manager
                        .dispatch(&RelationshipEvent::from_relationship(&rel))
                        .unwrap();
                }
                start.elapsed()
            });
        });
    }
    group.finish();
}

fn bench_runtime_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime_parallel");
    group.throughput(Throughput::Elements(64));
    group.bench_function("64_events_4_workers", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let (graph, manager) = make_graph(8);
                let runtime = RuleRuntime::start(
                    manager,
                    &RuntimeConfig {
                        workers: 4,
                        queue_capacity: 128,
                    },
                )
                .unwrap();
                let events: Vec<_> = (0..64)
                    .map(|i| {
                        let rel = Relationship::new(format!("l{i}"), "located-at", "acme", format!("c{i}"));
                        graph.upsert_relationship(rel.clone()).unwrap();
                        RelationshipEvent::from_relationship(&rel)
                    })
                    .collect();

                let start = Instant::now();
                let handles: Vec<_> = events.into_iter().map(|e| runtime.submit(e).unwrap()).collect();
                for handle in handles {
                    handle.join().unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });
    group.finish();
}

fn bench_bundle_merge_check(c: &mut Criterion) {
    let mut builder = BundleBuilder::new();
    for i in 0..1_000 {
        builder.add_object(
            StixObject::new(json!({"id": format!("indicator--{i}"), "type": "indicator", "pattern": "[x]"}))
                .unwrap(),
        );
    }
    let candidates: Vec<StixObject> = (0..10)
        .map(|i| {
            StixObject::new(json!({"id": format!("indicator--{i}"), "type": "indicator", "pattern": "[x]"}))
                .unwrap()
        })
        .collect();

    c.bench_function("bundle/can_add_10_into_1000", |b| {
        b.iter(|| builder.can_add_objects(&candidates));
    });
    c.bench_function("bundle/build_1000", |b| {
        b.iter(|| builder.build());
    });
}

criterion_group!(
    dispatch,
    bench_dispatch_fan_in,
    bench_runtime_parallel,
    bench_bundle_merge_check
);
criterion_main!(dispatch);
