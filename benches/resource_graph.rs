//! Criterion benchmarks for ResourceGraph
//!
//! These benchmarks measure declaring the full stack, ordering graphs of
//! different shapes, and materializing against the simulated provider.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use stratum::config::StackConfig;
use stratum::graph::{ResourceGraph, ResourceHandle, ResourceKind, ResourceSpec};
use stratum::materializer::Materializer;
use stratum::provider::{ProviderSet, SimulatedProvider};
use stratum::retry::RetryConfig;
use stratum::stack::Stack;

// =============================================================================
// Graph Setup Helpers
// =============================================================================

/// Chain topology: res-0 <- res-1 <- ... <- res-n
fn setup_chain_graph(n: usize) -> ResourceGraph {
    let mut graph = ResourceGraph::new();
    let mut previous: Option<ResourceHandle> = None;
    for i in 0..n {
        let deps: Vec<ResourceHandle> = previous.into_iter().collect();
        let handle = graph
            .declare(ResourceKind::RandomString, format!("res-{i}"), ResourceSpec::new(), &deps)
            .unwrap();
        previous = Some(handle);
    }
    graph
}

/// Fan-out topology: every leaf depends on one root
fn setup_fan_out_graph(n: usize) -> ResourceGraph {
    let mut graph = ResourceGraph::new();
    let root = graph
        .declare(ResourceKind::ContainerCluster, "root", ResourceSpec::new(), &[])
        .unwrap();
    for i in 0..n {
        graph
            .declare(ResourceKind::Namespace, format!("leaf-{i}"), ResourceSpec::new(), &[root])
            .unwrap();
    }
    graph
}

/// Layered DAG where each resource depends on up to three earlier ones
fn setup_random_dag(n: usize) -> ResourceGraph {
    let mut rng = StdRng::seed_from_u64(42);
    let mut graph = ResourceGraph::new();
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let deps: Vec<ResourceHandle> = if handles.is_empty() {
            Vec::new()
        } else {
            handles
                .choose_multiple(&mut rng, 3.min(handles.len()))
                .copied()
                .collect()
        };
        let handle = graph
            .declare(ResourceKind::CustomResource, format!("cr-{i}"), ResourceSpec::new(), &deps)
            .unwrap();
        handles.push(handle);
    }
    graph
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_declare_stack(c: &mut Criterion) {
    let config = StackConfig::new("acme-prod", "us-west1-a");
    c.bench_function("declare_stack", |b| {
        b.iter(|| {
            let stack = Stack::declare(black_box(&config)).unwrap();
            black_box(stack);
        });
    });
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");

    for size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));

        let chain = setup_chain_graph(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, graph| {
            b.iter(|| black_box(graph.topological_order().unwrap()));
        });

        let fan_out = setup_fan_out_graph(size);
        group.bench_with_input(BenchmarkId::new("fan_out", size), &fan_out, |b, graph| {
            b.iter(|| black_box(graph.topological_order().unwrap()));
        });

        let dag = setup_random_dag(size);
        group.bench_with_input(BenchmarkId::new("random_dag", size), &dag, |b, graph| {
            b.iter(|| black_box(graph.reverse_topological_order().unwrap()));
        });
    }

    group.finish();
}

fn bench_materialize_simulated(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let stack = Stack::declare(&StackConfig::new("acme-prod", "us-west1-a")).unwrap();

    let mut group = c.benchmark_group("materialize_simulated");
    group.throughput(Throughput::Elements(stack.graph().len() as u64));

    for concurrency in [1, 8, 32] {
        group.bench_with_input(
            BenchmarkId::new("full_stack", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    let materializer = Materializer::new(
                        ProviderSet::uniform(Arc::new(SimulatedProvider::new())),
                        stratum::materializer::MaterializerConfig {
                            concurrency,
                            retry: RetryConfig::none(),
                            ..Default::default()
                        },
                    );
                    let result = runtime
                        .block_on(materializer.materialize(stack.graph()))
                        .unwrap();
                    black_box(result);
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    benches,
    bench_declare_stack,
    bench_topological_order,
    bench_materialize_simulated,
);

criterion_main!(benches);
