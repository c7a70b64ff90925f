use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use throome::config::{ClusterConfig, ServiceConfig};
use throome::{AdapterFactory, Capability, Config, Gateway, Router, StrategyKind};
use tokio::runtime::Runtime;

fn cluster(services: usize, strategy: StrategyKind) -> ClusterConfig {
    (0..services).fold(
        ClusterConfig::new("bench", "Bench").with_strategy(strategy.as_str()),
        |cluster, i| {
            cluster.with_service(
                format!("cache-{:03}", i),
                ServiceConfig::new("memory_cache", "localhost", 7000 + i as u16),
            )
        },
    )
}

fn load_router(rt: &Runtime, services: usize, strategy: StrategyKind) -> (Gateway, Arc<Router>) {
    rt.block_on(async {
        let gateway = Gateway::new(&Config::default(), AdapterFactory::with_builtin()).unwrap();
        let router = gateway
            .load_cluster(cluster(services, strategy))
            .await
            .unwrap();
        (gateway, router)
    })
}

/// Routing by capability and by name
fn bench_route(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("router_route");

    for services in [4, 64] {
        for kind in StrategyKind::ALL {
            let (_gateway, router) = load_router(&rt, services, kind);
            group.bench_with_input(
                BenchmarkId::new(kind.as_str(), services),
                &router,
                |b, router| {
                    b.to_async(&rt)
                        .iter(|| async move { black_box(router.route(Capability::Cache, None).await.unwrap()) })
                },
            );
        }

        let (_gateway, router) = load_router(&rt, services, StrategyKind::RoundRobin);
        group.bench_with_input(BenchmarkId::new("by_name", services), &router, |b, router| {
            b.to_async(&rt).iter(|| async move {
                black_box(router.route(Capability::Cache, Some("cache-001")).await.unwrap())
            })
        });
    }

    group.finish();
}

/// A full routed cache round trip through the in-memory backend
fn bench_routed_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_gateway, router) = load_router(&rt, 8, StrategyKind::LeastConnections);
    let router = &router;

    c.bench_function("routed_set_get", |b| {
        b.to_async(&rt).iter(|| async move {
            let handle = router.route(Capability::Cache, None).await.unwrap();
            let cache = handle.as_cache().unwrap();
            cache.set("bench:key", "payload", None).await.unwrap();
            black_box(cache.get("bench:key").await.unwrap())
        })
    });
}

fn bench_health_check_all(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("health_check_all");

    for services in [4, 64] {
        let (_gateway, router) = load_router(&rt, services, StrategyKind::RoundRobin);
        group.bench_with_input(BenchmarkId::from_parameter(services), &router, |b, router| {
            b.to_async(&rt)
                .iter(|| async move { black_box(router.health_check_all().await) })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_route, bench_routed_cache, bench_health_check_all);
criterion_main!(benches);
