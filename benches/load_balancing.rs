use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use throome::config::ServiceConfig;
use throome::{AdapterFactory, AdapterHandle, StrategyKind};
use tokio::runtime::Runtime;

/// Connected in-memory caches with weights 1..=4
fn connected_handles(rt: &Runtime, count: usize) -> Vec<AdapterHandle> {
    let factory = AdapterFactory::with_builtin();
    rt.block_on(async {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let mut config = ServiceConfig::new("memory_cache", format!("cache-{}", i), 6379);
            config.weight = (i % 4) as u32 + 1;
            let handle = factory.create(&config).unwrap();
            handle.connect(Duration::from_secs(1)).await.unwrap();
            handles.push(handle);
        }
        handles
    })
}

fn bench_strategies(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("strategy_select");

    for count in [4, 32, 256] {
        let handles = connected_handles(&rt, count);
        for kind in StrategyKind::ALL {
            let strategy = kind.build();
            group.bench_with_input(BenchmarkId::new(kind.as_str(), count), &handles, |b, handles| {
                b.iter(|| black_box(strategy.select(black_box(handles)).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
