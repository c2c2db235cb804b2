use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;
use tokio::runtime::Runtime;

use sparestock_core::{ActorId, Money, PartId};
use sparestock_infra::{
    InMemoryStockStore, PartRegistry, ReportAggregator, StockConfig, StockMutator,
};
use sparestock_inventory::{ApplyMovement, NewPart};

const ACTOR: ActorId = ActorId::new(1);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// A store with `parts` registered parts, each stocked with `stock` units.
fn seeded_store(rt: &Runtime, parts: usize, stock: i64) -> (Arc<InMemoryStockStore>, Vec<PartId>) {
    let config = StockConfig::default();
    let store = Arc::new(InMemoryStockStore::new());
    let registry = PartRegistry::new(store.clone(), &config);
    let mutator = StockMutator::new(store.clone(), &config);

    let ids = rt.block_on(async {
        let mut ids = Vec::with_capacity(parts);
        for i in 0..parts {
            let draft = NewPart::new(
                format!("part-{i}"),
                format!("category-{}", i % 8),
                Money::from_cents(100 + i as i64).unwrap(),
            )
            .with_minimum_quantity((i % 20) as i64);
            let part = registry.register_part(draft).await.unwrap();
            mutator
                .apply_movement(ApplyMovement::stock_in(part.part_id(), stock, ACTOR))
                .await
                .unwrap();
            ids.push(part.part_id());
        }
        ids
    });
    (store, ids)
}

fn bench_apply_movement_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("apply_movement_latency");
    group.sample_size(1000);

    group.bench_function("stock_in_single_part", |b| {
        let (store, ids) = seeded_store(&rt, 1, 0);
        let mutator = StockMutator::new(store, &StockConfig::default());
        b.iter(|| {
            let receipt = rt
                .block_on(mutator.apply_movement(ApplyMovement::stock_in(ids[0], 1, ACTOR)))
                .unwrap();
            black_box(receipt);
        });
    });

    group.bench_function("rejected_stock_out", |b| {
        let (store, ids) = seeded_store(&rt, 1, 1);
        let mutator = StockMutator::new(store, &StockConfig::default());
        b.iter(|| {
            let err = rt
                .block_on(mutator.apply_movement(ApplyMovement::stock_out(ids[0], 2, ACTOR)))
                .unwrap_err();
            black_box(err);
        });
    });

    group.finish();
}

fn bench_contended_throughput(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("contended_stock_in");

    for writers in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(*writers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(writers), writers, |b, &writers| {
            let (store, ids) = seeded_store(&rt, 1, 0);
            let mutator = Arc::new(StockMutator::new(store, &StockConfig::default().with_max_retries(64)));
            b.iter(|| {
                rt.block_on(async {
                    let mut handles = Vec::with_capacity(writers);
                    for _ in 0..writers {
                        let mutator = mutator.clone();
                        let part_id = ids[0];
                        handles.push(tokio::spawn(async move {
                            mutator
                                .apply_movement(ApplyMovement::stock_in(part_id, 1, ACTOR))
                                .await
                        }));
                    }
                    for handle in handles {
                        black_box(handle.await.unwrap().unwrap());
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_reports(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reports");

    for parts in [100usize, 1_000].iter() {
        let (store, _) = seeded_store(&rt, *parts, 10);
        let reports = ReportAggregator::new(store, &StockConfig::default());

        group.bench_with_input(BenchmarkId::new("value_summary", parts), parts, |b, _| {
            b.iter(|| black_box(rt.block_on(reports.value_summary()).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("low_stock_items", parts), parts, |b, _| {
            b.iter(|| black_box(rt.block_on(reports.low_stock_items()).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("reconcile", parts), parts, |b, _| {
            b.iter(|| black_box(rt.block_on(reports.reconcile()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_apply_movement_latency,
    bench_contended_throughput,
    bench_reports
);
criterion_main!(benches);
