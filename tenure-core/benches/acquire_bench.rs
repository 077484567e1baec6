use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use tenure_core::infrastructure_in_memory::InMemoryLockStore;
use tenure_core::{ClientId, Lock, LockCoordinator, ResourceId};

fn bench_acquire_release(c: &mut Criterion) {
    let lock = LockCoordinator::new(InMemoryLockStore::new(), Duration::from_secs(30));
    let resource = ResourceId::new("bench/resource");
    let client = ClientId::new("bench-client");

    c.bench_function("acquire_release_cycle", |b| {
        b.iter(|| {
            let lease = lock.acquire_no_wait(&resource, &client).unwrap();
            black_box(lock.release(&lease).unwrap())
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    let lock = LockCoordinator::new(InMemoryLockStore::new(), Duration::from_secs(30));
    let resource = ResourceId::new("bench/held");
    lock.acquire_no_wait(&resource, &ClientId::new("holder")).unwrap();
    let client = ClientId::new("bench-client");

    c.bench_function("acquire_no_wait_held", |b| {
        b.iter(|| black_box(lock.acquire_no_wait(&resource, &client).is_err()))
    });
}

fn bench_many_resources(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_throughput");

    for resource_count in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("resources", resource_count),
            &resource_count,
            |b, &count| {
                b.iter(|| {
                    let lock = LockCoordinator::new(InMemoryLockStore::new(), Duration::from_secs(30));
                    let client = ClientId::new("bench-client");
                    for i in 0..count {
                        let resource = ResourceId::new(format!("bench/{}", i));
                        lock.acquire_no_wait(&resource, &client).unwrap();
                    }
                    black_box(lock.store().len())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_contended, bench_many_resources);
criterion_main!(benches);
