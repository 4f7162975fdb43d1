//! # Serializer Benchmarks
//!
//! Performance benchmarks for amber-core serialization and observation.
//!
//! Run with: `cargo bench -p amber-core`

use amber_core::{
    Builtin, Class, ManualClock, MutationObserver, Serializer, TimerQueue, TypeRegistry, Value,
};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::rc::Rc;

/// A list of `size` domain instances, each holding a date and a small map.
fn create_inventory(item: &Rc<Class>, size: usize) -> Value {
    let items = (0..size)
        .map(|i| {
            let object = item.instantiate();
            let _ = object.set("slot", Value::from(i as i64));
            let _ = object.set(
                "tags",
                Value::builtin(Builtin::Map(vec![(Value::from("rarity"), Value::from(3))])),
            );
            Value::Object(object)
        })
        .collect();
    Value::list(items)
}

fn setup() -> (Serializer, Rc<Class>) {
    let timers = TimerQueue::new(ManualClock::new(0));
    let item = Class::builder("Item")
        .field("name", "sword")
        .field("slot", 0)
        .field("found", Value::date_from_millis(1_700_000_000_000).unwrap_or_default())
        .build();
    let mut registry = TypeRegistry::new(timers);
    registry.register_domain_type(&item).expect("register");
    (Serializer::new(Rc::new(registry)), item)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_serialize(c: &mut Criterion) {
    let (serializer, item) = setup();
    let mut group = c.benchmark_group("serialize");

    for size in [10, 100, 1000].iter() {
        let value = create_inventory(&item, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(serializer.serialize(&value)));
        });
    }

    group.finish();
}

fn bench_deserialize(c: &mut Criterion) {
    let (serializer, item) = setup();
    let mut group = c.benchmark_group("deserialize");

    for size in [10, 100, 1000].iter() {
        let text = serializer
            .serialize(&create_inventory(&item, *size))
            .expect("serialize");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(serializer.deserialize(&text)));
        });
    }

    group.finish();
}

fn bench_observed_writes(c: &mut Criterion) {
    let (_, item) = setup();
    let mut group = c.benchmark_group("observed_writes");

    for size in [10, 100, 1000].iter() {
        let root = Value::map([("items", create_inventory(&item, *size))]);
        let observer = MutationObserver::with_callback(|event| {
            black_box(event);
            Ok(())
        });
        let proxy = observer.observe(root.as_object().expect("object"));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    let path = format!("items.{i}");
                    if let Some(handle) = proxy.get_path(&path).observed() {
                        let _ = handle.set("slot", i as i64);
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_serialize,
    bench_deserialize,
    bench_observed_writes
);
criterion_main!(benches);
