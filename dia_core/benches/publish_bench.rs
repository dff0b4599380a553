//! Channel publish micro-benchmark.
//!
//! Measures the cost of one `channel.set` through to subscribers:
//! - No subscribers
//! - Eight subscribers on the channel
//! - Eight subscribers plus an in-memory logger behind the logging manager

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dia_common::channel::Permission;
use dia_common::sample::{Sample, ValueType};
use dia_common::settings::TomlSerializer;
use dia_core::channels::{Channel, ChannelDatabase, ChannelPropertyDescriptor, DevicePropertySource};
use dia_core::driver_registry::DriverCatalog;
use dia_core::drivers::memory_logger;
use dia_core::gateway::Gateway;
use dia_core::settings::SettingsContext;
use serde_json::json;

const SUBSCRIBERS: usize = 8;

fn add_channel(database: &ChannelDatabase) -> Arc<Channel> {
    let descriptor = ChannelPropertyDescriptor::new("value", ValueType::Float, Sample::new(0.0, 0.0, ""))
        .with_perm(Permission::GET | Permission::SET);
    database
        .channel_add("bench.value", Arc::new(DevicePropertySource::new(&descriptor)))
        .unwrap()
}

fn subscribe_all(database: &ChannelDatabase, counter: &Arc<AtomicU64>) {
    for _ in 0..SUBSCRIBERS {
        let counter = Arc::clone(counter);
        database.publisher().subscribe("bench.value", move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }
}

fn bench_set_no_subscribers(c: &mut Criterion) {
    let database = ChannelDatabase::new();
    let channel = add_channel(&database);
    let mut ts = 0.0;

    c.bench_function("channel_set_bare", |b| {
        b.iter(|| {
            ts += 1.0;
            channel.set(black_box(Sample::new(ts, ts, ""))).unwrap();
        })
    });
}

fn bench_set_with_subscribers(c: &mut Criterion) {
    let database = ChannelDatabase::new();
    let channel = add_channel(&database);
    let counter = Arc::new(AtomicU64::new(0));
    subscribe_all(&database, &counter);
    let mut ts = 0.0;

    c.bench_function("channel_set_8_subscribers", |b| {
        b.iter(|| {
            ts += 1.0;
            channel.set(black_box(Sample::new(ts, ts, ""))).unwrap();
        })
    });
    black_box(counter.load(Ordering::Relaxed));
}

fn bench_set_with_logger(c: &mut Criterion) {
    let gateway = Gateway::new(
        SettingsContext::from_document(
            json!({"loggers": [{"name": "mem", "driver": memory_logger::DRIVER, "settings": {"capacity": 4096}}]}),
            Box::new(TomlSerializer),
        ),
        DriverCatalog::with_builtin_drivers(),
    )
    .unwrap();
    gateway.start().unwrap();
    let channel = add_channel(gateway.channels());
    let counter = Arc::new(AtomicU64::new(0));
    subscribe_all(gateway.channels(), &counter);
    let mut ts = 0.0;

    c.bench_function("channel_set_8_subscribers_logged", |b| {
        b.iter(|| {
            ts += 1.0;
            channel.set(black_box(Sample::new(ts, ts, ""))).unwrap();
        })
    });
    gateway.shutdown();
}

criterion_group!(
    benches,
    bench_set_no_subscribers,
    bench_set_with_subscribers,
    bench_set_with_logger
);
criterion_main!(benches);
