#![allow(clippy::all)]
//! Benchmarks for the relay engine.
//!
//! Tests: event rendering, rule add/remove cycle, echo round trips and bulk
//! throughput through a live listener.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nano_tcp_relay::config::{RelayConfig, Rule};
use nano_tcp_relay::relay::{EventLog, Flow, ListenerRegistry, MemorySink, RelayEvent};
use std::hint::black_box;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

fn quiet_registry() -> Arc<ListenerRegistry> {
    let events = Arc::new(EventLog::new(Arc::new(MemorySink::new()), false));
    Arc::new(ListenerRegistry::new(&RelayConfig::new("127.0.0.1"), events))
}

async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    port
}

// ---------------------------------------------------------------------------
// Event rendering
// ---------------------------------------------------------------------------

fn bench_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay/events");

    let flow = Flow {
        src_peer: "192.168.1.20:51234".parse().unwrap(),
        src_local_port: 9001,
        dst_local_port: 43110,
        dst_peer: "10.0.0.5:9002".parse().unwrap(),
    };
    let data = RelayEvent::Data { flow, count: 1024 };

    group.bench_function("render_data", |b| {
        b.iter(|| black_box(data.to_string()));
    });

    group.bench_function("emit_silenced", |b| {
        let log = EventLog::new(Arc::new(MemorySink::new()), false);
        b.iter(|| log.emit(black_box(&data)));
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay/registry");
    let rt = Runtime::new().unwrap();
    let registry = quiet_registry();

    group.bench_function("add_remove", |b| {
        b.to_async(&rt).iter(|| async {
            let rule = registry.add(Rule::new(0, 7)).await.unwrap();
            registry.remove(rule.listen_port).await.unwrap();
        });
    });

    rt.block_on(registry.shutdown_all());
    group.finish();
}

// ---------------------------------------------------------------------------
// Relaying
// ---------------------------------------------------------------------------

fn bench_relay(c: &mut Criterion) {
    let mut group = c.benchmark_group("relay/session");
    let rt = Runtime::new().unwrap();

    let registry = quiet_registry();
    let listen_port = rt.block_on(async {
        let echo = echo_server().await;
        registry.add(Rule::new(0, echo)).await.unwrap().listen_port
    });

    let mut client = rt.block_on(TcpStream::connect(("127.0.0.1", listen_port))).unwrap();

    for size in [64usize, 1024, 64 * 1024] {
        let payload = vec![0xA5u8; size];
        let mut received = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("echo_round_trip", size), &size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let (mut reader, mut writer) = client.split();
                    let write = writer.write_all(&payload);
                    let read = reader.read_exact(&mut received);
                    let (w, r) = tokio::join!(write, read);
                    w.unwrap();
                    r.unwrap();
                });
                black_box(&received);
            });
        });
    }

    drop(client);
    rt.block_on(registry.shutdown_all());
    group.finish();
}

criterion_group!(benches, bench_events, bench_registry, bench_relay);
criterion_main!(benches);
