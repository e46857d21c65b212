//! End-to-end tests: real sockets through a running registry.

use nano_tcp_relay::config::{RelayConfig, Rule};
use nano_tcp_relay::console::Console;
use nano_tcp_relay::relay::{EventLog, ListenerRegistry, MemorySink};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Echo server that reports each accepted peer and each end-of-stream.
struct Upstream {
    port: u16,
    accepted: mpsc::UnboundedReceiver<SocketAddr>,
    closed: mpsc::UnboundedReceiver<SocketAddr>,
}

async fn upstream() -> Upstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let (closed_tx, closed) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, peer)) = listener.accept().await {
            let _ = accepted_tx.send(peer);
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        },
                    }
                }
                let _ = closed_tx.send(peer);
            });
        }
    });

    Upstream {
        port,
        accepted,
        closed,
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn registry(host: &str) -> (Arc<ListenerRegistry>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let events = Arc::new(EventLog::new(sink.clone(), true));
    let registry = Arc::new(ListenerRegistry::new(&RelayConfig::new(host), events));
    (registry, sink)
}

async fn round_trip(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(buf, payload);
}

async fn assert_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(TIMEOUT, stream.read(&mut buf))
        .await
        .expect("no end-of-stream")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_ping_round_trip_over_distinct_outbound_connection() {
    let mut up = upstream().await;
    let (registry, sink) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"ping").await;

    let outbound = tokio::time::timeout(TIMEOUT, up.accepted.recv())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(outbound.port(), rule.listen_port);

    let opened = sink.lines_with("[opened]");
    assert_eq!(opened.len(), 1);
    assert_eq!(
        opened[0],
        format!(
            "[opened] {} <--{}--{}--> 127.0.0.1:{}",
            client.local_addr().unwrap(),
            rule.listen_port,
            outbound.port(),
            up.port
        )
    );
    assert_eq!(sink.lines_with("[data  ]").len(), 2);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_large_payload_is_transparent() {
    let up = upstream().await;
    let (registry, _) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i * 7 % 256) as u8).collect();

    let (mut reader, mut writer) = client.split();
    let write = async {
        writer.write_all(&payload).await.unwrap();
    };
    let read = async {
        let mut received = vec![0u8; payload.len()];
        reader.read_exact(&mut received).await.unwrap();
        received
    };
    let ((), received) = tokio::time::timeout(TIMEOUT, async { tokio::join!(write, read) })
        .await
        .unwrap();
    assert_eq!(received, payload);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_client_close_closes_upstream() {
    let mut up = upstream().await;
    let (registry, sink) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"ping").await;
    let outbound = up.accepted.recv().await.unwrap();

    drop(client);

    let closed = tokio::time::timeout(TIMEOUT, up.closed.recv())
        .await
        .expect("upstream never saw close")
        .unwrap();
    assert_eq!(closed, outbound);

    tokio::time::timeout(TIMEOUT, async {
        while sink.lines_with("[closed]").len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pumps did not both report closed");

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_remove_keeps_established_session() {
    let up = upstream().await;
    let (registry, _) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"before").await;

    registry.remove(rule.listen_port).await.unwrap();

    assert!(TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .is_err());
    round_trip(&mut client, b"after").await;
    assert_eq!(registry.tracker().active_sessions(), 1);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_console_add_then_delete() {
    let up = upstream().await;
    let (registry, _) = registry("127.0.0.1");
    let mut console = Console::new(Arc::clone(&registry), Vec::new());
    let port = free_port();

    console
        .execute(&format!("a {port}-{}", up.port))
        .await
        .unwrap();
    assert_eq!(registry.list().await, vec![Rule::new(port, up.port)]);

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    round_trip(&mut client, b"ping").await;

    console.execute(&format!("d {port}")).await.unwrap();
    assert!(registry.list().await.is_empty());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    round_trip(&mut client, b"still here").await;

    let output = String::from_utf8(console.into_output()).unwrap();
    assert_eq!(output, format!("{port}-{}\n", up.port));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_console_stats_count_sessions() {
    let up = upstream().await;
    let (registry, _) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();
    let mut console = Console::new(Arc::clone(&registry), Vec::new());

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"ping").await;
    drop(client);

    tokio::time::timeout(TIMEOUT, async {
        while registry.tracker().active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session never ended");

    console.execute("s").await.unwrap();
    let output = String::from_utf8(console.into_output()).unwrap();
    assert_eq!(
        output,
        format!("{rule} accepted=1 failed=0\nsessions=0 total=1\n")
    );

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_duplicate_add_and_missing_remove_have_no_side_effects() {
    let up = upstream().await;
    let (registry, sink) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    assert!(registry
        .add(Rule::new(rule.listen_port, up.port))
        .await
        .is_err());
    assert!(registry.remove(free_port()).await.is_err());

    assert_eq!(registry.list().await, vec![rule]);
    assert_eq!(sink.lines_with("[listen]").len(), 1);

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"ping").await;

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_unreachable_destination_keeps_listening() {
    let (registry, sink) = registry("127.0.0.1");
    let dead = free_port();
    let rule = registry.add(Rule::new(0, dead)).await.unwrap();

    for _ in 0..2 {
        let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
            .await
            .unwrap();
        assert_eof(&mut client).await;
    }

    assert_eq!(sink.lines_with("[failed]").len(), 2);
    let stats = registry.stats().await;
    assert_eq!(stats[0].1.accepted, 2);
    assert_eq!(stats[0].1.failed, 2);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let mut up = upstream().await;
    let (registry, _) = registry("127.0.0.1");
    let rule = registry.add(Rule::new(0, up.port)).await.unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .unwrap();
    round_trip(&mut client, b"ping").await;

    tokio::time::timeout(TIMEOUT, registry.shutdown_all())
        .await
        .expect("shutdown hung");

    assert_eof(&mut client).await;
    tokio::time::timeout(TIMEOUT, up.closed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.tracker().active_sessions(), 0);
    assert_eq!(registry.tracker().active_tasks(), 0);
    assert!(TcpStream::connect(("127.0.0.1", rule.listen_port))
        .await
        .is_err());
}

#[tokio::test]
async fn test_localhost_self_forward_opens_no_socket() {
    let (registry, sink) = registry("localhost");
    let port = free_port();

    assert!(registry.add(Rule::same(port)).await.is_err());
    assert!(sink.lines().is_empty());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}
