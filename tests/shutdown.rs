//! Start, stop and drain behaviour.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use slotserve::config::StartupConfig;
use slotserve::lifecycle::{start_with_retry, DrainPolicy};
use slotserve::net::listener::ListenerError;
use slotserve::{ConcurrencyMode, Server, ServerSettings, Shutdown};

mod common;
use common::{started, tick_until, RecordingFactory};

#[tokio::test]
async fn stop_closes_every_connection_and_frees_port() {
    let factory = RecordingFactory::new();
    let mut server = started(2, ConcurrencyMode::Cooperative, factory.clone());
    let addr = server.local_addr().unwrap();

    let _a = TcpStream::connect(addr).await.unwrap();
    let _b = TcpStream::connect(addr).await.unwrap();
    tick_until(&mut server, 20, |s| s.occupied_slots() == 2).await;

    let report = server.stop().await;
    assert_eq!(report.closed, 2);
    assert_eq!(report.forced, 0);
    assert_eq!(server.occupied_slots(), 0);
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());

    // Second stop is a no-op.
    assert_eq!(server.stop().await, Default::default());

    let mut again = Server::new(addr.port(), 2, Ipv4Addr::LOCALHOST, RecordingFactory::new());
    again.start().unwrap();
    assert_eq!(again.local_addr(), Some(addr));
}

#[tokio::test]
async fn start_is_idempotent() {
    let mut server = started(1, ConcurrencyMode::Cooperative, RecordingFactory::new());
    let addr = server.local_addr();
    server.start().unwrap();
    assert_eq!(server.local_addr(), addr);
}

#[test]
fn start_without_runtime_fails() {
    let mut server = Server::new(0, 1, Ipv4Addr::LOCALHOST, RecordingFactory::new());
    assert!(matches!(server.start(), Err(ListenerError::NoRuntime)));
    assert!(!server.is_running());
}

#[tokio::test]
async fn start_fails_while_port_is_held() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut server = Server::new(port, 1, Ipv4Addr::LOCALHOST, RecordingFactory::new());
    assert!(matches!(server.start(), Err(ListenerError::Bind { .. })));
    assert!(!server.is_running());

    drop(holder);
    server.start().unwrap();
    assert!(server.is_running());
}

#[tokio::test]
async fn start_with_retry_waits_for_port() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(holder);
    });

    let policy = StartupConfig {
        retry_attempts: 10,
        base_delay_ms: 50,
        max_delay_ms: 100,
    };
    let mut server = Server::new(port, 1, Ipv4Addr::LOCALHOST, RecordingFactory::new());
    start_with_retry(&mut server, &policy).await.unwrap();
    assert!(server.is_running());
}

#[tokio::test]
async fn start_with_retry_gives_up() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let policy = StartupConfig {
        retry_attempts: 2,
        base_delay_ms: 10,
        max_delay_ms: 10,
    };
    let mut server = Server::new(port, 1, Ipv4Addr::LOCALHOST, RecordingFactory::new());
    let err = start_with_retry(&mut server, &policy).await.unwrap_err();
    assert!(matches!(err, ListenerError::Bind { .. }));
    drop(holder);
}

async fn drain_stubborn(mode: ConcurrencyMode) {
    let factory = RecordingFactory::stubborn();
    let settings = ServerSettings::new(0, 1, Ipv4Addr::LOCALHOST)
        .with_mode(mode)
        .with_drain(DrainPolicy::bounded(Duration::from_millis(100)));
    let mut server = Server::with_settings(settings, factory.clone());
    server.start().unwrap();

    let _client = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
    tick_until(&mut server, 20, |_| factory.accepted().len() == 1).await;

    let begin = Instant::now();
    let report = server.stop().await;
    assert!(begin.elapsed() >= Duration::from_millis(100));
    assert!(begin.elapsed() < Duration::from_secs(2));
    assert_eq!(report.forced, 1);
    assert_eq!(report.closed, 0);
    assert_eq!(server.occupied_slots(), 0);
}

#[tokio::test]
async fn drain_deadline_releases_stubborn_cooperative() {
    drain_stubborn(ConcurrencyMode::Cooperative).await;
}

#[tokio::test]
async fn drain_deadline_releases_stubborn_task() {
    drain_stubborn(ConcurrencyMode::TaskPerConnection).await;
}

#[tokio::test]
async fn task_connections_close_on_stop() {
    let factory = RecordingFactory::new();
    let mut server = started(2, ConcurrencyMode::TaskPerConnection, factory.clone());
    let addr = server.local_addr().unwrap();

    let _a = TcpStream::connect(addr).await.unwrap();
    tick_until(&mut server, 20, |_| factory.accepted().len() == 1).await;

    let report = server.stop().await;
    assert_eq!(report.closed, 1);
    assert_eq!(report.forced, 0);
}

#[tokio::test]
async fn run_until_finishes_admission_in_progress() {
    let factory = RecordingFactory::slow(Duration::from_millis(200));
    let mut server = started(1, ConcurrencyMode::Cooperative, factory.clone());
    let _client = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        server.run_until(&shutdown, Duration::from_millis(20)),
    )
    .await
    .unwrap();

    // The handshake outlived the trigger but was not cut short.
    assert_eq!(factory.attempts(), 1);
    assert_eq!(factory.accepted().len(), 1);
    assert_eq!(server.occupied_slots(), 1);
    assert_eq!(server.stop().await.closed, 1);
}

#[tokio::test]
async fn run_until_returns_when_already_triggered() {
    let mut server = started(1, ConcurrencyMode::Cooperative, RecordingFactory::new());
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let begin = Instant::now();
    server.run_until(&shutdown, Duration::from_secs(10)).await;
    assert!(begin.elapsed() < Duration::from_secs(1));
    assert!(server.is_running());
}
