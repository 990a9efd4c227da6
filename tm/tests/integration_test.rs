//! End-to-end tests: gateway -> TCP client -> echo server -> back
//!
//! Each test binds its own server on an ephemeral port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use muxcore::{Gateway, MuxConfig, MuxError};
use tcpmux::config::Config;
use tcpmux::{EchoService, LengthHeader, Server, TcpTransport};
use tokio_util::sync::CancellationToken;

struct Harness {
    gateway: Gateway,
    cancel: CancellationToken,
}

impl Harness {
    async fn start(config: Config) -> Self {
        let service = Arc::new(EchoService::new(config.echo.slow_delay()));
        let server = Server::bind("127.0.0.1:0", service, config.network.length_header)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));

        let (transport, inbound) = TcpTransport::connect(
            &addr,
            config.network.length_header,
            config.network.connect_timeout(),
            config.mux.inbound_buffer,
        )
        .await
        .unwrap();
        let gateway = Gateway::builder(config.mux.clone())
            .with_discard_policy(Arc::new(EchoService::new(config.echo.slow_delay())))
            .start(transport, inbound)
            .unwrap();

        Self { gateway, cancel }
    }

    async fn stop(self) {
        self.gateway.shutdown().await;
        self.cancel.cancel();
    }
}

/// Short group timeout with a slow delay well past it
fn timeout_config() -> Config {
    let mut config = Config::default();
    config.mux = MuxConfig {
        group_timeout_ms: 100,
        reap_interval_ms: 10,
        ..Default::default()
    };
    config.echo.slow_delay_ms = 400;
    config
}

#[tokio::test]
async fn test_happy_day() {
    let harness = Harness::start(Config::default()).await;

    let reply = harness.gateway.send_text("999Hello world!").await.unwrap();
    assert_eq!(reply, "999Hello world!:echo");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiplex() {
    let harness = Harness::start(Config::default()).await;
    let started = Instant::now();

    let calls = (100..200).map(|i| {
        let gateway = harness.gateway.clone();
        async move { (i, gateway.send_text(&format!("{i}Hello world!")).await) }
    });
    let results = futures::future::join_all(calls).await;

    assert_eq!(results.len(), 100);
    for (i, result) in results {
        assert_eq!(result.unwrap(), format!("{i}Hello world!:echo"));
    }
    assert!(started.elapsed() < Duration::from_secs(60));

    let metrics = harness.gateway.metrics();
    assert_eq!(metrics.released, 100);
    assert_eq!(metrics.pending_calls, 0);
    assert_eq!(metrics.open_groups, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_timeout_throw() {
    let harness = Harness::start(timeout_config()).await;

    let err = harness.gateway.send_text("TIMEOUT_TEST_THROW").await.unwrap_err();
    assert_eq!(
        err,
        MuxError::Handler("No response received for TIMEOUT_TEST_THROW".to_string())
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_timeout_return() {
    let harness = Harness::start(timeout_config()).await;

    let err = harness.gateway.send_text("TIMEOUT_TEST_RETURN").await.unwrap_err();
    assert_eq!(
        err,
        MuxError::GroupTimeout {
            key: "TIM".to_string(),
            request: "TIMEOUT_TEST_RETURN".to_string(),
            received: 1
        }
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_timeout_msg() {
    let harness = Harness::start(timeout_config()).await;

    let reply = harness.gateway.send_text("TIMEOUT_TEST_MSG").await.unwrap();
    assert_eq!(reply, "TIMEOUT_TEST_MSG");

    harness.stop().await;
}

#[tokio::test]
async fn test_fail_is_discarded() {
    let harness = Harness::start(timeout_config()).await;

    let err = harness.gateway.send_text("FAIL").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(harness.gateway.metrics().discarded, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_reply_timeout_before_group_timeout() {
    let mut config = Config::default();
    config.mux.group_timeout_ms = 10_000;
    config.echo.slow_delay_ms = 5_000;
    let harness = Harness::start(config).await;

    let started = Instant::now();
    let err = harness
        .gateway
        .call("TIMEOUT_TEST_SLOW", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(matches!(err, MuxError::CallTimeout { .. }));
    assert_eq!(harness.gateway.metrics().open_groups, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_four_byte_header() {
    let mut config = Config::default();
    config.network.length_header = LengthHeader::Four;
    let harness = Harness::start(config).await;

    let long = format!("123{}", "x".repeat(1000));
    let reply = harness.gateway.send_text(&long).await.unwrap();
    assert_eq!(reply, format!("{long}:echo"));

    harness.stop().await;
}

#[tokio::test]
async fn test_server_shutdown_fails_pending_calls() {
    let mut config = Config::default();
    config.mux.group_timeout_ms = 10_000;
    config.echo.slow_delay_ms = 5_000;
    let harness = Harness::start(config).await;

    let pending = {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { gateway.send_text("TIMEOUT_TEST_PENDING").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.cancel.cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_transport());
    assert_eq!(harness.gateway.metrics().pending_calls, 0);

    harness.gateway.shutdown().await;
}

#[tokio::test]
async fn test_calls_after_server_shutdown_fail_fast() {
    let harness = Harness::start(Config::default()).await;
    assert_eq!(harness.gateway.send_text("123before").await.unwrap(), "123before:echo");

    harness.cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let err = harness
        .gateway
        .call("123after", Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(harness.gateway.metrics().pending_calls, 0);

    harness.gateway.shutdown().await;
}
