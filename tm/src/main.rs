//! TcpMux - multiplexed request/response over one TCP connection
//!
//! CLI entry point for the echo server, single calls and the demo.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use eyre::{Context, Result};
use muxcore::Gateway;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tcpmux::cli::{Cli, Command};
use tcpmux::config::Config;
use tcpmux::echo::demo_requests;
use tcpmux::{EchoService, Server, TcpTransport};

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tcpmux")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("tcpmux.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    info!(
        "TcpMux loaded config: addr={}, key_width={}, group_timeout_ms={}",
        config.network.addr(),
        config.mux.correlation_key_width,
        config.mux.group_timeout_ms
    );

    match cli.command {
        Command::Serve => cmd_serve(&config).await,
        Command::Call { payload, timeout_ms } => cmd_call(&config, &payload, timeout_ms).await,
        Command::Demo { count } => cmd_demo(&config, count).await,
    }
}

/// Run the echo server until Ctrl-C
async fn cmd_serve(config: &Config) -> Result<()> {
    let service = Arc::new(EchoService::new(config.echo.slow_delay()));
    let server = Server::bind(&config.network.addr(), service, config.network.length_header).await?;
    let addr = server.local_addr()?;
    println!("Echo server listening on {addr} (Ctrl-C to stop)");

    let cancel = CancellationToken::new();
    let running = tokio::spawn(server.run(cancel.clone()));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");
    cancel.cancel();

    running.await.context("Server task panicked")?
}

/// Connect a gateway to `addr` using the echo discard policy
async fn connect(config: &Config, addr: &str) -> Result<Gateway> {
    let (transport, inbound) = TcpTransport::connect(
        addr,
        config.network.length_header,
        config.network.connect_timeout(),
        config.mux.inbound_buffer,
    )
    .await
    .context(format!("Failed to connect to {addr}"))?;

    let gateway = Gateway::builder(config.mux.clone())
        .with_discard_policy(Arc::new(EchoService::new(config.echo.slow_delay())))
        .start(transport, inbound)
        .context("Failed to start gateway")?;
    Ok(gateway)
}

/// Send one request and print the reply
async fn cmd_call(config: &Config, payload: &str, timeout_ms: Option<u64>) -> Result<()> {
    let gateway = connect(config, &config.network.addr()).await?;
    let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(config.mux.reply_timeout());

    let result = gateway.call(payload.as_bytes().to_vec(), timeout).await;
    gateway.shutdown().await;

    let reply = result.context(format!("Call failed for {payload}"))?;
    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}

/// Start a server and fire `count` concurrent calls at it over one connection
async fn cmd_demo(config: &Config, count: usize) -> Result<()> {
    let requests = demo_requests(config.mux.correlation_key_width, count).context("Invalid demo count")?;
    let service = Arc::new(EchoService::new(config.echo.slow_delay()));
    let server = Server::bind(
        &format!("{}:0", config.network.host),
        service,
        config.network.length_header,
    )
    .await?;
    let addr = server.local_addr()?;

    let cancel = CancellationToken::new();
    let running = tokio::spawn(server.run(cancel.clone()));
    let gateway = connect(config, &addr.to_string()).await?;

    let started = Instant::now();

    let calls = requests.into_iter().map(|request| {
        let gateway = gateway.clone();
        async move {
            let result = gateway.send_text(&request).await;
            (request, result)
        }
    });
    let results = futures::future::join_all(calls).await;

    let mut failed = 0;
    for (request, result) in &results {
        match result {
            Ok(reply) => println!("{request} -> {reply}"),
            Err(e) => {
                failed += 1;
                warn!(%request, error = %e, "Demo call failed");
                println!("{request} -> ERROR: {e}");
            }
        }
    }

    println!();
    println!(
        "{} calls in {:?}, {} failed",
        results.len(),
        started.elapsed(),
        failed
    );
    let metrics = serde_json::to_string_pretty(&gateway.metrics()).context("Failed to serialize metrics")?;
    println!("{metrics}");

    gateway.shutdown().await;
    cancel.cancel();
    running.await.context("Server task panicked")?
}
