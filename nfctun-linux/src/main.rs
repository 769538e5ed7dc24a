// nfctun Linux: PN532 reader, HTTP fetch and the tunnel session loop.

mod config;
mod fetch;
mod pn532;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nfctun_core::SessionLoop;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Relay HTTP resources to NFC targets.
///
/// Waits for a phone running the tunnel application, reads the URL it asks
/// for, downloads it and streams the body back in framed chunks.
#[derive(Parser, Debug)]
#[command(name = "nfctun-linux", version, about, long_about = None)]
struct Args {
    /// Link connection string, e.g. pn532_uart:/dev/ttyUSB0:115200
    ///
    /// Only the UART driver is supported; boards wired for SPI must be
    /// switched to HSU mode and addressed as pn532_uart.
    #[arg(env = "NFCTUN_CONNSTRING")]
    connstring: Option<String>,

    /// Config file (default ~/.config/nfctun/config.toml, then /etc/nfctun/config.toml)
    #[arg(short, long, env = "NFCTUN_CONFIG")]
    config: Option<PathBuf>,

    /// Payload bytes per data command
    #[arg(long, env = "NFCTUN_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Timeout for one exchange with the target, in milliseconds
    #[arg(long, env = "NFCTUN_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Send an abort command to the target when the download fails
    #[arg(long)]
    notify_fetch_failure: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "NFCTUN_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut cfg = config::load(args.config.as_deref())?;
    cfg.apply(config::Overrides {
        connstring: args.connstring,
        chunk_size: args.chunk_size,
        timeout_ms: args.timeout_ms,
        notify_fetch_failure: args.notify_fetch_failure,
    });
    let tunnel = cfg.tunnel_config();
    tunnel.validate().context("invalid configuration")?;
    pn532::check_chunk_size(tunnel.chunk_size).context("invalid configuration")?;

    let rt = tokio::runtime::Runtime::new().context("unable to start runtime")?;
    let fetcher = fetch::HttpFetcher::new(rt.handle().clone(), &cfg.user_agent, cfg.fetch_timeout())
        .context("unable to initialize http client")?;

    let conn = pn532::ConnString::parse(&cfg.connstring)?;
    let reader = pn532::Pn532::open(&conn)
        .with_context(|| format!("unable to open device: {}", cfg.connstring))?;

    let mut session_loop =
        SessionLoop::new(reader, fetcher, tunnel)?.with_poll_interval(cfg.poll_interval());
    info!(
        chunk_size = session_loop.config().chunk_size,
        timeout_ms = cfg.timeout_ms,
        fetch_failure = ?session_loop.config().fetch_failure,
        "tunnel ready"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    rt.block_on(async {
        let flag = shutdown.clone();
        let worker = tokio::task::spawn_blocking(move || session_loop.run(&flag));
        shutdown_signal().await?;
        info!("shutting down after the current session");
        shutdown.store(true, Ordering::Relaxed);
        worker.await?;
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
