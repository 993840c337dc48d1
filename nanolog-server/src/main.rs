//! NanoLog server - HTTP host for the log engine and the query aggregator

mod api;
mod cluster;

use anyhow::Context;
use clap::Parser;
use cluster::Aggregator;
use nanolog_core::engine::{EngineConfig, QueryEngine};
use nanolog_core::segment::{SegmentReader, SegmentWriter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

const CLEANER_INTERVAL: Duration = Duration::from_secs(3600);

/// Operational role of this node.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    /// Engine + query API on one node
    Standalone,
    /// Query aggregation over data nodes
    Console,
    /// Engine only
    Ingester,
}

#[derive(Parser, Debug)]
#[command(name = "nanolog")]
#[command(about = "NanoLog - lightweight append-only log database")]
struct Cli {
    /// HTTP port to listen on
    #[arg(long, default_value_t = 8088)]
    port: u16,

    /// Directory to store .nano files
    #[arg(long, default_value = "./data")]
    data: PathBuf,

    /// Data retention duration (e.g. 72h, 7d)
    #[arg(long, default_value = "168h")]
    retention: String,

    /// Server role
    #[arg(long, value_enum, default_value_t = Role::Standalone)]
    role: Role,

    /// Comma-separated list of data node URLs (console role)
    #[arg(long, default_value = "")]
    data_nodes: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let cli = Cli::parse();
    let retention = parse_duration(&cli.retention)
        .with_context(|| format!("invalid retention duration {:?}", cli.retention))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut engine = None;
    let app = match cli.role {
        Role::Standalone | Role::Ingester => {
            let eng = QueryEngine::open(
                EngineConfig {
                    data_dir: cli.data.clone(),
                    retention,
                    max_table_size: nanolog_core::config::MEMTABLE_SIZE_LIMIT,
                },
                Arc::new(SegmentReader::new()),
                Arc::new(SegmentWriter::new()),
            )
            .context("failed to open query engine")?;
            info!(data_dir = %cli.data.display(), retention = %cli.retention, role = ?cli.role, "engine initialized");

            spawn_cleaner(eng.clone(), CLEANER_INTERVAL, shutdown_rx.clone());
            engine = Some(eng.clone());
            api::engine_router(eng)
        }
        Role::Console => {
            let nodes: Vec<String> = cli
                .data_nodes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if nodes.is_empty() {
                warn!("console role with no --data-nodes, all queries will be empty");
            }
            info!(nodes = nodes.len(), "console node initialized");
            api::console_router(Arc::new(Aggregator::new(nodes)))
        }
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("NanoLog listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx))
    .await?;

    if let Some(engine) = engine {
        info!("flushing memory to disk");
        engine.flush().context("final flush failed")?;
    }

    info!("NanoLog exited gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

/// Periodically delete segments past the retention horizon until shutdown.
fn spawn_cleaner(
    engine: Arc<QueryEngine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let engine = engine.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || engine.purge_expired()).await {
                        warn!(error = %e, "cleaner task failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    });
}

/// Parse duration strings like `168h`, `30m`, `7d`, or compounds (`1h30m`).
fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut number = String::new();
    for ch in input.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let value: u64 = number
            .parse()
            .map_err(|_| anyhow::anyhow!("missing number before unit '{ch}'"))?;
        number.clear();
        let secs = match ch {
            's' => value,
            'm' => value * 60,
            'h' => value * 3600,
            'd' => value * 86_400,
            _ => anyhow::bail!("unknown duration unit '{ch}'"),
        };
        total += Duration::from_secs(secs);
    }
    if !number.is_empty() {
        anyhow::bail!("duration missing unit suffix");
    }
    Ok(total)
}
