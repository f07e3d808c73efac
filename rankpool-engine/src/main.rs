//! rankpool - athlete percentile ranking engine
//!
//! Command-line entry point: database setup, seed import, batch jobs and
//! the HTTP server.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rankpool_common::config::TomlConfig;
use rankpool_common::{Cohort, Metric, PlayLevel};
use rankpool_engine::api::{build_router, AppState};
use rankpool_engine::{Engine, EngineConfig, TestRecord};
use serde::Serialize;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "rankpool")]
#[command(about = "Percentile ranking engine for athlete test results")]
#[command(version)]
struct Args {
    /// TOML config file (default: <config dir>/rankpool/config.toml)
    #[arg(short, long, env = "RANKPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config file
    #[arg(short, long, env = "RANKPOOL_DATABASE")]
    database: Option<PathBuf>,

    /// Lock retry budget for writes in milliseconds
    #[arg(long)]
    max_lock_wait_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database, load the configured seed pool and build all tables
    Init {
        /// Seed CSV, overrides `seed_csv` from the config file
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Run the HTTP server
    Serve {
        #[arg(short, long, env = "RANKPOOL_PORT")]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Import a baseline CSV into the seed pool
    LoadSeed {
        csv: PathBuf,
        /// Source tag; a tag is loaded at most once (default: file name)
        #[arg(long)]
        source: Option<String>,
    },
    /// Rebuild every threshold table
    Rebuild,
    /// Process test records from a JSON-lines file
    Ingest { file: PathBuf },
    /// Change an athlete's play level
    SetLevel { athlete: Uuid, level: PlayLevel },
    /// Re-rank an athlete's snapshots against current thresholds
    Recalculate {
        athlete: Uuid,
        #[arg(long)]
        level: Option<PlayLevel>,
        #[arg(long = "test-id")]
        test_ids: Vec<String>,
    },
    /// Compute the composite score from the latest components
    Composite {
        athlete: Uuid,
        #[arg(long)]
        level: Option<PlayLevel>,
    },
    /// Replace a contribution with the athlete's latest value
    Reconcile {
        athlete: Uuid,
        metric: Metric,
        level: PlayLevel,
    },
    /// Look up the percentile of a value
    Percentile {
        metric: Metric,
        /// Play level or `Overall`
        level: Cohort,
        #[arg(allow_hyphen_values = true)]
        value: f64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(database) = args.database.clone() {
        config.database_path = database;
    }
    if args.max_lock_wait_ms.is_some() {
        config.max_lock_wait_ms = args.max_lock_wait_ms;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    let level = &config.logging.level;
                    format!(
                        "rankpool={level},rankpool_engine={level},\
                         rankpool_common={level},tower_http=info"
                    )
                    .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rankpool v{}", env!("CARGO_PKG_VERSION"));
    info!("Database path: {}", config.database_path.display());

    let engine_config = EngineConfig {
        max_lock_wait_ms: config.max_lock_wait_ms,
    };
    let engine = Engine::open(&config.database_path, &engine_config)
        .await
        .context("Failed to open database")?;

    match args.command {
        Command::Init { seed } => {
            if let Some(csv) = seed.or(config.seed_csv.clone()) {
                let summary = engine
                    .load_seed_csv(&csv, None)
                    .await
                    .with_context(|| format!("Failed to load seed pool from {}", csv.display()))?;
                print_json(&summary)?;
            }
            let stats = engine.rebuild_all().await.context("Threshold rebuild failed")?;
            info!("Database ready with {} threshold tables", stats.len());
        }
        Command::Serve { port, bind } => {
            let port = port.unwrap_or(config.port);
            let bind = bind.unwrap_or_else(|| config.bind_address.clone());
            serve(engine, &bind, port).await?;
        }
        Command::LoadSeed { csv, source } => {
            let summary = engine
                .load_seed_csv(&csv, source.as_deref())
                .await
                .with_context(|| format!("Failed to load seed pool from {}", csv.display()))?;
            print_json(&summary)?;
        }
        Command::Rebuild => {
            let stats = engine.rebuild_all().await.context("Threshold rebuild failed")?;
            print_json(&stats)?;
        }
        Command::Ingest { file } => ingest(&engine, &file).await?,
        Command::SetLevel { athlete, level } => {
            let report = engine.change_play_level(athlete, level).await?;
            print_json(&report)?;
        }
        Command::Recalculate { athlete, level, test_ids } => {
            let filter = (!test_ids.is_empty()).then_some(test_ids.as_slice());
            let summary = engine.recalculate(athlete, level, filter).await?;
            print_json(&summary)?;
        }
        Command::Composite { athlete, level } => {
            let outcome = engine.compute_composite(athlete, level, None).await?;
            print_json(&outcome)?;
        }
        Command::Reconcile { athlete, metric, level } => {
            let report = engine.reconcile(athlete, metric, level).await?;
            print_json(&report)?;
        }
        Command::Percentile { metric, level, value } => {
            let percentile = engine.percentile(value, metric, level).await?;
            print_json(&serde_json::json!({
                "metric": metric,
                "level": level,
                "value": value,
                "percentile": percentile,
            }))?;
        }
    }

    Ok(())
}

async fn serve(engine: Engine, bind: &str, port: u16) -> Result<()> {
    let app = build_router(AppState::new(engine)).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("rankpool listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Process a JSON-lines file; bad lines are logged and counted
async fn ingest(engine: &Engine, file: &Path) -> Result<()> {
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("Cannot open {}", file.display()))?,
    );

    let mut processed = 0usize;
    let mut failed = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let record: TestRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no + 1, "Skipping malformed record: {}", e);
                failed += 1;
                continue;
            }
        };

        match engine.process(&record).await {
            Ok(report) => {
                processed += 1;
                print_json(&report)?;
            }
            Err(e) => {
                error!(
                    line = line_no + 1,
                    test_id = %record.test_id,
                    "Failed to process record: {}",
                    e
                );
                failed += 1;
            }
        }
    }

    info!(processed, failed, "Ingest complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
