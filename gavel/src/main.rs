#![forbid(unsafe_code)]

use clap::Parser;
use gavel_lib::config::{load_from_path, Config};
use gavel_lib::persistence::SnapshotStore;
use gavel_lib::scheduler::save_snapshot;
use gavel_lib::telemetry::{init_metrics, init_tracing, start_observability_server};
use gavel_lib::{Engine, GavelError, InboundEvent, LogExecutor, Router, Scheduler, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Gavel moderation engine")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "GAVEL_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines event stream to read instead of stdin
    #[arg(short, long, value_name = "FILE")]
    events: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("failed to load configuration: {err}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Err(err) = init_tracing(&config.logging.level, config.logging.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli, config).await {
        error!(%err, "gavel exited with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(
        config = ?cli.config,
        resources = config.rate_limit.resources.len(),
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let clock = Arc::new(SystemClock);
    let executor = Arc::new(LogExecutor);

    let (engine, registry) = match config.telemetry.metrics_port {
        Some(_) => {
            let (metrics, registry) = init_metrics()?;
            (Engine::new_with_metrics(config.clone(), clock, executor, metrics)?, Some(registry))
        }
        None => (Engine::new(config.clone(), clock, executor)?, None),
    };
    let engine = Arc::new(engine);

    if let (Some(port), Some(registry)) = (config.telemetry.metrics_port, registry) {
        let engine = engine.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = start_observability_server(port, registry, engine, token).await {
                error!(%err, "observability server exited with error");
            }
        });
    }

    let store = config.persistence.snapshot_path.clone().map(SnapshotStore::new);
    if let Some(store) = &store {
        match store.load().await {
            Ok(Some(snapshot)) => {
                engine.restore(snapshot);
            }
            Ok(None) => info!(path = %store.path().display(), "no snapshot to restore"),
            Err(err) => warn!(%err, "ignoring unreadable snapshot"),
        }
    }

    let scheduler = Scheduler::spawn(engine.clone(), store.clone(), shutdown.clone());
    let router = Arc::new(Router::new(engine.clone()));

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &cli.events {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        GavelError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}")))
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        GavelError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}")))
    })?;
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("received SIGINT, initiating graceful shutdown"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });

    pump_events(reader, router, shutdown.clone()).await?;

    scheduler.shutdown().await;
    if let Some(store) = &store {
        save_snapshot(&engine, store).await;
    }
    info!("gavel stopped");
    Ok(())
}

/// Read one event per line and handle each on its own task.
///
/// Stops reading when the stream ends or `shutdown` is cancelled, then waits for every
/// handler already started so no decided action is cut short.
async fn pump_events(
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
    router: Arc<Router>,
    shutdown: CancellationToken,
) -> Result<(), GavelError> {
    let mut lines = reader.lines();
    let mut tasks = tokio::task::JoinSet::new();

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            info!("event stream closed");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "skipping malformed event");
                continue;
            }
        };

        let router = router.clone();
        tasks.spawn(async move {
            match router.dispatch(&event).await {
                Ok(outcome) => debug!(kind = event.kind(), ?outcome, "event handled"),
                Err(err) => debug!(kind = event.kind(), group = %event.group_id, %err, "event rejected"),
            }
        });

        // Reap finished handlers so the set does not grow with the stream.
        while tasks.try_join_next().is_some() {}
    }

    if !tasks.is_empty() {
        info!(in_flight = tasks.len(), "waiting for in-flight events");
    }
    while tasks.join_next().await.is_some() {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

    #[tokio::test]
    async fn pump_stops_on_shutdown_and_finishes_read_events() -> TestResult {
        let engine = Arc::new(Engine::new(Config::default(), Arc::new(SystemClock), Arc::new(LogExecutor))?);
        let router = Arc::new(Router::new(engine.clone()));

        // The writer stays open, so only the shutdown token can end the pump.
        let (mut writer, reader) = tokio::io::duplex(1024);
        writer
            .write_all(b"{\"group_id\":\"g1\",\"user_id\":\"alice\",\"payload\":{\"type\":\"vote_start\",\"reason\":\"spam\"}}\n")
            .await?;

        let shutdown = CancellationToken::new();
        let pump = tokio::spawn(pump_events(Box::new(BufReader::new(reader)), router, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), pump).await???;

        assert_eq!(engine.active_vote_sessions(), 1);
        drop(writer);
        Ok(())
    }
}
