#![doc = include_str!("../README.md")]

mod config;
mod load;
mod telemetry;

use clap::Parser;
use config::{CliArgs, LoadConfig};
use dbworker::PoolBuilder;
use dbworker_testdb::{MemDb, MemDbConfig};
use std::{sync::Arc, time::Instant};
use telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = LoadConfig::try_from(args)?;

    init_telemetry(config.log_format)?;
    log_startup_info(&config);

    let pool = PoolBuilder::new(config.pool)
        .thread_name("memdb")
        .connect::<MemDb>(&MemDbConfig::new(&config.database))?;
    let pool = Arc::new(pool);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let sampler_stop = CancellationToken::new();
    let sampler = tokio::spawn(load::sample_queue(
        Arc::clone(&pool),
        config.sample_interval,
        sampler_stop.clone(),
    ));

    let started = Instant::now();
    let summary = load::run(Arc::clone(&pool), &config, shutdown).await;
    let elapsed = started.elapsed();
    sampler_stop.cancel();
    let peak_queued = sampler.await?;

    let throughput = summary.completed() as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        submitted = summary.submitted,
        inserted = summary.inserted,
        found = summary.found,
        missing = summary.missing,
        work_errors = summary.work_errors,
        faults = summary.faults,
        cancelled = summary.cancelled,
        closed = summary.closed,
        peak_queued,
        "Completed {} requests in {:.2?} ({:.0} req/s)",
        summary.completed(),
        elapsed,
        throughput
    );

    // Draining joins the worker threads, so keep it off the async workers.
    tokio::task::spawn_blocking(move || pool.close()).await??;

    tracing::info!("Load generator shut down successfully");
    Ok(())
}

fn log_startup_info(config: &LoadConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting load generator with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting load generator: {} workers, queue capacity {}, {} submitters",
            config.pool.workers,
            config.pool.queue_capacity,
            config.concurrency
        );
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, stopping submitters...");
    shutdown.cancel();
}
