//! Traffic generation against a pool over the in-memory database.
//!
//! A fixed number of submitter tasks claim request numbers from a shared
//! counter until the configured total is reached or shutdown is requested.
//! Each request either inserts a document keyed by its request number, reads
//! back a random earlier key, or (when fault injection is on) panics inside
//! the worker.

use crate::config::LoadConfig;
use core::time::Duration;
use dbworker::{Context, Error, Pool};
use dbworker_testdb::{DbError, MemDb};
use portable_atomic::{AtomicU64, Ordering};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Collection every request reads from and writes to.
pub const COLLECTION: &str = "load";

/// Context key carrying the request number.
const REQUEST_KEY: &str = "request";

#[derive(Debug, Default)]
struct Stats {
    submitted: AtomicU64,
    inserted: AtomicU64,
    found: AtomicU64,
    missing: AtomicU64,
    work_errors: AtomicU64,
    faults: AtomicU64,
    cancelled: AtomicU64,
    closed: AtomicU64,
}

/// Outcome counts of a load run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub submitted: u64,
    pub inserted: u64,
    pub found: u64,
    pub missing: u64,
    pub work_errors: u64,
    pub faults: u64,
    pub cancelled: u64,
    pub closed: u64,
}

impl Summary {
    /// Requests that produced a response from a worker.
    pub const fn completed(&self) -> u64 {
        self.inserted + self.found + self.missing + self.work_errors + self.faults
    }
}

impl Stats {
    fn summary(&self) -> Summary {
        Summary {
            submitted: self.submitted.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            found: self.found.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            work_errors: self.work_errors.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, op: Op, outcome: &Result<bool, Error<DbError>>) {
        let counter = match (op, outcome) {
            (Op::Insert(_), Ok(_)) => &self.inserted,
            (_, Ok(true)) => &self.found,
            (_, Ok(false)) => &self.missing,
            (_, Err(Error::Fault(_))) => &self.faults,
            (_, Err(Error::Cancelled)) => &self.cancelled,
            (_, Err(Error::Closed)) => &self.closed,
            (_, Err(err)) => {
                tracing::warn!("Request failed: {err}");
                &self.work_errors
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Insert(u64),
    Read(u64),
    Fault,
}

impl Op {
    fn pick(request: u64, config: &LoadConfig) -> Self {
        let mut rng = rand::rng();
        if rng.random::<f64>() < config.fault_rate {
            Self::Fault
        } else if request > 0 && rng.random::<f64>() < config.read_ratio {
            Self::Read(rng.random_range(0..request))
        } else {
            Self::Insert(request)
        }
    }
}

/// Pushes `config.requests` requests through `pool` from
/// `config.concurrency` tasks and returns the outcome counts.
///
/// Cancelling `shutdown` stops new submissions and aborts the ones still
/// waiting; requests already running finish normally.
pub async fn run(
    pool: Arc<Pool<MemDb>>,
    config: &LoadConfig,
    shutdown: CancellationToken,
) -> Summary {
    let stats = Arc::new(Stats::default());
    let next = Arc::new(AtomicU64::new(0));

    let tasks: Vec<_> = (0..config.concurrency)
        .map(|_| {
            tokio::spawn(submitter(
                Arc::clone(&pool),
                config.clone(),
                Arc::clone(&stats),
                Arc::clone(&next),
                shutdown.clone(),
            ))
        })
        .collect();

    for task in tasks {
        if let Err(err) = task.await {
            tracing::error!("Submitter task failed: {err}");
        }
    }
    stats.summary()
}

async fn submitter(
    pool: Arc<Pool<MemDb>>,
    config: LoadConfig,
    stats: Arc<Stats>,
    next: Arc<AtomicU64>,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let request = next.fetch_add(1, Ordering::Relaxed);
        if request >= config.requests {
            break;
        }

        let op = Op::pick(request, &config);
        let ctx = Context::with_cancellation(shutdown.child_token())
            .with_value(REQUEST_KEY, request);
        stats.submitted.fetch_add(1, Ordering::Relaxed);

        let outcome = match op {
            Op::Insert(id) => {
                pool.submit(ctx, move |_, db: &MemDb| {
                    db.insert_one(COLLECTION, json!({ "_id": id, "request": id }))
                        .map(|_| true)
                })
                .await
            }
            Op::Read(id) => {
                pool.submit(ctx, move |_, db: &MemDb| {
                    db.find_one(COLLECTION, &json!(id)).map(|doc| doc.is_some())
                })
                .await
            }
            Op::Fault => {
                pool.submit(ctx, |ctx, _: &MemDb| -> Result<bool, DbError> {
                    let request = ctx.value::<u64>(REQUEST_KEY).copied().unwrap_or_default();
                    panic!("injected fault in request {request}")
                })
                .await
            }
        };

        let closed = matches!(outcome, Err(Error::Closed));
        stats.record(op, &outcome);
        if closed {
            break;
        }
    }
}

/// Samples the pool's queue length every `interval` until `stop` is
/// cancelled, and returns the largest value seen.
pub async fn sample_queue(
    pool: Arc<Pool<MemDb>>,
    interval: Duration,
    stop: CancellationToken,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    let mut peak = 0;
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let queued = pool.queued();
                peak = peak.max(queued);
                tracing::debug!(queued, capacity = pool.capacity(), "Sampled queue length");
            }
        }
    }
    peak
}
