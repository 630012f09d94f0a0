use crate::{Error, Result};

/// Sizing for a [`Pool`](crate::Pool).
///
/// The defaults match a single worker with a queue of ten requests, enough for
/// light traffic against a resource that handles one operation at a time.
/// Both values are fixed for the lifetime of a pool; changing them requires
/// building a new pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Number of worker threads, i.e. the maximum number of operations issued
    /// against the resource at once.
    pub workers: usize,

    /// Number of requests that may wait in the queue before submitters are
    /// held back.
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub const DEFAULT_WORKERS: usize = 1;
    pub const DEFAULT_QUEUE_LEN_PER_WORKER: usize = 10;

    pub const fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
        }
    }

    /// Sizes the queue relative to the worker count: each worker gets
    /// `queue_len_per_worker` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the product overflows.
    pub fn per_worker(workers: usize, queue_len_per_worker: usize) -> Result<Self> {
        let queue_capacity =
            workers
                .checked_mul(queue_len_per_worker)
                .ok_or_else(|| Error::InvalidConfig {
                    reason: format!(
                        "queue capacity overflows ({workers} workers x {queue_len_per_worker})"
                    ),
                })?;
        Ok(Self::new(workers, queue_capacity))
    }

    /// Checks that the pool can make progress.
    ///
    /// A pool without workers would accept work it can never run, and a queue
    /// without capacity could never admit anything, so both are refused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either value is zero.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig {
                reason: "workers must be greater than 0".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "queue capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_WORKERS,
            Self::DEFAULT_WORKERS * Self::DEFAULT_QUEUE_LEN_PER_WORKER,
        )
    }
}
