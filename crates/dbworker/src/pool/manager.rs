//! The pool controller.
//!
//! [`Pool`] owns the bounded queue, the worker threads, and the shared
//! resource. Callers submit work items with [`Pool::submit`] (or
//! [`Pool::submit_blocking`]) and are suspended only until their own request
//! completes. [`Pool::close`] stops admission, lets the workers drain whatever
//! is queued, joins them, and finally releases the resource if the pool owns
//! it.

use super::worker::{Job, worker_loop};
use crate::{
    BoxError, Connect, Context, Error, FaultHook, PoolConfig, Result, request::Request,
};
use async_channel::Sender;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

/// Releases an owned resource during close.
type Release<R> = fn(&R) -> core::result::Result<(), BoxError>;

fn disconnect<R: Connect>(resource: &R) -> core::result::Result<(), BoxError> {
    resource.disconnect().map_err(Into::into)
}

/// A fixed pool of worker threads draining a bounded queue of work items that
/// run against a shared resource `R`.
///
/// The pool caps the number of concurrent operations on the resource at the
/// configured worker count. Submitters beyond what the workers and the queue
/// can hold are held back until a slot frees up.
///
/// Requests are dequeued in submission order across the whole pool, but may
/// complete in any order. A work item that panics is reported to the pool's
/// [`FaultHook`] and surfaces to its submitter as
/// [`Error::Fault`]; the worker that ran it keeps serving.
///
/// # Example
///
/// ```
/// use dbworker::{Context, Pool, PoolConfig};
/// use std::{convert::Infallible, sync::Arc};
///
/// let pool = Pool::with_resource(Arc::new(40_u64), &PoolConfig::new(2, 4))?;
/// let answer = pool.submit_blocking(Context::new(), |_ctx, n: &u64| {
///     Ok::<_, Infallible>(n + 2)
/// });
/// assert_eq!(answer.ok(), Some(42));
/// pool.close()?;
/// # Ok::<(), dbworker::Error>(())
/// ```
pub struct Pool<R> {
    queue: Sender<Job<R>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    resource: Arc<R>,
    release: Option<Release<R>>,
    workers: usize,
    capacity: usize,
}

impl<R> Pool<R>
where
    R: Send + Sync + 'static,
{
    /// Starts a pool over a resource owned by the caller.
    ///
    /// Closing the pool stops its workers but never releases `resource`.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or a worker thread cannot be
    /// spawned.
    pub fn with_resource(resource: Arc<R>, config: &PoolConfig) -> Result<Self> {
        PoolBuilder::new(*config).attach(resource)
    }

    /// Submits a work item and waits for its outcome.
    ///
    /// The request is enqueued (waiting while the queue is full), executed by
    /// exactly one worker, and its outcome returned. The work item never runs
    /// on the caller's thread.
    ///
    /// Cancelling `ctx` stops the *wait* at either stage with
    /// [`Error::Cancelled`]. A request that is still queued when it is
    /// cancelled is skipped by the worker that dequeues it; one that is already
    /// running is left to finish, since it may already have touched the
    /// resource. Dropping the returned future has the same effect, which makes
    /// it safe to wrap in a timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Work`] with the work item's own error.
    /// - [`Error::Fault`] if the work item panicked.
    /// - [`Error::Closed`] if the pool stopped admitting work first.
    /// - [`Error::Cancelled`] if `ctx` was cancelled while waiting.
    pub async fn submit<T, E, F>(&self, ctx: Context, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce(&Context, &R) -> core::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let token = ctx.cancellation().clone();
        let (request, response) = Request::new(ctx, work);
        let envelope: Job<R> = Box::new(request);

        tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            admitted = self.queue.send(envelope) => {
                if admitted.is_err() {
                    return Err(Error::Closed);
                }
            }
        }

        tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled),
            outcome = response => {
                // The slot is only dropped unanswered if the envelope was
                // discarded without reaching a worker.
                outcome.unwrap_or(Err(Error::Closed))
            }
        }
    }

    /// Blocking form of [`Pool::submit`] for synchronous callers.
    ///
    /// Blocks the current thread; do not call it from inside an async task.
    ///
    /// # Errors
    ///
    /// Same as [`Pool::submit`].
    pub fn submit_blocking<T, E, F>(&self, ctx: Context, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce(&Context, &R) -> core::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        futures::executor::block_on(self.submit(ctx, work))
    }
}

impl<R> Pool<R>
where
    R: Connect,
{
    /// Connects to the resource and starts a pool that owns it.
    ///
    /// The resource is disconnected by [`Pool::close`] after all workers have
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the resource is unreachable, or an error
    /// if `config` is invalid or a worker thread cannot be spawned.
    pub fn connect(resource: &R::Config, config: &PoolConfig) -> Result<Self> {
        PoolBuilder::new(*config).connect(resource)
    }
}

impl<R> Pool<R> {
    /// Stops admitting work, drains the queue, joins every worker, and then
    /// releases the resource if this pool owns it.
    ///
    /// Requests already queued are still executed. Submissions that have not
    /// been admitted by the time the queue closes fail with
    /// [`Error::Closed`], including ones waiting on a full queue.
    ///
    /// Only the first call does any work. A call made while another is still
    /// draining waits for it to finish and then returns `Ok(())`, so no call
    /// returns before every worker has stopped.
    ///
    /// This blocks until every in-flight work item has returned. Calling it
    /// from a work item running on this pool deadlocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Release`] if releasing the owned resource failed. The
    /// workers are stopped regardless.
    pub fn close(&self) -> Result<()> {
        // Held until the workers are joined and the resource released, so a
        // concurrent close blocks here and then finds nothing left to do.
        let mut handles = self.handles.lock();

        // Closing the channel is the admission cutoff: it is atomic with
        // respect to senders and reports whether this call did it.
        if !self.queue.close() {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::info!("Stopping worker pool ({} requests queued)", self.queue.len());

        join_workers(handles.drain(..));

        let released = match self.release {
            Some(release) => release(&self.resource).map_err(Error::Release),
            None => Ok(()),
        };

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool stopped");
        released
    }

    /// Number of worker threads.
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Queue capacity.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of requests currently waiting in the queue. Useful as a load
    /// signal for the resource behind the pool.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` once [`Pool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Returns `true` if [`Pool::close`] releases the resource.
    pub const fn owns_resource(&self) -> bool {
        self.release.is_some()
    }

    /// The shared resource.
    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }
}

impl<R> Drop for Pool<R> {
    fn drop(&mut self) {
        // Let the workers drain and exit on their own; joining or releasing
        // here could block the dropping thread indefinitely.
        if self.queue.close() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker pool dropped without close; workers were detached");
        }
    }
}

/// Configures and starts a [`Pool`].
#[derive(Debug)]
pub struct PoolBuilder {
    config: PoolConfig,
    fault_hook: FaultHook,
    thread_name: String,
}

impl PoolBuilder {
    pub const DEFAULT_THREAD_NAME: &'static str = "dbworker";

    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            fault_hook: FaultHook::default(),
            thread_name: Self::DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Replaces the default fault hook, which logs faults at `error` level.
    #[must_use]
    pub fn fault_hook(mut self, hook: FaultHook) -> Self {
        self.fault_hook = hook;
        self
    }

    /// Prefix for worker thread names; workers are named `{prefix}-{index}`.
    #[must_use]
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Starts the pool over a resource owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a worker thread
    /// cannot be spawned.
    pub fn attach<R>(self, resource: Arc<R>) -> Result<Pool<R>>
    where
        R: Send + Sync + 'static,
    {
        self.config.validate()?;
        self.spawn(resource, None)
    }

    /// Connects to the resource and starts a pool that owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the resource is unreachable, or an error
    /// if the configuration is invalid or a worker thread cannot be spawned.
    pub fn connect<R>(self, config: &R::Config) -> Result<Pool<R>>
    where
        R: Connect,
    {
        self.config.validate()?;
        let resource = R::connect(config).map_err(|err| Error::Connect(err.into()))?;
        self.spawn(Arc::new(resource), Some(disconnect::<R>))
    }

    fn spawn<R>(self, resource: Arc<R>, release: Option<Release<R>>) -> Result<Pool<R>>
    where
        R: Send + Sync + 'static,
    {
        let PoolConfig {
            workers,
            queue_capacity,
        } = self.config;
        let (tx, rx) = async_channel::bounded(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let shared = Arc::clone(&resource);
            let hook = self.fault_hook.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{worker_id}", self.thread_name))
                .spawn(move || worker_loop(worker_id, rx, shared, hook));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    abandon(&tx, handles, &resource, release);
                    return Err(Error::Spawn(err));
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Started {workers} workers, queue capacity: {queue_capacity}");

        Ok(Pool {
            queue: tx,
            handles: Mutex::new(handles),
            resource,
            release,
            workers,
            capacity: queue_capacity,
        })
    }
}

fn join_workers(handles: impl IntoIterator<Item = JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!("Worker thread panicked outside of the fault boundary");
        }
    }
}

/// Tears down a pool whose startup failed part way: the workers that did
/// start see the closed queue, drain it and are joined before an owned
/// resource is released.
fn abandon<R>(
    queue: &Sender<Job<R>>,
    handles: Vec<JoinHandle<()>>,
    resource: &R,
    release: Option<Release<R>>,
) {
    queue.close();
    join_workers(handles);
    let Some(release) = release else {
        return;
    };
    if let Err(_err) = release(resource) {
        #[cfg(feature = "tracing")]
        tracing::error!("Failed to release resource after aborted startup: {_err}");
    }
}
