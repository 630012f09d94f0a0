use crate::{Fault, FaultHook, request::Envelope};
use async_channel::Receiver;
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

/// Boxed envelope as carried by the queue.
pub(crate) type Job<R> = Box<dyn Envelope<R>>;

/// Body of a worker thread.
///
/// Pulls envelopes off the shared queue one at a time and executes them
/// against `resource` until the queue is closed and fully drained. Closing the
/// queue does not discard anything that was already admitted, so every
/// envelope in the queue at close time is still executed (or, if its
/// submitter gave up, answered with a cancellation) before the worker exits.
///
/// # Arguments
///
/// - `worker_id`: index of this worker, used in logs and faults.
/// - `queue`: receiving side of the pool's bounded queue, shared with every
///   other worker. The channel hands each envelope to exactly one receiver.
/// - `resource`: the shared resource handle.
/// - `hook`: observer for faults intercepted by [`execute`].
pub(crate) fn worker_loop<R>(
    worker_id: usize,
    queue: Receiver<Job<R>>,
    resource: Arc<R>,
    hook: FaultHook,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Ok(mut envelope) = queue.recv_blocking() {
        if envelope.is_abandoned() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker_id} skipping abandoned request");
            envelope.cancel();
            continue;
        }
        execute(worker_id, envelope.as_mut(), &resource, &hook);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

/// Runs one envelope inside the fault boundary.
///
/// A panic in the work item is caught here, reported to `hook`, and posted to
/// the submitter as a fault. The hook runs inside its own boundary; a panicking
/// hook is logged and otherwise ignored so that neither can take the worker
/// down.
pub(crate) fn execute<R>(
    worker_id: usize,
    envelope: &mut dyn Envelope<R>,
    resource: &R,
    hook: &FaultHook,
) {
    let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| envelope.run(resource))) else {
        return;
    };

    let fault = Fault::from_panic(worker_id, payload);
    if panic::catch_unwind(AssertUnwindSafe(|| hook.observe(&fault))).is_err() {
        #[cfg(feature = "tracing")]
        tracing::error!("Worker {worker_id} fault hook panicked");
    }
    envelope.fail(fault);
}
