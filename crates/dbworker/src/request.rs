//! Request envelopes passed from submitters to workers.
//!
//! Each submission is wrapped in a [`Request`] that owns the caller's
//! [`Context`], the work item, and a private single-use response slot. Workers
//! only ever see requests as `Box<dyn Envelope<R>>`, which erases the work
//! item's result and error types so one queue can carry any submission made
//! against the same resource.

use crate::{Context, Error, Fault};
use tokio::sync::oneshot;

/// Outcome posted back to the submitter.
pub(crate) type Outcome<T, E> = Result<T, Error<E>>;

/// A queued request, as seen by a worker.
pub(crate) trait Envelope<R>: Send {
    /// The submitter no longer waits for this request: its context was
    /// cancelled or its response receiver was dropped.
    fn is_abandoned(&self) -> bool;

    /// Runs the work item against `resource` and posts its outcome.
    ///
    /// Panics raised by the work item propagate out of this call; the worker's
    /// fault boundary catches them and reports through [`Envelope::fail`].
    fn run(&mut self, resource: &R);

    /// Posts a fault outcome unless an outcome was already posted.
    fn fail(&mut self, fault: Fault);

    /// Posts a cancellation outcome without running the work item.
    fn cancel(&mut self);
}

pub(crate) struct Request<T, E, F> {
    ctx: Context,
    work: Option<F>,
    slot: Option<oneshot::Sender<Outcome<T, E>>>,
}

impl<T, E, F> Request<T, E, F> {
    pub(crate) fn new(ctx: Context, work: F) -> (Self, oneshot::Receiver<Outcome<T, E>>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            ctx,
            work: Some(work),
            slot: Some(tx),
        };
        (request, rx)
    }

    fn respond(&mut self, outcome: Outcome<T, E>) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        if slot.send(outcome).is_err() {
            #[cfg(feature = "tracing")]
            tracing::trace!("Submitter stopped waiting before the response was posted");
        }
    }
}

impl<R, T, E, F> Envelope<R> for Request<T, E, F>
where
    F: FnOnce(&Context, &R) -> Result<T, E> + Send,
    T: Send,
    E: Send,
{
    fn is_abandoned(&self) -> bool {
        self.ctx.is_cancelled() || self.slot.as_ref().is_none_or(oneshot::Sender::is_closed)
    }

    fn run(&mut self, resource: &R) {
        let Some(work) = self.work.take() else {
            return;
        };
        let outcome = work(&self.ctx, resource).map_err(Error::Work);
        self.respond(outcome);
    }

    fn fail(&mut self, fault: Fault) {
        self.respond(Err(Error::Fault(fault)));
    }

    fn cancel(&mut self) {
        self.work = None;
        self.respond(Err(Error::Cancelled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    type Work = fn(&Context, &u32) -> io::Result<u32>;

    fn double(_: &Context, n: &u32) -> io::Result<u32> {
        Ok(n * 2)
    }

    #[test]
    fn run_posts_the_work_result_once() {
        let (mut request, mut rx) = Request::new(Context::new(), double as Work);
        Envelope::<u32>::run(&mut request, &21);
        Envelope::<u32>::fail(&mut request, Fault::new(0, "late"));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 42);
    }

    #[test]
    fn work_errors_become_work_variant() {
        let (mut request, mut rx) = Request::new(Context::new(), |_: &Context, _: &u32| {
            Err::<(), _>(io::Error::other("rejected"))
        });
        Envelope::<u32>::run(&mut request, &1);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.into_work().unwrap().to_string(), "rejected");
    }

    #[test]
    fn dropped_receiver_marks_request_abandoned() {
        let (request, rx) = Request::new(Context::new(), double as Work);
        assert!(!Envelope::<u32>::is_abandoned(&request));
        drop(rx);
        assert!(Envelope::<u32>::is_abandoned(&request));
    }

    #[test]
    fn cancel_skips_the_work_item() {
        let ctx = Context::new();
        let (mut request, mut rx) =
            Request::new(ctx.clone(), |_: &Context, _: &u32| -> io::Result<()> {
                unreachable!("cancelled requests never run")
            });
        ctx.cancel();
        assert!(Envelope::<u32>::is_abandoned(&request));
        Envelope::<u32>::cancel(&mut request);
        Envelope::<u32>::run(&mut request, &0);
        assert!(rx.try_recv().unwrap().unwrap_err().is_cancelled());
    }
}
