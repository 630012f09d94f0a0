//! Fault boundary support: turning a panic payload into a reportable value.

use core::{any::Any, fmt};
use std::sync::Arc;

/// An unexpected panic raised by a work item while a worker executed it.
///
/// Faults are bugs rather than operation errors. They are reported to the
/// pool's [`FaultHook`] and delivered to the submitting caller as
/// [`Error::Fault`](crate::Error::Fault).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("bug: work item panicked on worker {worker}: {message}")]
pub struct Fault {
    worker: usize,
    message: String,
}

impl Fault {
    /// Creates a fault raised on `worker` with the given description.
    pub fn new(worker: usize, message: impl Into<String>) -> Self {
        Self {
            worker,
            message: message.into(),
        }
    }

    /// Builds a fault from the payload captured by `catch_unwind`.
    ///
    /// `panic!` payloads are either a `&'static str` or a formatted `String`;
    /// anything else was raised with `panic_any` and has no printable form.
    pub(crate) fn from_panic(worker: usize, payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "panic with a non-string payload".to_string(),
            },
        };
        Self { worker, message }
    }

    /// Index of the worker the work item panicked on.
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// The panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Observer invoked with every fault a worker intercepts, before the fault is
/// delivered to the caller.
///
/// Hooks run on the worker thread. A hook that panics is contained by the
/// worker and does not stop it.
#[derive(Clone)]
pub struct FaultHook(Arc<dyn Fn(&Fault) + Send + Sync>);

impl FaultHook {
    pub fn new(hook: impl Fn(&Fault) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    /// A hook that does nothing. The caller still receives the fault.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn observe(&self, fault: &Fault) {
        (self.0)(fault);
    }
}

impl Default for FaultHook {
    /// Logs every fault at `error` level.
    fn default() -> Self {
        Self::new(|_fault| {
            #[cfg(feature = "tracing")]
            tracing::error!(
                worker = _fault.worker(),
                "Work item panicked: {}",
                _fault.message()
            );
        })
    }
}

impl fmt::Debug for FaultHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultHook").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn capture(f: impl FnOnce() + panic::UnwindSafe) -> Box<dyn Any + Send> {
        panic::catch_unwind(f).unwrap_err()
    }

    #[test]
    fn static_str_payload() {
        let fault = Fault::from_panic(0, capture(|| panic!("static message")));
        assert_eq!(fault.message(), "static message");
        assert_eq!(fault.worker(), 0);
    }

    #[test]
    fn formatted_payload() {
        let id = 7;
        let fault = Fault::from_panic(3, capture(move || panic!("missing document {id}")));
        assert_eq!(fault.message(), "missing document 7");
        assert_eq!(
            fault.to_string(),
            "bug: work item panicked on worker 3: missing document 7"
        );
    }

    #[test]
    fn opaque_payload() {
        let fault = Fault::from_panic(1, capture(|| panic::panic_any(42_u32)));
        assert_eq!(fault.message(), "panic with a non-string payload");
    }

    #[test]
    fn hook_observes_faults() {
        let seen = Arc::new(AtomicUsize::new(0));
        let hook = FaultHook::new({
            let seen = Arc::clone(&seen);
            move |fault| {
                assert_eq!(fault.message(), "boom");
                seen.fetch_add(1, Ordering::Relaxed);
            }
        });
        hook.observe(&Fault::new(0, "boom"));
        hook.clone().observe(&Fault::new(1, "boom"));
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }
}
