//! Error types for the worker pool.
//!
//! A single [`Error`] enum covers every failure a caller can observe, from
//! construction through submission to shutdown. It is generic over the error
//! type `E` produced by work items so that ordinary operation errors reach the
//! caller verbatim in [`Error::Work`], while faults the pool synthesizes itself
//! stay distinguishable.
//!
//! ## Error Cases
//! - `Work`: the work item returned an error.
//! - `Fault`: the work item panicked; this is a bug, not an operation error.
//! - `Closed`: the pool stopped admitting work before the request got in.
//! - `Cancelled`: the caller's context was cancelled while waiting.
//! - `InvalidConfig`, `Connect`, `Spawn`: the pool could not be built.
//! - `Release`: the owned resource failed to release during close.
//! - `AlreadyStarted`: a default pool is already registered.

use crate::Fault;
use core::convert::Infallible;

/// Boxed error used where the concrete resource error type is erased.
pub type BoxError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// A result type whose error is the pool's [`Error`], infallible in its work
/// slot by default.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All possible errors that `dbworker` can produce.
///
/// The generic parameter `E` is the error type of the submitted work item. APIs
/// that never run a work item (construction, close) use the default
/// [`Infallible`], which makes the `Work` variant unconstructible there.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error<E = Infallible> {
    /// The work item ran and returned this error.
    #[error("work failed: {0}")]
    Work(#[source] E),

    /// The work item panicked. The worker survived and reported the panic to
    /// the pool's fault hook.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// The pool is closing or closed and no longer admits work.
    #[error("worker pool is closed")]
    Closed,

    /// The caller's context was cancelled before a response arrived.
    #[error("request cancelled while waiting for the worker pool")]
    Cancelled,

    /// Pool sizing is unusable.
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The pool could not acquire the resource it was asked to own.
    #[error("failed to connect resource: {0}")]
    Connect(#[source] BoxError),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The owned resource failed to release during close. Workers were still
    /// drained and joined.
    #[error("failed to release resource: {0}")]
    Release(#[source] BoxError),

    /// A process-wide default pool is already registered.
    #[error("default worker pool already started")]
    AlreadyStarted,
}

impl<E> Error<E> {
    /// Returns `true` if this error was synthesized from a panicking work
    /// item.
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Returns `true` if the request was refused because the pool is closed.
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if the caller stopped waiting because its context was
    /// cancelled.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the work item's own error, if that is what this is.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the fault, if the work item panicked.
    pub const fn as_fault(&self) -> Option<&Fault> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

impl Error {
    /// Lifts a pool-level error into the error type of a submission.
    pub fn widen<E>(self) -> Error<E> {
        match self {
            Self::Work(never) => match never {},
            Self::Fault(fault) => Error::Fault(fault),
            Self::Closed => Error::Closed,
            Self::Cancelled => Error::Cancelled,
            Self::InvalidConfig { reason } => Error::InvalidConfig { reason },
            Self::Connect(err) => Error::Connect(err),
            Self::Spawn(err) => Error::Spawn(err),
            Self::Release(err) => Error::Release(err),
            Self::AlreadyStarted => Error::AlreadyStarted,
        }
    }
}
