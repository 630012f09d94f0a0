//! The worker pool: a bounded queue of request envelopes drained by a fixed
//! set of worker threads.
//!
//! ## Structure
//!
//! - [`manager`] - the [`Pool`] controller and its [`PoolBuilder`].
//! - [`worker`] - the loop each worker thread runs, including the fault
//!   boundary around every work item.

mod manager;
mod worker;

pub use manager::*;
