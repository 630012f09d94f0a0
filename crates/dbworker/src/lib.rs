#![doc = include_str!("../README.md")]

mod config;
mod connect;
mod context;
mod error;
mod fault;
pub mod global;
mod pool;
mod request;

pub use crate::config::*;
pub use crate::connect::*;
pub use crate::context::*;
pub use crate::error::*;
pub use crate::fault::*;
pub use crate::pool::*;
// Public re-export so callers can build contexts from their own tokens
// without depending on `tokio-util` directly.
pub use tokio_util::sync::CancellationToken;
