#![doc = include_str!("../README.md")]

mod error;
mod fixture;
mod memdb;

pub use crate::error::*;
pub use crate::fixture::*;
pub use crate::memdb::*;
// Re-export so tests can build documents without naming `serde_json`.
pub use serde_json::{Value, json};
