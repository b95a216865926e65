//! Shared domain types for the spectrophotometer workspace.

pub mod config;
pub mod events;
pub mod frame;
pub mod profile;
pub mod roi;
pub mod session;
pub mod telemetry;

mod errors;

pub use errors::{ConnectError, ReadError, Result, SpectroError};
