//! Built-in bus observers.
//!
//! - `logging`: exports [`LogWriter`], which renders bus traffic through `tracing`.

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::{LOG_SOURCE, LogWriter};
