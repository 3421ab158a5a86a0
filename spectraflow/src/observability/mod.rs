//! Logging setup and timing helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the binary through [`init_logging`].

mod logging;
mod timing;

pub use logging::{init_logging, LogFormat, LOG_ENV};
pub use timing::SpanTimer;
