//! # Rendezvous Utilities
//!
//! Logging bootstrap for processes that embed `rendezvous-core`.
//!
//! The core library only emits `tracing` events; it never installs a
//! subscriber. Hosts that do not already configure `tracing` can call one of
//! the initialisers here before running the attach sequence.

pub mod logging;

pub use logging::{LogFormat, LogLevel, LoggingError, init_logging, init_logging_to_file, init_logging_with_level};
pub use tracing::{debug, error, info, trace, warn};
