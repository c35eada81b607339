//! # Error Types
//!
//! Error handling for the attach rendezvous.
//!
//! Almost every failure here is recoverable by design: the library is
//! additive instrumentation, so the orchestrator logs these values instead of
//! propagating them into the host's startup path.

use thiserror::Error;

use crate::signal::Signal;

/// Main error type for rendezvous operations
///
/// ## Error Categories
///
/// 1. **Configuration**: malformed option values (usually downgraded to a warning)
/// 2. **Resolution**: no usable IPv4 address, executable could not be hashed
/// 3. **Connection**: the bus is unreachable or did not answer in time
/// 4. **Publish**: the discovery message could not be handed to the bus
/// 5. **Signal**: the OS refused to deliver the requested interrupt
/// 6. **Lifecycle**: a waiter was armed twice, the background runtime failed
/// 7. **I/O**: wrapped `std::io::Error`
#[derive(Error, Debug)]
pub enum RendezvousError
{
    /// An option value could not be interpreted
    #[error("Invalid configuration for {key}: {reason}")]
    Configuration
    {
        /// Name of the option (environment variable)
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Process identity could not be fully determined
    ///
    /// Callers substitute an empty address or the `unknown` fingerprint.
    #[error("Identity resolution failed: {0}")]
    Resolution(String),

    /// The message bus could not be reached
    ///
    /// Covers refused connections, DNS failures and the connect timeout.
    /// Only the discovery announcement is abandoned.
    #[error("Bus connection failed: {0}")]
    Connection(String),

    /// The discovery message could not be handed to the bus
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The interrupt cannot be waited for
    ///
    /// `SIGKILL`, `SIGSTOP` and the synchronous fault signals cannot be
    /// observed by a handler, so a waiter armed for them would never trip.
    #[error("Cannot listen for {signal}: {reason}")]
    Signal
    {
        /// The interrupt that was requested
        signal: Signal,
        /// Why registration failed
        reason: String,
    },

    /// The attach waiter was already armed in this process
    #[error("Attach waiter is already armed for {0}")]
    AlreadyArmed(Signal),

    /// The background runtime or a helper thread could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, RendezvousError>`
pub type RendezvousResult<T> = std::result::Result<T, RendezvousError>;
