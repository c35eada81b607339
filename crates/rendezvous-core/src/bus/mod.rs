//! # Message Bus
//!
//! The publish/subscribe capability the announcer needs, and nothing more:
//! connect, publish, check liveness, disconnect.
//!
//! All calls are blocking with explicit bounds so the orchestrator can run
//! them inline during host startup.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BusSettings;
use crate::error::RendezvousResult;

pub mod mqtt;

pub use mqtt::{MqttBus, MqttConnector};

/// How a publish attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome
{
    /// The broker acknowledged the message
    Acknowledged,
    /// The message was refused or the session failed before the acknowledgement
    Rejected(String),
    /// No acknowledgement arrived within the publish timeout
    TimedOut,
}

impl PublishOutcome
{
    /// `true` for [`PublishOutcome::Acknowledged`].
    #[must_use]
    pub fn is_acknowledged(&self) -> bool
    {
        matches!(self, Self::Acknowledged)
    }
}

impl fmt::Display for PublishOutcome
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

/// A connection to the message bus.
///
/// One instance exists per process. The orchestrator creates it, the
/// announcer publishes through it, and only the shutdown coordinator closes it.
pub trait BusClient: Send + Sync
{
    /// Open the session, waiting at most `timeout`.
    ///
    /// ## Errors
    ///
    /// Returns `Connection` on refusal, network failure or timeout.
    fn connect(&self, timeout: Duration) -> RendezvousResult<()>;

    /// Publish `payload` to `channel` with at-least-once delivery and wait
    /// at most `timeout` for the acknowledgement.
    fn publish(&self, channel: &str, payload: &str, timeout: Duration) -> PublishOutcome;

    /// Whether the session is currently open.
    fn is_connected(&self) -> bool;

    /// Close the session, waiting at most `grace`. Closing an already
    /// closed session is a no-op.
    ///
    /// ## Errors
    ///
    /// Returns `Connection` if the close could not be confirmed in time.
    fn disconnect(&self, grace: Duration) -> RendezvousResult<()>;
}

/// Factory for [`BusClient`]s.
pub trait BusConnector: Send + Sync
{
    /// Build an unconnected client for `settings` identified as `client_id`.
    ///
    /// ## Errors
    ///
    /// Returns `Connection` if the client cannot be constructed.
    fn open(&self, settings: &BusSettings, client_id: &str) -> RendezvousResult<Arc<dyn BusClient>>;
}
