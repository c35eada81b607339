//! # Discovery Announcer
//!
//! Connects to the bus and publishes one "I am here" message.
//!
//! This is fire-and-forget telemetry. Every failure is returned as a value
//! for the orchestrator to log; none of them stops the host from starting.
//! Connect and publish are each bounded by their own timeout, so the worst
//! case delay is the sum of the two.

use std::sync::Arc;

use rendezvous_protocol::{client_id, DiscoveryMessage};
use tracing::{error, info, warn};

use crate::bus::{BusClient, BusConnector, PublishOutcome};
use crate::config::AttachConfig;
use crate::error::RendezvousResult;
use crate::identity::ProcessIdentity;

/// Why no announcement was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason
{
    /// Auto-discovery is switched off
    Disabled,
    /// No bus endpoint or channel is configured
    NoBus,
    /// No address is known for this process
    NoAddress,
}

/// A publish attempt on an established connection
#[derive(Clone)]
pub struct Published
{
    /// The connection, left open for the shutdown coordinator to close
    pub bus: Arc<dyn BusClient>,
    /// What was sent
    pub message: DiscoveryMessage,
    /// How the publish ended
    pub outcome: PublishOutcome,
}

impl std::fmt::Debug for Published
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Published")
            .field("message", &self.message)
            .field("outcome", &self.outcome)
            .field("connected", &self.bus.is_connected())
            .finish()
    }
}

/// Result of [`Announcer::announce`] when nothing went wrong at connect time
#[derive(Debug, Clone)]
pub enum Announcement
{
    /// Preconditions not met; nothing was done
    Skipped(SkipReason),
    /// Connected and attempted the publish
    Published(Published),
}

impl Announcement
{
    /// The open connection, if one was made.
    #[must_use]
    pub fn bus(&self) -> Option<&Arc<dyn BusClient>>
    {
        match self {
            Self::Published(published) => Some(&published.bus),
            Self::Skipped(_) => None,
        }
    }
}

/// Publishes the discovery announcement
pub struct Announcer
{
    connector: Arc<dyn BusConnector>,
}

impl Announcer
{
    /// Announce through clients built by `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn BusConnector>) -> Self
    {
        Self { connector }
    }

    /// Announce `identity` according to `config`.
    ///
    /// Returns `Skipped` when discovery is disabled, no bus is configured, or
    /// no address is known. Otherwise connects, publishes once with
    /// at-least-once delivery, and returns the connection with the outcome.
    ///
    /// ## Errors
    ///
    /// Returns `Connection` if the bus cannot be reached within the connect
    /// timeout. The announcement is abandoned in that case.
    pub fn announce(&self, identity: &ProcessIdentity, config: &AttachConfig) -> RendezvousResult<Announcement>
    {
        if !config.auto_discovery {
            return Ok(Announcement::Skipped(SkipReason::Disabled));
        }
        let Some(bus_settings) = &config.bus else {
            return Ok(Announcement::Skipped(SkipReason::NoBus));
        };
        let Some(message) = identity.discovery_message() else {
            return Ok(Announcement::Skipped(SkipReason::NoAddress));
        };

        if message.is_ambiguous() {
            warn!(
                tag = %message.tag,
                fingerprint = %message.fingerprint,
                alias = %message.alias,
                "Discovery fields contain ':' or '='; listeners will misread this message"
            );
        }

        let endpoint = &bus_settings.endpoint;
        let bus = self.connector.open(bus_settings, &client_id(identity.pid))?;
        bus.connect(config.timeouts.connect)?;
        info!(%endpoint, "Connected to bus");

        let payload = message.to_string();
        let outcome = bus.publish(&bus_settings.channel, &payload, config.timeouts.publish);
        match &outcome {
            PublishOutcome::Acknowledged => {
                info!(channel = %bus_settings.channel, %payload, "Discovery message published");
            }
            PublishOutcome::Rejected(reason) => {
                error!(channel = %bus_settings.channel, %reason, "Failed to publish discovery message");
            }
            PublishOutcome::TimedOut => {
                warn!(
                    channel = %bus_settings.channel,
                    timeout = ?config.timeouts.publish,
                    "Discovery publish timed out"
                );
            }
        }

        Ok(Announcement::Published(Published { bus, message, outcome }))
    }
}
