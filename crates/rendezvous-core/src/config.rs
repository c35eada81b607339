//! # Configuration
//!
//! Loads [`AttachConfig`] from the process environment.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `RENDEZVOUS_IPV4` | auto-detect | Address to announce |
//! | `RENDEZVOUS_TAG` | `proc` | Process group tag |
//! | `RENDEZVOUS_ALIAS` | `bin` | Binary alias |
//! | `RENDEZVOUS_BUS_ENDPOINT` | bus file | `[tcp://]host[:port]` of the MQTT broker |
//! | `RENDEZVOUS_BUS_CHANNEL` | bus file | Topic the announcement goes to |
//! | `RENDEZVOUS_BUS_USER` / `RENDEZVOUS_BUS_PASSWORD` | none | Broker credentials |
//! | `RENDEZVOUS_AUTO_DISCOVERY` | `true` | Publish the announcement |
//! | `RENDEZVOUS_WAIT_FOR_ATTACH` | `true` | Arm the attach waiter |
//! | `RENDEZVOUS_SIGNAL` | `SIGUSR1` | Interrupt that trips the waiter |
//! | `RENDEZVOUS_BUS_FILE` | `/tmp/ddb/service_discovery/config` | Fallback endpoint/channel file |
//!
//! Loading never fails. Bad values are logged and replaced by defaults.

use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RendezvousError;
use crate::signal::{parse_signal, Signal};

/// Environment variable names
pub mod keys
{
    /// Address override
    pub const IP: &str = "RENDEZVOUS_IPV4";
    /// Process group tag
    pub const TAG: &str = "RENDEZVOUS_TAG";
    /// Binary alias
    pub const ALIAS: &str = "RENDEZVOUS_ALIAS";
    /// Broker endpoint
    pub const BUS_ENDPOINT: &str = "RENDEZVOUS_BUS_ENDPOINT";
    /// Announcement topic
    pub const BUS_CHANNEL: &str = "RENDEZVOUS_BUS_CHANNEL";
    /// Broker user name
    pub const BUS_USER: &str = "RENDEZVOUS_BUS_USER";
    /// Broker password
    pub const BUS_PASSWORD: &str = "RENDEZVOUS_BUS_PASSWORD";
    /// Discovery switch
    pub const AUTO_DISCOVERY: &str = "RENDEZVOUS_AUTO_DISCOVERY";
    /// Attach waiter switch
    pub const WAIT_FOR_ATTACH: &str = "RENDEZVOUS_WAIT_FOR_ATTACH";
    /// Interrupt to wait for
    pub const SIGNAL: &str = "RENDEZVOUS_SIGNAL";
    /// Fallback file holding endpoint and channel
    pub const BUS_FILE: &str = "RENDEZVOUS_BUS_FILE";
}

/// Default process group tag
pub const DEFAULT_TAG: &str = "proc";
/// Default binary alias
pub const DEFAULT_ALIAS: &str = "bin";
/// Default MQTT port when the endpoint has none
pub const DEFAULT_BUS_PORT: u16 = 1883;
/// Where the bus file is looked for when `RENDEZVOUS_BUS_FILE` is unset
pub const DEFAULT_BUS_FILE: &str = "/tmp/ddb/service_discovery/config";

/// Bounded waits used by the announcer and the shutdown coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts
{
    /// How long to wait for the broker to accept the connection
    pub connect: Duration,
    /// How long to wait for the publish acknowledgement
    pub publish: Duration,
    /// How long a disconnect may take before it is abandoned
    pub disconnect_grace: Duration,
}

impl Default for Timeouts
{
    fn default() -> Self
    {
        Self {
            connect: Duration::from_secs(5),
            publish: Duration::from_secs(5),
            disconnect_grace: Duration::from_millis(250),
        }
    }
}

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusEndpoint
{
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl FromStr for BusEndpoint
{
    type Err = RendezvousError;

    /// Accepts `host`, `host:port`, and either form behind `tcp://` or `mqtt://`.
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let invalid = |reason: &str| RendezvousError::Configuration {
            key: keys::BUS_ENDPOINT.to_string(),
            reason: format!("{reason}: {s:?}"),
        };

        let rest = s.trim();
        let rest = rest
            .strip_prefix("tcp://")
            .or_else(|| rest.strip_prefix("mqtt://"))
            .unwrap_or(rest)
            .trim_end_matches('/');

        if rest.contains("://") {
            return Err(invalid("unsupported scheme"));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("invalid port"))?),
            None => (rest, DEFAULT_BUS_PORT),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BusEndpoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Broker login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials
{
    /// User name
    pub user: String,
    /// Password (never printed)
    pub password: String,
}

impl fmt::Debug for Credentials
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to reach the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings
{
    /// Broker address
    pub endpoint: BusEndpoint,
    /// Topic the announcement is published to
    pub channel: String,
    /// Optional login
    pub credentials: Option<Credentials>,
}

/// Attach configuration
///
/// Immutable once loaded. `bus` is `None` when either the endpoint or the
/// channel is missing, which disables discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachConfig
{
    /// Explicit address to announce; auto-detected when `None`
    pub ip: Option<Ipv4Addr>,
    /// Process group tag
    pub tag: String,
    /// Binary alias
    pub alias: String,
    /// Bus settings, if discovery has somewhere to go
    pub bus: Option<BusSettings>,
    /// Publish the discovery announcement
    pub auto_discovery: bool,
    /// Arm the attach waiter
    pub wait_for_attach: bool,
    /// Interrupt that trips the waiter
    pub signal: Signal,
    /// Connect, publish and disconnect bounds
    pub timeouts: Timeouts,
}

impl Default for AttachConfig
{
    fn default() -> Self
    {
        Self {
            ip: None,
            tag: DEFAULT_TAG.to_string(),
            alias: DEFAULT_ALIAS.to_string(),
            bus: None,
            auto_discovery: true,
            wait_for_attach: true,
            signal: Signal::DEFAULT,
            timeouts: Timeouts::default(),
        }
    }
}

impl AttachConfig
{
    /// Load from the process environment.
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// ```rust
    /// use rendezvous_core::config::{keys, AttachConfig};
    ///
    /// let config = AttachConfig::from_lookup(|key| match key {
    ///     keys::TAG => Some("web".to_string()),
    ///     keys::WAIT_FOR_ATTACH => Some("no".to_string()),
    ///     keys::BUS_FILE => Some("/nonexistent".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.tag, "web");
    /// assert!(!config.wait_for_attach);
    /// assert!(config.bus.is_none());
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ip = non_empty(keys::IP).and_then(|raw| match raw.trim().parse::<Ipv4Addr>() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring {}; falling back to auto-detection", keys::IP);
                None
            }
        });

        let signal = lookup(keys::SIGNAL).map_or(Signal::DEFAULT, |raw| parse_signal(&raw));

        let bus_file = non_empty(keys::BUS_FILE).map_or_else(|| PathBuf::from(DEFAULT_BUS_FILE), PathBuf::from);
        let bus = load_bus_settings(
            non_empty(keys::BUS_ENDPOINT),
            non_empty(keys::BUS_CHANNEL),
            non_empty(keys::BUS_USER),
            lookup(keys::BUS_PASSWORD),
            &bus_file,
        );

        Self {
            ip,
            tag: lookup(keys::TAG).unwrap_or_else(|| DEFAULT_TAG.to_string()),
            alias: lookup(keys::ALIAS).unwrap_or_else(|| DEFAULT_ALIAS.to_string()),
            bus,
            auto_discovery: parse_flag(lookup(keys::AUTO_DISCOVERY).as_deref(), true),
            wait_for_attach: parse_flag(lookup(keys::WAIT_FOR_ATTACH).as_deref(), true),
            signal,
            timeouts: Timeouts::default(),
        }
    }
}

/// Interpret a boolean option.
///
/// `false`, `0` and `no` in any letter case are false; any other value that
/// is present is true; an absent option takes `default`. Surrounding
/// whitespace is ignored before matching, so `" no "` is false as well.
///
/// ```rust
/// use rendezvous_core::config::parse_flag;
///
/// assert!(!parse_flag(Some("NO"), true));
/// assert!(!parse_flag(Some(" no\n"), true));
/// assert!(parse_flag(Some("yes please"), false));
/// assert!(parse_flag(None, true));
/// ```
#[must_use]
pub fn parse_flag(value: Option<&str>, default: bool) -> bool
{
    match value {
        Some(raw) => !matches!(raw.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"),
        None => default,
    }
}

fn load_bus_settings(
    endpoint: Option<String>,
    channel: Option<String>,
    user: Option<String>,
    password: Option<String>,
    bus_file: &Path,
) -> Option<BusSettings>
{
    let (endpoint, channel) = match (endpoint, channel) {
        (Some(endpoint), Some(channel)) => (endpoint, channel),
        (endpoint, channel) => {
            let (file_endpoint, file_channel) = read_bus_file(bus_file).unwrap_or_default();
            (endpoint.or(file_endpoint)?, channel.or(file_channel)?)
        }
    };

    let endpoint = match endpoint.parse::<BusEndpoint>() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(error = %e, "Discovery disabled");
            return None;
        }
    };

    Some(BusSettings {
        endpoint,
        channel,
        credentials: user.map(|user| Credentials {
            user,
            password: password.unwrap_or_default(),
        }),
    })
}

/// Line 1 is the endpoint, line 2 the channel. Blank lines count as missing.
fn read_bus_file(path: &Path) -> Option<(Option<String>, Option<String>)>
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No bus file");
            return None;
        }
    };

    let mut lines = contents.lines().map(str::trim);
    let mut next = || lines.next().filter(|l| !l.is_empty()).map(ToString::to_string);
    let endpoint = next();
    let channel = next();
    debug!(path = %path.display(), ?endpoint, ?channel, "Read bus file");
    Some((endpoint, channel))
}
