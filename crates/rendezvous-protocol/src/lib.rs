//! # rendezvous-protocol
//!
//! Wire format for the discovery announcement a Rendezvous-instrumented
//! process publishes when it starts.
//!
//! ## Format
//!
//! ```text
//! <ip>:<tag>:<pid>:<fingerprint>=<alias>
//! ```
//!
//! Fields are colon-separated except the last pair, which is joined with `=`.
//! There is **no escaping**: existing listeners split on the raw delimiters,
//! so a `:` or `=` inside `tag`, `fingerprint` or `alias` produces a message that
//! decodes differently from what was sent. [`DiscoveryMessage::is_ambiguous`]
//! lets an announcer detect that case and log it, but the bytes on the wire
//! are kept exactly as listeners expect them.
//!
//! ## Example
//!
//! ```rust
//! use std::net::Ipv4Addr;
//!
//! use rendezvous_protocol::DiscoveryMessage;
//!
//! let msg = DiscoveryMessage::new(Ipv4Addr::new(10, 0, 0, 5), "proc", 1234, "abc123", "bin");
//! assert_eq!(msg.to_string(), "10.0.0.5:proc:1234:abc123=bin");
//!
//! let decoded: DiscoveryMessage = "10.0.0.5:proc:1234:abc123=bin".parse()?;
//! assert_eq!(decoded, msg);
//! # Ok::<(), rendezvous_protocol::ProtocolError>(())
//! ```

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Separator between the leading fields.
pub const FIELD_DELIMITER: char = ':';

/// Separator between the fingerprint and the alias.
pub const ALIAS_DELIMITER: char = '=';

/// Prefix of the client identifier used when connecting to the bus.
pub const CLIENT_ID_PREFIX: &str = "rendezvous_client_";

/// Alias assumed by listeners when a message carries none.
pub const DEFAULT_LISTENER_ALIAS: &str = "app";

/// Fingerprint placeholder used when the executable could not be hashed.
pub const UNKNOWN_FINGERPRINT: &str = "unknown";

/// Build the bus client identifier for a process.
///
/// ```rust
/// assert_eq!(rendezvous_protocol::client_id(42), "rendezvous_client_42");
/// ```
#[must_use]
pub fn client_id(pid: u32) -> String
{
    format!("{CLIENT_ID_PREFIX}{pid}")
}

/// Errors produced while decoding a discovery payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError
{
    /// The payload has fewer than four `:`-separated fields.
    #[error("Malformed discovery message: expected 4 fields, found {0}")]
    MissingFields(usize),

    /// The IP field is neither a dotted quad nor a decimal `u32`.
    #[error("Invalid IPv4 address in discovery message: {0:?}")]
    InvalidAddress(String),

    /// The PID field is not a non-negative integer.
    #[error("Invalid PID in discovery message: {0:?}")]
    InvalidPid(String),
}

/// A single "I am here" announcement.
///
/// Created once by the announcer, published once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryMessage
{
    /// Non-loopback IPv4 address of the announcing host
    pub ip: Ipv4Addr,
    /// Free-form process group tag
    pub tag: String,
    /// Process ID of the announcing process
    pub pid: u32,
    /// Lowercase hex SHA-256 of the running executable, or [`UNKNOWN_FINGERPRINT`]
    pub fingerprint: String,
    /// Human-friendly name for the binary
    pub alias: String,
}

impl DiscoveryMessage
{
    /// Create a new message from its parts.
    #[must_use]
    pub fn new(
        ip: Ipv4Addr,
        tag: impl Into<String>,
        pid: u32,
        fingerprint: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self
    {
        Self {
            ip,
            tag: tag.into(),
            pid,
            fingerprint: fingerprint.into(),
            alias: alias.into(),
        }
    }

    /// Returns `true` if any field contains a delimiter that would make the
    /// encoded form decode differently.
    ///
    /// `tag`, `fingerprint` and `alias` must not contain `:` or `=`. This
    /// crate's decoder tolerates both in the alias, but listeners that split
    /// the whole payload on every delimiter truncate it.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool
    {
        let has_delimiter = |s: &str| s.contains(FIELD_DELIMITER) || s.contains(ALIAS_DELIMITER);
        has_delimiter(&self.tag) || has_delimiter(&self.fingerprint) || has_delimiter(&self.alias)
    }

    /// Decode a payload received from the bus.
    ///
    /// Equivalent to `payload.parse::<DiscoveryMessage>()`.
    ///
    /// ## Errors
    ///
    /// Returns a [`ProtocolError`] when the payload has fewer than four fields,
    /// or when the IP or PID field cannot be parsed.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError>
    {
        payload.parse()
    }
}

impl fmt::Display for DiscoveryMessage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(
            f,
            "{ip}{d}{tag}{d}{pid}{d}{fp}{a}{alias}",
            ip = self.ip,
            tag = self.tag,
            pid = self.pid,
            fp = self.fingerprint,
            alias = self.alias,
            d = FIELD_DELIMITER,
            a = ALIAS_DELIMITER,
        )
    }
}

impl FromStr for DiscoveryMessage
{
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let fields: Vec<&str> = s.trim_end().splitn(4, FIELD_DELIMITER).collect();
        let &[ip, tag, pid, identifier] = fields.as_slice() else {
            return Err(ProtocolError::MissingFields(fields.len()));
        };

        let ip = parse_address(ip)?;
        let pid = pid.parse::<u32>().map_err(|_| ProtocolError::InvalidPid(pid.to_string()))?;
        let (fingerprint, alias) = identifier
            .split_once(ALIAS_DELIMITER)
            .unwrap_or((identifier, DEFAULT_LISTENER_ALIAS));

        Ok(Self::new(ip, tag, pid, fingerprint, alias))
    }
}

/// Accept both the dotted-quad form and the decimal `u32` form older C
/// reporters put on the wire.
fn parse_address(field: &str) -> Result<Ipv4Addr, ProtocolError>
{
    if let Ok(addr) = field.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    field
        .parse::<u32>()
        .map(Ipv4Addr::from)
        .map_err(|_| ProtocolError::InvalidAddress(field.to_string()))
}
