//! # Process Identity
//!
//! Who and where this process is: the address a debugger should connect to,
//! the PID, and a SHA-256 fingerprint of the running executable so a tool can
//! match the process to the exact build it has symbols for.
//!
//! Every lookup here degrades instead of failing. No address means discovery
//! is skipped; no fingerprint means the `unknown` sentinel goes on the wire.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, SocketAddrV6};
use std::path::Path;
use std::{env, process};

use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockaddrStorage;

use rendezvous_protocol::{DiscoveryMessage, UNKNOWN_FINGERPRINT};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::AttachConfig;
use crate::error::{RendezvousError, RendezvousResult};

/// Read buffer used while hashing; the file is never loaded whole.
const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Identity of the running process
///
/// Computed once at startup and never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity
{
    /// Non-loopback IPv4 address, if one was configured or found
    pub ip: Option<Ipv4Addr>,
    /// Process group tag
    pub tag: String,
    /// Binary alias
    pub alias: String,
    /// Process ID
    pub pid: u32,
    /// Lowercase hex SHA-256 of the executable, or `unknown`
    pub fingerprint: String,
}

impl ProcessIdentity
{
    /// Resolve the identity of the current process.
    ///
    /// The configured address wins over auto-detection. Failures are logged
    /// and replaced by `None` / [`UNKNOWN_FINGERPRINT`].
    #[must_use]
    pub fn resolve(config: &AttachConfig) -> Self
    {
        let pid = process::id();

        let ip = config.ip.or_else(|| match non_loopback_ipv4() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(error = %e, "Could not determine a non-loopback IPv4 address; discovery will be skipped");
                None
            }
        });

        let fingerprint = executable_fingerprint().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fingerprint executable");
            UNKNOWN_FINGERPRINT.to_string()
        });

        debug!(pid, ip = ?ip, %fingerprint, "Resolved process identity");

        Self {
            ip,
            tag: config.tag.clone(),
            alias: config.alias.clone(),
            pid,
            fingerprint,
        }
    }

    /// Build the announcement for this identity.
    ///
    /// Returns `None` when no address is known, since a listener could not
    /// reach the process anyway.
    #[must_use]
    pub fn discovery_message(&self) -> Option<DiscoveryMessage>
    {
        self.ip
            .map(|ip| DiscoveryMessage::new(ip, self.tag.clone(), self.pid, self.fingerprint.clone(), self.alias.clone()))
    }
}

/// Hash the currently running executable.
///
/// ## Errors
///
/// Returns `Resolution` if the executable path cannot be determined or the
/// file cannot be read.
pub fn executable_fingerprint() -> RendezvousResult<String>
{
    let path = env::current_exe()
        .map_err(|e| RendezvousError::Resolution(format!("failed to locate executable: {e}")))?;
    fingerprint_file(&path)
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
///
/// ## Errors
///
/// Returns `Resolution` if the file cannot be opened or read.
pub fn fingerprint_file(path: &Path) -> RendezvousResult<String>
{
    let read_failed = |e: io::Error| RendezvousError::Resolution(format!("failed to hash {}: {e}", path.display()));

    let file = File::open(path).map_err(read_failed)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).map_err(read_failed)?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// First non-loopback address that has an IPv4 form.
///
/// ## Errors
///
/// Returns `Resolution` if interfaces cannot be enumerated or none qualifies.
pub fn non_loopback_ipv4() -> RendezvousResult<Ipv4Addr>
{
    let addrs = interface_addresses()?;
    select_ipv4(addrs).ok_or_else(|| RendezvousError::Resolution("no non-loopback IPv4 address found".to_string()))
}

/// Pick the first address that is not loopback and is expressible as IPv4
/// (plain IPv4, or IPv4-mapped IPv6), in enumeration order.
pub fn select_ipv4<I>(addrs: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = IpAddr>,
{
    addrs.into_iter().find_map(|addr| {
        if addr.is_loopback() {
            return None;
        }
        let v4 = match addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
        };
        (!v4.is_loopback()).then_some(v4)
    })
}

/// Every address bound to a local interface, in kernel order.
///
/// Uses `getifaddrs(3)`; entries without an address or with a family other
/// than `AF_INET`/`AF_INET6` are skipped.
///
/// ## Errors
///
/// Returns `Resolution` if `getifaddrs()` fails.
pub fn interface_addresses() -> RendezvousResult<Vec<IpAddr>>
{
    let interfaces = getifaddrs()
        .map_err(|e| RendezvousError::Resolution(format!("failed to get interface addresses: {e}")))?;

    Ok(interfaces
        .filter_map(|interface| interface.address.as_ref().and_then(storage_to_ip))
        .collect())
}

fn storage_to_ip(storage: &SockaddrStorage) -> Option<IpAddr>
{
    if let Some(sin) = storage.as_sockaddr_in() {
        return Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
    }
    storage
        .as_sockaddr_in6()
        .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
}

#[cfg(test)]
mod tests
{
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn test_select_skips_loopback()
    {
        let addrs = [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6)),
        ];
        assert_eq!(select_ipv4(addrs), Some(Ipv4Addr::new(10, 0, 0, 5)));
    }

    #[test]
    fn test_select_accepts_mapped_ipv6()
    {
        let addrs = [
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V6("fe80::1".parse().unwrap()),
            IpAddr::V6(Ipv4Addr::new(192, 168, 0, 9).to_ipv6_mapped()),
        ];
        assert_eq!(select_ipv4(addrs), Some(Ipv4Addr::new(192, 168, 0, 9)));
    }

    #[test]
    fn test_select_none_when_only_loopback()
    {
        let addrs = [
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)),
            IpAddr::V6(Ipv4Addr::LOCALHOST.to_ipv6_mapped()),
        ];
        assert_eq!(select_ipv4(addrs), None);
    }

    #[test]
    fn test_interface_enumeration_includes_loopback()
    {
        let addrs = interface_addresses().unwrap();
        assert!(addrs.iter().any(IpAddr::is_loopback));
    }

    #[test]
    fn test_discovery_message_requires_ip()
    {
        let mut identity = ProcessIdentity {
            ip: None,
            tag: "proc".to_string(),
            alias: "bin".to_string(),
            pid: 1234,
            fingerprint: "abc123".to_string(),
        };
        assert!(identity.discovery_message().is_none());

        identity.ip = Some(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            identity.discovery_message().unwrap().to_string(),
            "10.0.0.5:proc:1234:abc123=bin"
        );
    }
}
