//! # Signals
//!
//! The interrupt a waiter parks on, and the parser for its configured form.
//!
//! A signal can be configured as a positive number (`"10"`, `"40"` for a
//! real-time signal) or as a name with an optional `SIG` prefix in any letter
//! case (`"SIGUSR1"`, `"usr1"`, `"Term"`). Names are matched against a fixed
//! table of the standard POSIX interrupts; numbers are taken as-is.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::RendezvousError;

/// A platform signal number
///
/// Values come from `libc`, so they match what the kernel delivers on the
/// current target (`SIGUSR1` is 10 on Linux but 30 on macOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(i32);

impl Signal
{
    /// Hangup
    pub const SIGHUP: Signal = Signal(libc::SIGHUP);
    /// Interrupt from keyboard
    pub const SIGINT: Signal = Signal(libc::SIGINT);
    /// Quit from keyboard
    pub const SIGQUIT: Signal = Signal(libc::SIGQUIT);
    /// Illegal instruction
    pub const SIGILL: Signal = Signal(libc::SIGILL);
    /// Trace/breakpoint trap
    pub const SIGTRAP: Signal = Signal(libc::SIGTRAP);
    /// Abort (also known as `SIGIOT`)
    pub const SIGABRT: Signal = Signal(libc::SIGABRT);
    /// Bus error
    pub const SIGBUS: Signal = Signal(libc::SIGBUS);
    /// Floating-point exception
    pub const SIGFPE: Signal = Signal(libc::SIGFPE);
    /// Kill (cannot be caught)
    pub const SIGKILL: Signal = Signal(libc::SIGKILL);
    /// User-defined signal 1
    pub const SIGUSR1: Signal = Signal(libc::SIGUSR1);
    /// Segmentation fault
    pub const SIGSEGV: Signal = Signal(libc::SIGSEGV);
    /// User-defined signal 2
    pub const SIGUSR2: Signal = Signal(libc::SIGUSR2);
    /// Broken pipe
    pub const SIGPIPE: Signal = Signal(libc::SIGPIPE);
    /// Timer expiry
    pub const SIGALRM: Signal = Signal(libc::SIGALRM);
    /// Termination request
    pub const SIGTERM: Signal = Signal(libc::SIGTERM);

    /// The interrupt used when none, or an unrecognised one, is configured.
    pub const DEFAULT: Signal = Signal::SIGUSR1;

    /// Wrap a raw signal number.
    #[must_use]
    pub const fn from_raw(signo: i32) -> Self
    {
        Signal(signo)
    }

    /// The raw platform signal number.
    #[must_use]
    pub const fn raw(self) -> i32
    {
        self.0
    }

    /// Canonical `SIG*` name, if this is one of the tabled signals.
    #[must_use]
    pub fn name(self) -> Option<&'static str>
    {
        NAMES.iter().find(|(_, sig)| *sig == self).map(|(name, _)| *name)
    }
}

/// Name table. Aliases come after the canonical name so `name()` finds the
/// canonical one first.
const NAMES: &[(&str, Signal)] = &[
    ("SIGHUP", Signal::SIGHUP),
    ("SIGINT", Signal::SIGINT),
    ("SIGQUIT", Signal::SIGQUIT),
    ("SIGILL", Signal::SIGILL),
    ("SIGTRAP", Signal::SIGTRAP),
    ("SIGABRT", Signal::SIGABRT),
    ("SIGIOT", Signal::SIGABRT),
    ("SIGBUS", Signal::SIGBUS),
    ("SIGFPE", Signal::SIGFPE),
    ("SIGKILL", Signal::SIGKILL),
    ("SIGUSR1", Signal::SIGUSR1),
    ("SIGSEGV", Signal::SIGSEGV),
    ("SIGUSR2", Signal::SIGUSR2),
    ("SIGPIPE", Signal::SIGPIPE),
    ("SIGALRM", Signal::SIGALRM),
    ("SIGTERM", Signal::SIGTERM),
];

impl fmt::Display for Signal
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "signal {}", self.0),
        }
    }
}

impl From<Signal> for i32
{
    fn from(signal: Signal) -> Self
    {
        signal.0
    }
}

impl FromStr for Signal
{
    type Err = RendezvousError;

    /// Strict parse: a positive integer, or a tabled name. Surrounding
    /// whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let trimmed = s.trim();

        if let Ok(number) = trimmed.parse::<i32>() {
            if number > 0 {
                return Ok(Signal(number));
            }
        }

        let upper = trimmed.to_ascii_uppercase();
        let canonical = if upper.starts_with("SIG") { upper } else { format!("SIG{upper}") };

        NAMES
            .iter()
            .find(|(name, _)| *name == canonical)
            .map(|(_, sig)| *sig)
            .ok_or_else(|| RendezvousError::Configuration {
                key: "signal".to_string(),
                reason: format!("unknown signal {s:?}"),
            })
    }
}

/// Lenient parse used for configuration.
///
/// Unrecognised values fall back to [`Signal::DEFAULT`] with a single warning.
///
/// ```rust
/// use rendezvous_core::signal::{parse_signal, Signal};
///
/// assert_eq!(parse_signal("term"), Signal::SIGTERM);
/// assert_eq!(parse_signal("15"), Signal::from_raw(15));
/// assert_eq!(parse_signal("bogus"), Signal::DEFAULT);
/// ```
#[must_use]
pub fn parse_signal(spec: &str) -> Signal
{
    match spec.parse::<Signal>() {
        Ok(signal) => signal,
        Err(e) => {
            warn!(spec, error = %e, fallback = %Signal::DEFAULT, "Unknown signal, using default");
            Signal::DEFAULT
        }
    }
}
