//! # Debugger Hooks
//!
//! The execution trap the attach waiter fires once its interrupt arrives.
//!
//! [`BreakpointTrap`] raises `SIGTRAP` on the calling thread. Under a tracer
//! (gdb, lldb, a ptrace-based tool) that stops the whole process at this
//! point until the tracer continues it. Without a tracer the default
//! `SIGTRAP` disposition applies and the process terminates; that is the
//! requested behaviour, since the waiter is only tripped by someone asking
//! for a halt.
//!
//! [`RecordingTrap`] only counts calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{error, info, warn};

/// Pluggable execution trap.
pub trait DebugTrap: Send + Sync
{
    /// Halt (or pretend to halt) at this point. Returns once resumed.
    fn trap(&self);
}

/// Real breakpoint trap backed by `raise(SIGTRAP)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakpointTrap;

impl DebugTrap for BreakpointTrap
{
    fn trap(&self)
    {
        if tracer_attached() == Some(false) {
            warn!("No tracer attached; SIGTRAP will terminate the process");
        }
        info!("Raising SIGTRAP");

        // SAFETY: raise() has no memory-safety preconditions.
        let rc = unsafe { libc::raise(libc::SIGTRAP) };
        if rc != 0 {
            error!(error = %std::io::Error::last_os_error(), "raise(SIGTRAP) failed");
        }
    }
}

/// Test double that records how often it was fired.
#[derive(Debug, Default)]
pub struct RecordingTrap
{
    hits: AtomicUsize,
}

impl RecordingTrap
{
    /// New trap with zero hits.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Number of times [`DebugTrap::trap`] was called.
    #[must_use]
    pub fn hits(&self) -> usize
    {
        self.hits.load(Ordering::SeqCst)
    }
}

impl DebugTrap for RecordingTrap
{
    fn trap(&self)
    {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Whether a tracer is attached to this process.
///
/// Reads `TracerPid` from `/proc/self/status`; `None` where that is not
/// available.
#[must_use]
pub fn tracer_attached() -> Option<bool>
{
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|pid| pid.trim().parse::<u32>().ok())
        .map(|pid| pid != 0)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_recording_trap_counts()
    {
        let trap = RecordingTrap::new();
        assert_eq!(trap.hits(), 0);
        trap.trap();
        trap.trap();
        assert_eq!(trap.hits(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_tracer_status_is_readable_on_linux()
    {
        assert!(tracer_attached().is_some());
    }
}
