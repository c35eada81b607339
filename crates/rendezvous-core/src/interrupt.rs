//! # Interrupt Sources
//!
//! Where the attach waiter and the shutdown coordinator get their interrupts
//! from.
//!
//! Both background tasks block on an [`InterruptListener`], a plain channel
//! receiver, so they park without using CPU. What feeds the channel is
//! pluggable:
//!
//! - [`OsInterrupts`]: real process signals, registered through
//!   `tokio::signal::unix` on a background runtime
//! - [`ManualInterrupts`]: synthetic delivery, for tests and for hosts that
//!   already own signal handling and want to forward selected signals

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{RendezvousError, RendezvousResult};
use crate::signal::Signal;

/// Something that can deliver interrupts to a listener.
pub trait InterruptSource: Send + Sync
{
    /// Start listening for the given interrupts.
    ///
    /// Registration happens before this returns, so an interrupt delivered
    /// right after is not lost.
    ///
    /// ## Errors
    ///
    /// - `Configuration`: `signals` is empty
    /// - `Signal`: the platform refuses to deliver one of the interrupts
    fn listen(&self, signals: &[Signal]) -> RendezvousResult<InterruptListener>;
}

/// Where a listener's interrupts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin
{
    Synthetic,
    Process,
}

/// Receiving end of an interrupt subscription.
#[derive(Debug)]
pub struct InterruptListener
{
    signals: Vec<Signal>,
    rx: Receiver<Signal>,
    origin: Origin,
}

impl InterruptListener
{
    /// Wrap a channel that delivers the given interrupts.
    ///
    /// For implementors of [`InterruptSource`].
    #[must_use]
    pub fn new(signals: Vec<Signal>, rx: Receiver<Signal>) -> Self
    {
        Self {
            signals,
            rx,
            origin: Origin::Synthetic,
        }
    }

    fn from_process(signals: Vec<Signal>, rx: Receiver<Signal>) -> Self
    {
        Self {
            origin: Origin::Process,
            ..Self::new(signals, rx)
        }
    }

    /// The interrupts this listener was registered for.
    #[must_use]
    pub fn signals(&self) -> &[Signal]
    {
        &self.signals
    }

    /// Park until an interrupt arrives.
    ///
    /// Returns `None` once the source can no longer deliver anything.
    #[must_use]
    pub fn recv(&self) -> Option<Signal>
    {
        self.rx.recv().ok()
    }

    /// Park until an interrupt arrives or `timeout` elapses.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Signal>
    {
        match self.rx.recv_timeout(timeout) {
            Ok(signal) => Some(signal),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Let `signal` have the effect it would have had without any handler.
    ///
    /// For listeners fed by real process signals the disposition is reset to
    /// `SIG_DFL` and the signal is raised again, so a termination signal ends
    /// the process here. Listeners built with [`InterruptListener::new`] are
    /// synthetic and this does nothing.
    ///
    /// ## Errors
    ///
    /// Returns `Signal` if the disposition cannot be reset or the signal
    /// cannot be raised.
    pub fn restore_default(&self, signal: Signal) -> RendezvousResult<()>
    {
        match self.origin {
            Origin::Synthetic => Ok(()),
            Origin::Process => reraise_with_default(signal),
        }
    }
}

fn reraise_with_default(signal: Signal) -> RendezvousResult<()>
{
    let failed = || RendezvousError::Signal {
        signal,
        reason: std::io::Error::last_os_error().to_string(),
    };

    // SAFETY: SIG_DFL installs no handler code, and raise has no memory
    // preconditions.
    unsafe {
        if libc::signal(signal.raw(), libc::SIG_DFL) == libc::SIG_ERR {
            return Err(failed());
        }
        if libc::raise(signal.raw()) != 0 {
            return Err(failed());
        }
    }
    Ok(())
}

fn require_signals(signals: &[Signal]) -> RendezvousResult<()>
{
    if signals.is_empty() {
        return Err(RendezvousError::Configuration {
            key: "signal".to_string(),
            reason: "no interrupts requested".to_string(),
        });
    }
    Ok(())
}

struct Subscription
{
    signals: Vec<Signal>,
    tx: Sender<Signal>,
}

/// Synthetic interrupt source
///
/// Clones share the same subscriber list, so a test can keep one handle for
/// delivery while another is owned by the orchestrator.
///
/// ```rust
/// use rendezvous_core::interrupt::{InterruptSource, ManualInterrupts};
/// use rendezvous_core::signal::Signal;
///
/// let source = ManualInterrupts::new();
/// let listener = source.listen(&[Signal::SIGUSR1])?;
///
/// assert_eq!(source.deliver(Signal::SIGHUP), 0);
/// assert_eq!(source.deliver(Signal::SIGUSR1), 1);
/// assert_eq!(listener.recv(), Some(Signal::SIGUSR1));
/// # Ok::<(), rendezvous_core::RendezvousError>(())
/// ```
#[derive(Clone, Default)]
pub struct ManualInterrupts
{
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl ManualInterrupts
{
    /// Create a source with no listeners.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Deliver an interrupt to every live listener registered for it.
    ///
    /// Returns how many listeners received it. Dropped listeners are pruned.
    pub fn deliver(&self, signal: Signal) -> usize
    {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;
        subscriptions.retain(|sub| {
            if !sub.signals.contains(&signal) {
                return true;
            }
            let alive = sub.tx.send(signal).is_ok();
            if alive {
                delivered += 1;
            }
            alive
        });
        delivered
    }

    /// Number of subscriptions registered so far (including ones whose
    /// listener has been dropped but not yet pruned).
    #[must_use]
    pub fn subscription_count(&self) -> usize
    {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl InterruptSource for ManualInterrupts
{
    fn listen(&self, signals: &[Signal]) -> RendezvousResult<InterruptListener>
    {
        require_signals(signals)?;
        let (tx, rx) = mpsc::channel();
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                signals: signals.to_vec(),
                tx,
            });
        Ok(InterruptListener::new(signals.to_vec(), rx))
    }
}

/// Real process signals
///
/// Each requested signal gets a `tokio::signal::unix` stream driven on the
/// given runtime, forwarded into the listener's channel. Registering a signal
/// replaces its default disposition (for example, `SIGINT` no longer
/// terminates the process by itself) until a listener hands it back with
/// [`InterruptListener::restore_default`].
#[derive(Debug, Clone)]
pub struct OsInterrupts
{
    handle: tokio::runtime::Handle,
}

impl OsInterrupts
{
    /// Use `handle` to register and drive signal streams.
    ///
    /// The runtime must have its I/O driver enabled.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self
    {
        Self { handle }
    }
}

impl InterruptSource for OsInterrupts
{
    fn listen(&self, signals: &[Signal]) -> RendezvousResult<InterruptListener>
    {
        use tokio::signal::unix::{signal, SignalKind};

        require_signals(signals)?;

        // Register everything first so a refusal leaves nothing half-installed.
        let _runtime = self.handle.enter();
        let mut streams = Vec::with_capacity(signals.len());
        for &sig in signals {
            let stream = signal(SignalKind::from_raw(sig.raw())).map_err(|e| RendezvousError::Signal {
                signal: sig,
                reason: e.to_string(),
            })?;
            streams.push((sig, stream));
        }

        let (tx, rx) = mpsc::channel();
        for (sig, mut stream) in streams {
            let tx = tx.clone();
            self.handle.spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(sig).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(InterruptListener::from_process(signals.to_vec(), rx))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_manual_delivery_is_filtered()
    {
        let source = ManualInterrupts::new();
        let usr1 = source.listen(&[Signal::SIGUSR1]).unwrap();
        let term = source.listen(&[Signal::SIGINT, Signal::SIGTERM]).unwrap();

        assert_eq!(source.deliver(Signal::SIGTERM), 1);
        assert_eq!(term.recv_timeout(Duration::from_millis(100)), Some(Signal::SIGTERM));
        assert_eq!(usr1.recv_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn test_manual_prunes_dropped_listeners()
    {
        let source = ManualInterrupts::new();
        drop(source.listen(&[Signal::SIGHUP]).unwrap());
        assert_eq!(source.subscription_count(), 1);
        assert_eq!(source.deliver(Signal::SIGHUP), 0);
        assert_eq!(source.subscription_count(), 0);
    }

    #[test]
    fn test_synthetic_restore_has_no_effect()
    {
        let source = ManualInterrupts::new();
        let listener = source.listen(&[Signal::SIGTERM]).unwrap();

        assert_eq!(source.deliver(Signal::SIGTERM), 1);
        assert_eq!(listener.recv(), Some(Signal::SIGTERM));
        listener.restore_default(Signal::SIGTERM).unwrap();
        // Still running, and the subscription still works.
        assert_eq!(source.deliver(Signal::SIGTERM), 1);
    }

    #[test]
    fn test_empty_signal_list_is_rejected()
    {
        let source = ManualInterrupts::new();
        assert!(matches!(source.listen(&[]), Err(RendezvousError::Configuration { .. })));
    }

    #[test]
    fn test_os_refuses_uncatchable_signal()
    {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let source = OsInterrupts::new(runtime.handle().clone());

        match source.listen(&[Signal::SIGKILL]) {
            Err(RendezvousError::Signal { signal, .. }) => assert_eq!(signal, Signal::SIGKILL),
            other => panic!("expected Signal error, got {other:?}"),
        }
    }
}
