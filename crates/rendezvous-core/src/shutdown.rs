//! # Shutdown Coordinator
//!
//! Closes the bus session cleanly when the host is asked to terminate.
//!
//! Armed only after a successful bus connection. On `SIGINT` or `SIGTERM` it
//! disconnects (if still connected) within a short grace period, then hands
//! the signal back to its default disposition and raises it again. A host
//! that never handled these signals is terminated exactly as it would have
//! been without the coordinator, just after the bus is closed.
//!
//! Interrupts from a synthetic source only produce the report.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bus::BusClient;
use crate::error::{RendezvousError, RendezvousResult};
use crate::interrupt::InterruptSource;
use crate::signal::Signal;
use crate::state::StateCell;

/// Interrupts the coordinator reacts to.
pub const TERMINATION_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// How the coordinator finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReport
{
    /// The session was closed after the interrupt
    Disconnected(Signal),
    /// The session was already gone when the interrupt arrived
    AlreadyClosed(Signal),
    /// The close could not be confirmed
    Failed(Signal, String),
    /// The interrupt source stopped before any termination interrupt
    SourceClosed,
}

/// Disconnects a bus session on termination
pub struct ShutdownCoordinator
{
    bus: Arc<dyn BusClient>,
    grace: Duration,
}

impl ShutdownCoordinator
{
    /// Coordinator for `bus`, allowing `grace` for the disconnect.
    #[must_use]
    pub fn new(bus: Arc<dyn BusClient>, grace: Duration) -> Self
    {
        Self { bus, grace }
    }

    /// Register for termination interrupts and start the background thread.
    ///
    /// ## Errors
    ///
    /// - `Signal`: the interrupts could not be registered
    /// - `Runtime`: the thread could not be spawned
    pub fn arm(self, interrupts: &dyn InterruptSource) -> RendezvousResult<ShutdownHandle>
    {
        let listener = interrupts.listen(&TERMINATION_SIGNALS)?;
        let report = Arc::new(StateCell::new(None));
        let slot = Arc::clone(&report);

        let thread = thread::Builder::new()
            .name("rendezvous-shutdown".to_string())
            .spawn(move || {
                let Some(signal) = listener.recv() else {
                    debug!("Interrupt source closed; shutdown coordinator stopping");
                    slot.set(Some(ShutdownReport::SourceClosed));
                    return;
                };
                slot.set(Some(self.close(signal)));

                debug!(%signal, "Restoring default signal disposition");
                if let Err(e) = listener.restore_default(signal) {
                    error!(error = %e, "Failed to pass termination signal on");
                }
            })
            .map_err(|e| RendezvousError::Runtime(format!("failed to spawn shutdown coordinator: {e}")))?;

        debug!("Shutdown coordinator armed");
        Ok(ShutdownHandle {
            report,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn close(&self, signal: Signal) -> ShutdownReport
    {
        info!(%signal, "Shutdown signal received");
        if !self.bus.is_connected() {
            debug!("Bus session already closed");
            return ShutdownReport::AlreadyClosed(signal);
        }
        match self.bus.disconnect(self.grace) {
            Ok(()) => {
                info!("Disconnected from bus");
                ShutdownReport::Disconnected(signal)
            }
            Err(e) => {
                error!(error = %e, "Bus disconnect failed");
                ShutdownReport::Failed(signal, e.to_string())
            }
        }
    }
}

/// Handle to an armed [`ShutdownCoordinator`]
#[derive(Debug)]
pub struct ShutdownHandle
{
    report: Arc<StateCell<Option<ShutdownReport>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ShutdownHandle
{
    /// The report, once the coordinator has finished.
    #[must_use]
    pub fn report(&self) -> Option<ShutdownReport>
    {
        self.report.get()
    }

    /// Block until the coordinator finishes or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<ShutdownReport>
    {
        let (report, finished) = self.report.wait_until(timeout, Option::is_some);
        if finished {
            if let Some(thread) = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
                if thread.join().is_err() {
                    error!("Shutdown coordinator thread panicked");
                }
            }
        }
        report
    }
}
