//! # Attach Waiter
//!
//! Parks a background thread until the configured interrupt arrives, then
//! fires the debug trap once.
//!
//! ```text
//!   Idle ──arm──▶ Armed ──interrupt──▶ Tripped ──trap returns──▶ Resumed
//!                   │
//!                   └──source closed──▶ Closed
//! ```
//!
//! The waiter is single-shot. Once it has resumed, later deliveries of the
//! same interrupt are swallowed by the still-registered handler and nothing
//! happens.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::{RendezvousError, RendezvousResult};
use crate::interrupt::{InterruptListener, InterruptSource};
use crate::signal::Signal;
use crate::state::StateCell;
use crate::trap::DebugTrap;

/// Lifecycle of an [`AttachWaiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachState
{
    /// Not armed yet
    Idle,
    /// Waiting for the interrupt
    Armed,
    /// Interrupt received; the trap is firing
    Tripped,
    /// Trap returned; execution continues
    Resumed,
    /// The interrupt source stopped delivering before the interrupt arrived
    Closed,
}

impl fmt::Display for AttachState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let s = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Tripped => "tripped",
            Self::Resumed => "resumed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Waits for a single interrupt and halts execution for a debugger
pub struct AttachWaiter
{
    signal: Signal,
    trap: Arc<dyn DebugTrap>,
    state: Arc<StateCell<AttachState>>,
}

impl fmt::Debug for AttachWaiter
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("AttachWaiter")
            .field("signal", &self.signal)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AttachWaiter
{
    /// Waiter for `signal` that fires `trap`.
    #[must_use]
    pub fn new(signal: Signal, trap: Arc<dyn DebugTrap>) -> Self
    {
        Self {
            signal,
            trap,
            state: Arc::new(StateCell::new(AttachState::Idle)),
        }
    }

    /// The interrupt this waiter listens for.
    #[must_use]
    pub fn signal(&self) -> Signal
    {
        self.signal
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AttachState
    {
        self.state.get()
    }

    /// Register for the interrupt and start the background thread.
    ///
    /// Registration completes before this returns. The host's main flow is
    /// never blocked.
    ///
    /// ## Errors
    ///
    /// - `AlreadyArmed`: this waiter was armed before
    /// - `Signal`: the interrupt cannot be observed; the waiter goes back to `Idle`
    /// - `Runtime`: the thread could not be spawned
    pub fn arm(&self, interrupts: &dyn InterruptSource) -> RendezvousResult<WaiterHandle>
    {
        if !self.state.set_if(|s| *s == AttachState::Idle, AttachState::Armed) {
            return Err(RendezvousError::AlreadyArmed(self.signal));
        }

        let listener = match interrupts.listen(&[self.signal]) {
            Ok(listener) => listener,
            Err(e) => {
                error!(signal = %self.signal, error = %e, "Attach waiter could not register for its interrupt");
                self.state.set(AttachState::Idle);
                return Err(e);
            }
        };

        let signal = self.signal;
        let trap = Arc::clone(&self.trap);
        let state = Arc::clone(&self.state);
        let thread = thread::Builder::new()
            .name("rendezvous-attach".to_string())
            .spawn(move || wait_and_trap(signal, &listener, trap.as_ref(), &state))
            .map_err(|e| {
                self.state.set(AttachState::Idle);
                RendezvousError::Runtime(format!("failed to spawn attach waiter: {e}"))
            })?;

        info!(%signal, pid = std::process::id(), "Waiting for debugger attach signal");

        Ok(WaiterHandle {
            signal,
            state: Arc::clone(&self.state),
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn wait_and_trap(signal: Signal, listener: &InterruptListener, trap: &dyn DebugTrap, state: &StateCell<AttachState>)
{
    loop {
        match listener.recv() {
            Some(received) if received == signal => break,
            Some(other) => debug!(%other, "Ignoring unrelated interrupt"),
            None => {
                debug!(%signal, "Interrupt source closed; attach waiter stopping");
                state.set(AttachState::Closed);
                return;
            }
        }
    }

    state.set(AttachState::Tripped);
    info!(%signal, "Received attach signal, triggering breakpoint");
    trap.trap();
    state.set(AttachState::Resumed);
    info!("Resumed after debugger attach");
}

/// Handle to an armed [`AttachWaiter`]
#[derive(Debug)]
pub struct WaiterHandle
{
    signal: Signal,
    state: Arc<StateCell<AttachState>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WaiterHandle
{
    /// The interrupt being waited for.
    #[must_use]
    pub fn signal(&self) -> Signal
    {
        self.signal
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AttachState
    {
        self.state.get()
    }

    /// Block until the waiter reaches `target` or `timeout` elapses.
    ///
    /// Returns `true` if `target` was reached.
    pub fn wait_for(&self, target: AttachState, timeout: Duration) -> bool
    {
        self.state.wait_until(timeout, |s| *s == target).1
    }

    /// Join the background thread if it has finished.
    ///
    /// Returns `false` while the waiter is still parked.
    pub fn try_join(&self) -> bool
    {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(thread) if !thread.is_finished() => false,
            Some(_) => {
                if let Some(thread) = slot.take() {
                    if thread.join().is_err() {
                        error!("Attach waiter thread panicked");
                    }
                }
                true
            }
            None => true,
        }
    }
}
