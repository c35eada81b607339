//! # rendezvous-core
//!
//! Debugger attach rendezvous for long-running processes.
//!
//! Linked into a host process, this crate:
//! - Resolves who the process is (address, PID, executable fingerprint)
//! - Announces it once on an MQTT channel so a debugger front-end can find it
//! - Parks a background thread until a chosen signal arrives, then raises a
//!   breakpoint so an attached debugger stops the process right there
//! - Closes the bus session when the process is asked to terminate
//!
//! Nothing here can stop the host from starting. Every failure is logged and
//! the host carries on.
//!
//! ```no_run
//! // Reads RENDEZVOUS_* from the environment; only the first call does work.
//! if let Some(session) = rendezvous_core::init() {
//!     println!("waiter is {}", session.waiter_state());
//! }
//! ```
//!
//! ## Why unsafe code is needed
//!
//! The breakpoint (`raise(SIGTRAP)`) and handing a termination signal back
//! to its default disposition (`signal(SIG_DFL)` then `raise`) are libc
//! calls. Both are wrapped in safe functions.

#![allow(unsafe_code)] // Required for signal and raise

pub mod announcer;
pub mod bus;
pub mod config;
pub mod error;
pub mod identity;
pub mod interrupt;
pub mod orchestrator;
pub mod prelude;
pub mod shutdown;
pub mod signal;
mod state;
pub mod trap;
pub mod waiter;

pub use announcer::{Announcement, Announcer};
pub use config::AttachConfig;
// Re-export commonly used types
pub use error::{RendezvousError, RendezvousResult};
pub use identity::ProcessIdentity;
pub use orchestrator::{global, init, AttachSession, Orchestrator};
pub use rendezvous_protocol::DiscoveryMessage;
pub use signal::{parse_signal, Signal};
pub use waiter::{AttachState, AttachWaiter};
