//! Common module for library exports

pub use crate::announcer::{Announcement, Announcer, SkipReason};
pub use crate::bus::{BusClient, BusConnector, PublishOutcome};
pub use crate::config::AttachConfig;
pub use crate::error::{RendezvousError, RendezvousResult};
pub use crate::identity::ProcessIdentity;
pub use crate::interrupt::{InterruptSource, ManualInterrupts, OsInterrupts};
pub use crate::orchestrator::{AttachSession, Orchestrator};
pub use crate::signal::Signal;
pub use crate::trap::{BreakpointTrap, DebugTrap, RecordingTrap};
pub use crate::waiter::AttachState;
