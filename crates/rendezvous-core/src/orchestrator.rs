//! # Orchestrator
//!
//! Wires identity, discovery, shutdown and the attach waiter together, once.
//!
//! | auto discovery | address | bus | wait for attach | action |
//! |---|---|---|---|---|
//! | on | known | set | on | announce; on connect, arm shutdown; arm waiter |
//! | on | known | set | off | announce; on connect, arm shutdown |
//! | any | any | missing | on | skip announce; arm waiter |
//! | off | any | any | off | log only |
//!
//! The waiter is always armed after the announcement has concluded, whether
//! it succeeded or not. The result of a run is an [`AttachSession`] which
//! later calls hand back unchanged.

use std::sync::Arc;
use std::thread;

use once_cell::sync::{Lazy, OnceCell};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error, info};

use crate::announcer::{Announcement, Announcer};
use crate::bus::{BusClient, BusConnector, MqttConnector, PublishOutcome};
use crate::config::AttachConfig;
use crate::error::{RendezvousError, RendezvousResult};
use crate::identity::ProcessIdentity;
use crate::interrupt::{InterruptSource, OsInterrupts};
use crate::shutdown::{ShutdownCoordinator, ShutdownHandle};
use crate::trap::{BreakpointTrap, DebugTrap};
use crate::waiter::{AttachState, AttachWaiter, WaiterHandle};

/// Everything one orchestration run produced
#[derive(Debug)]
pub struct AttachSession
{
    identity: ProcessIdentity,
    announcement: RendezvousResult<Announcement>,
    shutdown: Option<ShutdownHandle>,
    waiter: Option<WaiterHandle>,
}

impl AttachSession
{
    /// The resolved process identity.
    #[must_use]
    pub fn identity(&self) -> &ProcessIdentity
    {
        &self.identity
    }

    /// What the announcer did.
    pub fn announcement(&self) -> Result<&Announcement, &RendezvousError>
    {
        self.announcement.as_ref()
    }

    /// How the discovery publish ended, if one was attempted.
    #[must_use]
    pub fn publish_outcome(&self) -> Option<&PublishOutcome>
    {
        match &self.announcement {
            Ok(Announcement::Published(published)) => Some(&published.outcome),
            _ => None,
        }
    }

    /// The bus session, if a connection was made.
    #[must_use]
    pub fn bus(&self) -> Option<&Arc<dyn BusClient>>
    {
        self.announcement.as_ref().ok().and_then(Announcement::bus)
    }

    /// The shutdown coordinator, if armed.
    #[must_use]
    pub fn shutdown(&self) -> Option<&ShutdownHandle>
    {
        self.shutdown.as_ref()
    }

    /// The attach waiter, if armed.
    #[must_use]
    pub fn waiter(&self) -> Option<&WaiterHandle>
    {
        self.waiter.as_ref()
    }

    /// Waiter state, `Idle` when no waiter was armed.
    #[must_use]
    pub fn waiter_state(&self) -> AttachState
    {
        self.waiter.as_ref().map_or(AttachState::Idle, WaiterHandle::state)
    }
}

/// Runs the attach rendezvous for one process
///
/// [`Orchestrator::new`] builds the production wiring: MQTT over a private
/// single-worker runtime, real signals and a `SIGTRAP` breakpoint.
/// [`Orchestrator::with_parts`] accepts any implementation of each seam.
pub struct Orchestrator
{
    config: AttachConfig,
    announcer: Announcer,
    interrupts: Arc<dyn InterruptSource>,
    waiter: AttachWaiter,
    session: OnceCell<AttachSession>,
    // Declared last so the session's bus is dropped before the runtime driving it.
    runtime: Option<Runtime>,
}

impl Orchestrator
{
    /// Production wiring for `config`.
    ///
    /// ## Errors
    ///
    /// Returns `Runtime` if the background runtime cannot be started.
    pub fn new(config: AttachConfig) -> RendezvousResult<Self>
    {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rendezvous-rt")
            .enable_all()
            .build()
            .map_err(|e| RendezvousError::Runtime(format!("failed to start background runtime: {e}")))?;
        let handle = runtime.handle().clone();

        let mut orchestrator = Self::with_parts(
            config,
            Arc::new(MqttConnector::new(handle.clone())),
            Arc::new(OsInterrupts::new(handle)),
            Arc::new(BreakpointTrap),
        );
        orchestrator.runtime = Some(runtime);
        Ok(orchestrator)
    }

    /// Wiring with caller-supplied bus, interrupts and trap.
    #[must_use]
    pub fn with_parts(
        config: AttachConfig,
        connector: Arc<dyn BusConnector>,
        interrupts: Arc<dyn InterruptSource>,
        trap: Arc<dyn DebugTrap>,
    ) -> Self
    {
        let waiter = AttachWaiter::new(config.signal, trap);
        Self {
            config,
            announcer: Announcer::new(connector),
            interrupts,
            waiter,
            session: OnceCell::new(),
            runtime: None,
        }
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub fn config(&self) -> &AttachConfig
    {
        &self.config
    }

    /// The interrupt source shared with the background tasks.
    ///
    /// Hosts that want to react to `SIGINT`/`SIGTERM` themselves should listen
    /// here. Once the shutdown coordinator has closed the bus it restores the
    /// default disposition and raises the signal again.
    #[must_use]
    pub fn interrupts(&self) -> Arc<dyn InterruptSource>
    {
        Arc::clone(&self.interrupts)
    }

    /// The session, if [`Orchestrator::init`] has run.
    #[must_use]
    pub fn session(&self) -> Option<&AttachSession>
    {
        self.session.get()
    }

    /// Run the rendezvous, or return the session from the earlier run.
    ///
    /// Blocks for at most the connect timeout plus the publish timeout.
    /// Concurrent callers wait for the first run and share its session.
    pub fn init(&self) -> &AttachSession
    {
        if let Some(session) = self.session.get() {
            debug!("Attach rendezvous already initialized; reusing session");
            return session;
        }
        self.session.get_or_init(|| self.run())
    }

    fn run(&self) -> AttachSession
    {
        info!(config = ?self.config, "Initializing debugger attach rendezvous");

        let identity = ProcessIdentity::resolve(&self.config);
        let announcement = self.announce(&identity);

        let shutdown = match &announcement {
            Ok(Announcement::Published(published)) => {
                let coordinator =
                    ShutdownCoordinator::new(Arc::clone(&published.bus), self.config.timeouts.disconnect_grace);
                match coordinator.arm(self.interrupts.as_ref()) {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        error!(error = %e, "Failed to arm shutdown coordinator");
                        None
                    }
                }
            }
            Ok(Announcement::Skipped(reason)) => {
                info!(?reason, "Discovery announcement skipped");
                None
            }
            Err(e) => {
                error!(error = %e, "Discovery announcement failed");
                None
            }
        };

        let waiter = if self.config.wait_for_attach {
            match self.waiter.arm(self.interrupts.as_ref()) {
                Ok(handle) => Some(handle),
                // Registration failures are reported by the waiter itself.
                Err(RendezvousError::Signal { .. }) => None,
                Err(e) => {
                    error!(error = %e, "Failed to arm attach waiter");
                    None
                }
            }
        } else {
            info!("Not waiting for debugger attach");
            None
        };

        info!(pid = identity.pid, "Attach rendezvous initialized");
        AttachSession {
            identity,
            announcement,
            shutdown,
            waiter,
        }
    }

    /// Connect and publish on a helper thread. The MQTT client blocks on its
    /// own runtime, which is not allowed from a thread already inside one.
    fn announce(&self, identity: &ProcessIdentity) -> RendezvousResult<Announcement>
    {
        thread::scope(|scope| -> RendezvousResult<Announcement> {
            let worker = thread::Builder::new()
                .name("rendezvous-announce".to_string())
                .spawn_scoped(scope, || self.announcer.announce(identity, &self.config))?;
            worker
                .join()
                .unwrap_or_else(|_| Err(RendezvousError::Runtime("announcer thread panicked".to_string())))
        })
    }
}

static GLOBAL: Lazy<Option<Orchestrator>> = Lazy::new(|| match Orchestrator::new(AttachConfig::from_env()) {
    Ok(orchestrator) => Some(orchestrator),
    Err(e) => {
        error!(error = %e, "Debugger attach rendezvous unavailable");
        None
    }
});

/// The process-wide orchestrator, configured from the environment.
///
/// `None` if its runtime could not be started.
#[must_use]
pub fn global() -> Option<&'static Orchestrator>
{
    GLOBAL.as_ref()
}

/// Run the process-wide rendezvous.
///
/// Safe to call any number of times; only the first call does any work.
pub fn init() -> Option<&'static AttachSession>
{
    global().map(Orchestrator::init)
}
