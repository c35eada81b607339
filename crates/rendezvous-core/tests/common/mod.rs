//! Shared fakes for integration tests

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rendezvous_core::bus::{BusClient, BusConnector, PublishOutcome};
use rendezvous_core::config::{AttachConfig, BusEndpoint, BusSettings};
use rendezvous_core::{RendezvousError, RendezvousResult};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub const CHANNEL: &str = "debug/discovery";

/// In-memory bus session
pub struct FakeBus
{
    reachable: bool,
    outcome: PublishOutcome,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub published: Mutex<Vec<(String, String)>>,
}

impl FakeBus
{
    pub fn published(&self) -> Vec<(String, String)>
    {
        self.published.lock().unwrap().clone()
    }

    /// Drop the session as if the broker went away.
    pub fn sever(&self)
    {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl BusClient for FakeBus
{
    fn connect(&self, _timeout: Duration) -> RendezvousResult<()>
    {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(RendezvousError::Connection("broker.test:1883: connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &str, _timeout: Duration) -> PublishOutcome
    {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.to_string()));
        self.outcome.clone()
    }

    fn is_connected(&self) -> bool
    {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self, _grace: Duration) -> RendezvousResult<()>
    {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakeBus`] sessions
pub struct FakeConnector
{
    reachable: bool,
    outcome: PublishOutcome,
    pub client_ids: Mutex<Vec<String>>,
    pub buses: Mutex<Vec<Arc<FakeBus>>>,
}

impl FakeConnector
{
    pub fn reachable() -> Arc<Self>
    {
        Self::with_outcome(true, PublishOutcome::Acknowledged)
    }

    pub fn unreachable() -> Arc<Self>
    {
        Self::with_outcome(false, PublishOutcome::Acknowledged)
    }

    pub fn with_outcome(reachable: bool, outcome: PublishOutcome) -> Arc<Self>
    {
        Arc::new(Self {
            reachable,
            outcome,
            client_ids: Mutex::new(Vec::new()),
            buses: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> usize
    {
        self.buses.lock().unwrap().len()
    }

    pub fn bus(&self, index: usize) -> Arc<FakeBus>
    {
        Arc::clone(&self.buses.lock().unwrap()[index])
    }
}

impl BusConnector for FakeConnector
{
    fn open(&self, _settings: &BusSettings, client_id: &str) -> RendezvousResult<Arc<dyn BusClient>>
    {
        let bus = Arc::new(FakeBus {
            reachable: self.reachable,
            outcome: self.outcome.clone(),
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
        });
        self.client_ids.lock().unwrap().push(client_id.to_string());
        self.buses.lock().unwrap().push(Arc::clone(&bus));
        Ok(bus)
    }
}

pub fn bus_settings() -> BusSettings
{
    BusSettings {
        endpoint: BusEndpoint {
            host: "broker.test".to_string(),
            port: 1883,
        },
        channel: CHANNEL.to_string(),
        credentials: None,
    }
}

/// Discovery on, waiting on, bus set, fixed address.
pub fn full_config() -> AttachConfig
{
    AttachConfig {
        ip: Some(Ipv4Addr::new(10, 0, 0, 5)),
        bus: Some(bus_settings()),
        ..AttachConfig::default()
    }
}

struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>)
    {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` with a subscriber that counts warnings emitted on this thread.
pub fn count_warnings<R>(f: impl FnOnce() -> R) -> (R, usize)
{
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, count.load(Ordering::SeqCst))
}
