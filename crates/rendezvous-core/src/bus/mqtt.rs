//! # MQTT Bus
//!
//! [`BusClient`] over MQTT 3.1.1 using `rumqttc`.
//!
//! A driver task polls the `rumqttc` event loop on the background runtime and
//! forwards the events the blocking API cares about (connection accepted,
//! publish acknowledged, session ended) over a channel. The driver stops on
//! the first connection error, so there is no automatic reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{BusClient, BusConnector, PublishOutcome};
use crate::config::{BusEndpoint, BusSettings};
use crate::error::{RendezvousError, RendezvousResult};

const KEEP_ALIVE: Duration = Duration::from_secs(20);
const REQUEST_CAPACITY: usize = 10;

/// Creates [`MqttBus`] clients driven on a shared runtime.
#[derive(Debug, Clone)]
pub struct MqttConnector
{
    handle: Handle,
}

impl MqttConnector
{
    /// Drive clients on the runtime behind `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self
    {
        Self { handle }
    }
}

impl BusConnector for MqttConnector
{
    fn open(&self, settings: &BusSettings, client_id: &str) -> RendezvousResult<Arc<dyn BusClient>>
    {
        Ok(Arc::new(MqttBus::new(settings, client_id, self.handle.clone())))
    }
}

/// What the driver task reports back
#[derive(Debug)]
enum DriverEvent
{
    Connected,
    PubAck(u16),
    Disconnected,
    Failed(String),
}

/// A single MQTT session
pub struct MqttBus
{
    endpoint: BusEndpoint,
    handle: Handle,
    client: AsyncClient,
    /// Event loop and the driver's sender, until `connect` moves them into the driver
    pending: Mutex<Option<(EventLoop, UnboundedSender<DriverEvent>)>>,
    events: tokio::sync::Mutex<UnboundedReceiver<DriverEvent>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MqttBus
{
    /// Build an unconnected session.
    #[must_use]
    pub fn new(settings: &BusSettings, client_id: &str, handle: Handle) -> Self
    {
        let mut options = MqttOptions::new(client_id, settings.endpoint.host.clone(), settings.endpoint.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let Some(creds) = &settings.credentials {
            options.set_credentials(creds.user.clone(), creds.password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            endpoint: settings.endpoint.clone(),
            handle,
            client,
            pending: Mutex::new(Some((eventloop, tx))),
            events: tokio::sync::Mutex::new(rx),
            driver: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    fn stop_driver(&self)
    {
        if let Some(driver) = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take() {
            driver.abort();
        }
    }
}

async fn drive(mut eventloop: EventLoop, connected: Arc<AtomicBool>, tx: UnboundedSender<DriverEvent>)
{
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                DriverEvent::Connected
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => DriverEvent::PubAck(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                let _ = tx.send(DriverEvent::Disconnected);
                return;
            }
            Ok(other) => {
                trace!(event = ?other, "MQTT event");
                continue;
            }
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                let _ = tx.send(DriverEvent::Failed(e.to_string()));
                return;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}

impl BusClient for MqttBus
{
    fn connect(&self, timeout: Duration) -> RendezvousResult<()>
    {
        let Some((eventloop, tx)) = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Err(RendezvousError::Connection(format!("{}: session already started", self.endpoint)));
        };

        let driver = self.handle.spawn(drive(eventloop, Arc::clone(&self.connected), tx));
        *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);

        let result = self.handle.block_on(async {
            let mut events = self.events.lock().await;
            tokio::time::timeout(timeout, async {
                while let Some(event) = events.recv().await {
                    match event {
                        DriverEvent::Connected => return Ok(()),
                        DriverEvent::Failed(e) => return Err(e),
                        DriverEvent::PubAck(_) | DriverEvent::Disconnected => {}
                    }
                }
                Err("event loop stopped".to_string())
            })
            .await
        });

        match result {
            Ok(Ok(())) => {
                debug!(endpoint = %self.endpoint, "MQTT session established");
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop_driver();
                Err(RendezvousError::Connection(format!("{}: {e}", self.endpoint)))
            }
            Err(_) => {
                self.stop_driver();
                Err(RendezvousError::Connection(format!(
                    "{}: no answer within {timeout:?}",
                    self.endpoint
                )))
            }
        }
    }

    fn publish(&self, channel: &str, payload: &str, timeout: Duration) -> PublishOutcome
    {
        if !self.is_connected() {
            return PublishOutcome::Rejected("not connected".to_string());
        }

        let result = self.handle.block_on(async {
            let mut events = self.events.lock().await;
            tokio::time::timeout(timeout, async {
                self.client
                    .publish(channel, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
                    .await
                    .map_err(|e| e.to_string())?;

                // One publish per session, so any PubAck is ours.
                while let Some(event) = events.recv().await {
                    match event {
                        DriverEvent::PubAck(pkid) => {
                            trace!(pkid, "PubAck");
                            return Ok(());
                        }
                        DriverEvent::Failed(e) => return Err(e),
                        DriverEvent::Disconnected => return Err("session closed before acknowledgement".to_string()),
                        DriverEvent::Connected => {}
                    }
                }
                Err("event loop stopped".to_string())
            })
            .await
        });

        match result {
            Ok(Ok(())) => PublishOutcome::Acknowledged,
            Ok(Err(e)) => PublishOutcome::Rejected(e),
            Err(_) => PublishOutcome::TimedOut,
        }
    }

    fn is_connected(&self) -> bool
    {
        self.connected.load(Ordering::SeqCst)
    }

    fn disconnect(&self, grace: Duration) -> RendezvousResult<()>
    {
        if self.closed.swap(true, Ordering::SeqCst) || !self.is_connected() {
            self.stop_driver();
            return Ok(());
        }

        let result = self.handle.block_on(async {
            tokio::time::timeout(grace, async {
                self.client.disconnect().await.map_err(|e| e.to_string())?;
                let mut events = self.events.lock().await;
                while let Some(event) = events.recv().await {
                    match event {
                        DriverEvent::Disconnected => return Ok(()),
                        DriverEvent::Failed(e) => return Err(e),
                        DriverEvent::Connected | DriverEvent::PubAck(_) => {}
                    }
                }
                Ok(())
            })
            .await
        });

        self.connected.store(false, Ordering::SeqCst);
        self.stop_driver();

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RendezvousError::Connection(format!("{}: {e}", self.endpoint))),
            Err(_) => Err(RendezvousError::Connection(format!(
                "{}: disconnect not confirmed within {grace:?}",
                self.endpoint
            ))),
        }
    }
}

impl Drop for MqttBus
{
    fn drop(&mut self)
    {
        self.stop_driver();
    }
}

#[cfg(test)]
mod tests
{
    use std::io::{self, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    /// What the loopback broker does once it has read the PUBLISH
    #[derive(Clone, Copy)]
    enum AfterPublish
    {
        Acknowledge,
        Ignore,
        Hang,
    }

    /// Packets the loopback broker saw: (fixed header, body)
    type Seen = Vec<(u8, Vec<u8>)>;

    fn runtime() -> tokio::runtime::Runtime
    {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    }

    fn read_packet(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)>
    {
        let mut byte = [0_u8; 1];
        stream.read_exact(&mut byte)?;
        let header = byte[0];

        let mut len = 0_usize;
        let mut shift = 0;
        loop {
            stream.read_exact(&mut byte)?;
            len |= usize::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0_u8; len];
        stream.read_exact(&mut body)?;
        Ok((header, body))
    }

    /// Accept one client, answer its CONNECT, then handle one PUBLISH.
    ///
    /// `Acknowledge` replies with a PUBACK and keeps reading until the
    /// client goes away. `Ignore` never replies. `Hang` drops the socket as
    /// soon as the PUBLISH is read.
    fn loopback_broker(after: AfterPublish) -> (u16, JoinHandle<Seen>)
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = thread::spawn(move || {
            let mut seen = Seen::new();
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

            let connect = read_packet(&mut stream).unwrap();
            assert_eq!(connect.0 >> 4, 1, "expected CONNECT");
            seen.push(connect);
            stream.write_all(&CONNACK).unwrap();

            let publish = read_packet(&mut stream).unwrap();
            assert_eq!(publish.0 >> 4, 3, "expected PUBLISH");
            let topic_len = usize::from(u16::from_be_bytes([publish.1[0], publish.1[1]]));
            let pkid = [publish.1[2 + topic_len], publish.1[3 + topic_len]];
            seen.push(publish);

            match after {
                AfterPublish::Acknowledge => stream.write_all(&[0x40, 0x02, pkid[0], pkid[1]]).unwrap(),
                AfterPublish::Hang => return seen,
                AfterPublish::Ignore => {}
            }

            while let Ok(packet) = read_packet(&mut stream) {
                seen.push(packet);
            }
            seen
        });

        (port, broker)
    }

    fn settings_for(port: u16) -> BusSettings
    {
        BusSettings {
            endpoint: BusEndpoint {
                host: "127.0.0.1".to_string(),
                port,
            },
            channel: "rendezvous/test".to_string(),
            credentials: None,
        }
    }

    fn closed_port() -> u16
    {
        // Bind then drop: nothing listens on the port afterwards.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_refused_connection_is_reported()
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let bus = MqttBus::new(&settings_for(closed_port()), "rendezvous_client_test", runtime.handle().clone());

        let err = bus.connect(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, RendezvousError::Connection(_)));
        assert!(!bus.is_connected());
    }

    #[test]
    fn test_publish_before_connect_is_rejected()
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let bus = MqttBus::new(&settings_for(1883), "rendezvous_client_test", runtime.handle().clone());

        let outcome = bus.publish("rendezvous/test", "payload", Duration::from_millis(50));
        assert!(matches!(outcome, PublishOutcome::Rejected(_)));
        assert!(bus.disconnect(Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn test_connect_twice_is_an_error()
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let bus = MqttBus::new(&settings_for(closed_port()), "rendezvous_client_test", runtime.handle().clone());

        let _ = bus.connect(Duration::from_secs(2));
        assert!(bus.connect(Duration::from_secs(2)).is_err());
    }

    #[test]
    fn test_acknowledged_publish_and_clean_disconnect()
    {
        let runtime = runtime();
        let (port, broker) = loopback_broker(AfterPublish::Acknowledge);
        let bus = MqttBus::new(&settings_for(port), "rendezvous_client_7", runtime.handle().clone());

        bus.connect(Duration::from_secs(5)).unwrap();
        assert!(bus.is_connected());

        let outcome = bus.publish("rendezvous/test", "10.0.0.5:proc:7:ab=bin", Duration::from_secs(5));
        assert_eq!(outcome, PublishOutcome::Acknowledged);

        bus.disconnect(Duration::from_secs(5)).unwrap();
        assert!(!bus.is_connected());

        let seen = broker.join().unwrap();
        let (header, body) = &seen[1];
        assert_eq!(header & 0x06, 0x02, "expected QoS 1");
        assert_eq!(&body[2..17], b"rendezvous/test");
        assert_eq!(&body[19..], b"10.0.0.5:proc:7:ab=bin");
        assert_eq!(seen.last().map(|(header, _)| header >> 4), Some(14), "expected DISCONNECT last");
    }

    #[test]
    fn test_missing_puback_times_out()
    {
        let runtime = runtime();
        let (port, _broker) = loopback_broker(AfterPublish::Ignore);
        let bus = MqttBus::new(&settings_for(port), "rendezvous_client_8", runtime.handle().clone());

        bus.connect(Duration::from_secs(5)).unwrap();
        let outcome = bus.publish("rendezvous/test", "payload", Duration::from_millis(300));
        assert_eq!(outcome, PublishOutcome::TimedOut);
        assert!(bus.is_connected());
    }

    #[test]
    fn test_broker_closing_mid_publish_is_rejected()
    {
        let runtime = runtime();
        let (port, broker) = loopback_broker(AfterPublish::Hang);
        let bus = MqttBus::new(&settings_for(port), "rendezvous_client_9", runtime.handle().clone());

        bus.connect(Duration::from_secs(5)).unwrap();
        let outcome = bus.publish("rendezvous/test", "payload", Duration::from_secs(5));
        assert!(matches!(outcome, PublishOutcome::Rejected(_)), "got {outcome:?}");
        assert!(!bus.is_connected());

        broker.join().unwrap();
        // Nothing left to close.
        assert!(bus.disconnect(Duration::from_millis(100)).is_ok());
    }
}
