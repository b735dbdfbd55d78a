//! Peripheral session task and its handle.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    PeripheralError, PeripheralSession, PeripheralSnapshot, PeripheralTransport, SessionManager,
    TransportEvent,
};
use crate::config::PeripheralConfig;
use crate::countdown::{CountdownHandle, TriggerSignal};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, PeripheralError>>;

enum Command {
    StartScan {
        window: Option<Duration>,
        reply: Reply<PeripheralSnapshot>,
    },
    StopScan {
        reply: Reply<PeripheralSnapshot>,
    },
    Connect {
        device_id: String,
        reply: Reply<PeripheralSession>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Read {
        service: Uuid,
        characteristic: Uuid,
        reply: Reply<Vec<u8>>,
    },
    Write {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        reply: Reply<()>,
    },
}

/// Runs a [`SessionManager`] on its own task.
///
/// Commands and transport events are handled in arrival order. Scans end at
/// their deadline, decoded trigger signals go to the countdown, and with
/// auto-connect enabled a trusted device is connected as soon as it is seen.
pub struct PeripheralService {
    manager: SessionManager,
    events: mpsc::Receiver<TransportEvent>,
    config: PeripheralConfig,
    countdown: Option<CountdownHandle>,
    snapshot_tx: watch::Sender<PeripheralSnapshot>,
}

impl PeripheralService {
    /// Create a service. Trigger signals are dropped when `countdown` is `None`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PeripheralTransport>,
        config: PeripheralConfig,
        countdown: Option<CountdownHandle>,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let manager = SessionManager::new(transport, events_tx, config.clone());
        let (snapshot_tx, _) = watch::channel(manager.snapshot());
        Self {
            manager,
            events,
            config,
            countdown,
            snapshot_tx,
        }
    }

    /// Spawn the service task. It stops once every handle is dropped.
    #[must_use]
    pub fn spawn(self) -> (PeripheralHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = PeripheralHandle {
            commands: commands_tx,
            snapshot: self.snapshot_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    fn scan_window(&self) -> Duration {
        Duration::from_secs(self.config.scan_window_secs)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!(
            trusted_prefix = %self.config.trusted_name_prefix,
            auto_connect = self.config.auto_connect,
            "Peripheral service started"
        );
        let mut rescan = (self.config.rescan_interval_secs > 0).then(|| {
            let period = Duration::from_secs(self.config.rescan_interval_secs);
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            let deadline = self.manager.scan_deadline();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                Some(event) = self.events.recv() => {
                    self.handle_event(event).await;
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!("Scan window elapsed");
                    if let Err(error) = self.manager.stop_scan().await {
                        warn!(%error, "Failed to stop scan");
                    }
                }
                () = next_rescan(&mut rescan) => {
                    self.rescan().await;
                }
            }
            self.publish();
        }

        if let Err(error) = self.manager.stop_scan().await {
            debug!(%error, "Scan stop on shutdown failed");
        }
        if let Err(error) = self.manager.disconnect().await {
            debug!(%error, "Disconnect on shutdown failed");
        }
        info!("Peripheral service stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan { window, reply } => {
                let window = window.unwrap_or_else(|| self.scan_window());
                self.drain_events().await;
                let result = self
                    .manager
                    .start_scan(window)
                    .await
                    .map(|_| self.manager.snapshot());
                let _ = reply.send(result);
            }
            Command::StopScan { reply } => {
                let result = self
                    .manager
                    .stop_scan()
                    .await
                    .map(|()| self.manager.snapshot());
                let _ = reply.send(result);
            }
            Command::Connect { device_id, reply } => {
                let _ = reply.send(self.manager.connect(&device_id).await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.manager.disconnect().await);
            }
            Command::Read {
                service,
                characteristic,
                reply,
            } => {
                let result = self
                    .manager
                    .read_characteristic(service, characteristic)
                    .await;
                let _ = reply.send(result);
            }
            Command::Write {
                service,
                characteristic,
                value,
                reply,
            } => {
                let result = self
                    .manager
                    .write_characteristic(service, characteristic, &value)
                    .await;
                let _ = reply.send(result);
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        let advertisement = matches!(event, TransportEvent::Discovered(_));
        if let Some(signal) = self.manager.handle_event(event) {
            self.forward(signal).await;
        }
        if !advertisement {
            return;
        }

        if let Some(device_id) = self.manager.auto_connect_candidate() {
            info!(%device_id, "Auto-connecting to trusted peripheral");
            if let Err(error) = self.manager.connect(device_id.as_str()).await {
                warn!(%device_id, %error, "Auto-connect failed");
            }
        }
    }

    /// Apply events already queued, so adverts from an ended scan are
    /// dropped instead of landing in the next scan's results.
    async fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await;
        }
    }

    async fn forward(&self, signal: TriggerSignal) {
        let Some(countdown) = &self.countdown else {
            debug!(?signal, "No countdown attached, dropping trigger signal");
            return;
        };
        match countdown.signal(signal).await {
            Ok(snapshot) => info!(?signal, state = ?snapshot.state, "Trigger signal delivered"),
            Err(error) => warn!(?signal, %error, "Trigger signal not delivered"),
        }
    }

    async fn rescan(&mut self) {
        if self.manager.session().is_some() || self.manager.is_scanning() {
            return;
        }
        debug!("Periodic rescan");
        self.drain_events().await;
        if let Err(error) = self.manager.start_scan(self.scan_window()).await {
            warn!(%error, "Periodic rescan failed");
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.manager.snapshot());
    }
}

async fn next_rescan(rescan: &mut Option<Interval>) {
    match rescan {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Cloneable handle to a running peripheral service.
#[derive(Clone)]
pub struct PeripheralHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PeripheralSnapshot>,
}

impl PeripheralHandle {
    /// Start a scan for `window`, or the configured window when `None`.
    /// A scan already running is left alone.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`PeripheralError::ServiceStopped`].
    pub async fn start_scan(
        &self,
        window: Option<Duration>,
    ) -> Result<PeripheralSnapshot, PeripheralError> {
        self.request(|reply| Command::StartScan { window, reply })
            .await
    }

    /// Stop the running scan.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`PeripheralError::ServiceStopped`].
    pub async fn stop_scan(&self) -> Result<PeripheralSnapshot, PeripheralError> {
        self.request(|reply| Command::StopScan { reply }).await
    }

    /// Connect to a discovered device.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::connect`].
    pub async fn connect(&self, device_id: &str) -> Result<PeripheralSession, PeripheralError> {
        let device_id = device_id.to_string();
        self.request(|reply| Command::Connect { device_id, reply })
            .await
    }

    /// Disconnect the active device.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::disconnect`].
    pub async fn disconnect(&self) -> Result<(), PeripheralError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Read a characteristic.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::read_characteristic`].
    pub async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PeripheralError> {
        self.request(|reply| Command::Read {
            service,
            characteristic,
            reply,
        })
        .await
    }

    /// Write a characteristic.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::write_characteristic`].
    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<(), PeripheralError> {
        self.request(|reply| Command::Write {
            service,
            characteristic,
            value,
            reply,
        })
        .await
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PeripheralSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<PeripheralSnapshot> {
        self.snapshot.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PeripheralError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PeripheralError::ServiceStopped)?;
        response.await.map_err(|_| PeripheralError::ServiceStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertDispatcher, DeliveryOutcome, MessagingGateway};
    use crate::config::CountdownConfig;
    use crate::contacts::{Profile, ProfileStore};
    use crate::countdown::{AlertOrchestrator, CountdownState, FiringPipeline};
    use crate::location::{FixedLocationProvider, LocationResolver};
    use crate::peripheral::{LinkState, MockTransport};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct NullGateway;

    #[async_trait]
    impl MessagingGateway for NullGateway {
        async fn send(&self, _recipients: &[String], _body: &str) -> DeliveryOutcome {
            DeliveryOutcome::Sent
        }
    }

    fn countdown() -> CountdownHandle {
        let store = Arc::new(MemoryStore::new());
        let profiles = ProfileStore::new(store.clone());
        profiles
            .save(&Profile {
                username: "Alex".into(),
                contact1: "5551234567".into(),
                contact2: String::new(),
            })
            .unwrap();
        let pipeline = FiringPipeline::new(
            LocationResolver::new(
                Arc::new(FixedLocationProvider::from_config(&Default::default())),
                store,
            ),
            AlertDispatcher::new(Arc::new(NullGateway), profiles, "https://maps.example/?q="),
        );
        let config = CountdownConfig {
            auto_arm_on_start: false,
            ..CountdownConfig::default()
        };
        AlertOrchestrator::new(&config, pipeline).spawn().0
    }

    fn spawn(
        transport: MockTransport,
        config: PeripheralConfig,
        countdown: Option<CountdownHandle>,
    ) -> (PeripheralHandle, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let (handle, _task) = PeripheralService::new(transport.clone(), config, countdown).spawn();
        (handle, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_ends_at_window() {
        let (handle, transport) = spawn(
            MockTransport::new().with_device("AA:01", "SmartSpray-01"),
            PeripheralConfig::default(),
            None,
        );

        let snapshot = handle
            .start_scan(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(snapshot.state, LinkState::Scanning);
        handle
            .start_scan(Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(transport.scan_starts(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, LinkState::DeviceFound);
        assert_eq!(snapshot.discovered.len(), 1);

        handle.start_scan(None).await.unwrap();
        assert_eq!(transport.scan_starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_characteristic_io() {
        let config = PeripheralConfig::default();
        let (handle, transport) = spawn(
            MockTransport::new().with_trigger_device("AA:01", "SmartSpray-01"),
            config.clone(),
            None,
        );
        handle.start_scan(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let session = handle.connect("AA:01").await.unwrap();
        assert!(session.trigger_subscribed);
        transport.set_value(config.trigger_service, config.trigger_characteristic, vec![0]);
        assert_eq!(
            handle
                .read_characteristic(config.trigger_service, config.trigger_characteristic)
                .await
                .unwrap(),
            vec![0]
        );

        handle.disconnect().await.unwrap();
        assert_eq!(
            handle
                .read_characteristic(config.trigger_service, config.trigger_characteristic)
                .await,
            Err(PeripheralError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_device_is_not_found() {
        let (handle, _transport) =
            spawn(MockTransport::new(), PeripheralConfig::default(), None);
        assert!(matches!(
            handle.connect("AA:99").await,
            Err(PeripheralError::DeviceNotFound { .. })
        ));
        assert_eq!(handle.snapshot().state, LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_notifications_drive_countdown() {
        let config = PeripheralConfig::default();
        let countdown = countdown();
        let (handle, transport) = spawn(
            MockTransport::new().with_trigger_device("AA:01", "SmartSpray-01"),
            config.clone(),
            Some(countdown.clone()),
        );
        handle.start_scan(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.connect("AA:01").await.unwrap();

        transport
            .notify(config.trigger_characteristic, vec![0x01])
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(countdown.snapshot().state, CountdownState::Armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_connect_trusted_device() {
        let config = PeripheralConfig {
            auto_connect: true,
            ..PeripheralConfig::default()
        };
        let (handle, transport) = spawn(
            MockTransport::new()
                .with_device("AA:01", "Headphones")
                .with_trigger_device("AA:02", "SmartSpray-02"),
            config,
            None,
        );
        handle.start_scan(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, LinkState::Connected);
        assert_eq!(transport.connected().as_deref(), Some("AA:02"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_rescan_while_disconnected() {
        let config = PeripheralConfig {
            scan_window_secs: 2,
            rescan_interval_secs: 30,
            ..PeripheralConfig::default()
        };
        let (_handle, transport) = spawn(MockTransport::new(), config, None);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(transport.scan_starts(), 3);
    }

    #[tokio::test]
    async fn test_new_scan_drops_adverts_from_previous_scan() {
        let transport = Arc::new(MockTransport::new());
        let mut service =
            PeripheralService::new(transport.clone(), PeripheralConfig::default(), None);
        let window = Some(Duration::from_secs(5));

        let (reply, _) = oneshot::channel();
        service
            .handle_command(Command::StartScan { window, reply })
            .await;
        let (reply, _) = oneshot::channel();
        service.handle_command(Command::StopScan { reply }).await;

        transport.advertise("AA:09", "SmartSpray-09").await;

        let (reply, response) = oneshot::channel();
        service
            .handle_command(Command::StartScan { window, reply })
            .await;
        let snapshot = response.await.unwrap().unwrap();
        assert_eq!(snapshot.state, LinkState::Scanning);
        assert!(snapshot.discovered.is_empty());

        while let Ok(event) = service.events.try_recv() {
            service.handle_event(event).await;
        }
        assert_eq!(service.manager.discovered().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_is_reflected() {
        let (handle, transport) = spawn(
            MockTransport::new().with_device("AA:01", "SmartSpray-01"),
            PeripheralConfig::default(),
            None,
        );
        handle.start_scan(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.connect("AA:01").await.unwrap();

        transport.drop_link().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.snapshot().state, LinkState::Disconnected);
    }
}
