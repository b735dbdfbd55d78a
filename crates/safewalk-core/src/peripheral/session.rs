//! Peripheral session state and transitions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::protocol::decode_trigger;
use super::{
    DeviceId, LinkState, PeripheralDevice, PeripheralError, PeripheralSession, PeripheralSnapshot,
    PeripheralTransport, ServiceInfo, TransportEvent,
};
use crate::config::PeripheralConfig;
use crate::countdown::TriggerSignal;

/// Owns the discovered set and the single active connection.
///
/// Every transition goes through `&mut self`, so callers serialize access by
/// construction. [`super::PeripheralService`] drives one from a task.
pub struct SessionManager {
    transport: Arc<dyn PeripheralTransport>,
    events_tx: mpsc::Sender<TransportEvent>,
    config: PeripheralConfig,
    state: LinkState,
    scan_deadline: Option<Instant>,
    discovered: BTreeMap<DeviceId, PeripheralDevice>,
    session: Option<PeripheralSession>,
}

impl SessionManager {
    /// Create a disconnected manager. Transport events are pushed into `events_tx`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PeripheralTransport>,
        events_tx: mpsc::Sender<TransportEvent>,
        config: PeripheralConfig,
    ) -> Self {
        Self {
            transport,
            events_tx,
            config,
            state: LinkState::Disconnected,
            scan_deadline: None,
            discovered: BTreeMap::new(),
            session: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Whether a scan is running.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scan_deadline.is_some()
    }

    /// When the running scan ends on its own.
    #[must_use]
    pub const fn scan_deadline(&self) -> Option<Instant> {
        self.scan_deadline
    }

    /// The active connection.
    #[must_use]
    pub const fn session(&self) -> Option<&PeripheralSession> {
        self.session.as_ref()
    }

    /// Devices found by the current or last scan, ordered by id.
    pub fn discovered(&self) -> impl Iterator<Item = &PeripheralDevice> {
        self.discovered.values()
    }

    /// Read-only projection.
    #[must_use]
    pub fn snapshot(&self) -> PeripheralSnapshot {
        PeripheralSnapshot {
            state: self.state,
            discovered: self.discovered.values().cloned().collect(),
            session: self.session.clone(),
        }
    }

    /// Start discovery for `window`.
    ///
    /// While a scan is running this does nothing and returns `Ok(false)`; the
    /// running scan keeps its deadline and its results. Otherwise the
    /// discovered set is cleared and a new scan starts.
    ///
    /// # Errors
    ///
    /// Returns the transport error if discovery cannot start.
    pub async fn start_scan(&mut self, window: Duration) -> Result<bool, PeripheralError> {
        if self.is_scanning() {
            debug!("Scan already running");
            return Ok(false);
        }

        self.transport.start_scan(self.events_tx.clone()).await?;
        self.discovered.clear();
        self.scan_deadline = Some(Instant::now() + window);
        if self.session.is_none() {
            self.state = LinkState::Scanning;
        }
        info!(window_secs = window.as_secs_f64(), "Peripheral scan started");
        Ok(true)
    }

    /// Stop a running scan. No-op when not scanning.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the scan is considered stopped either way.
    pub async fn stop_scan(&mut self) -> Result<(), PeripheralError> {
        if !self.is_scanning() {
            return Ok(());
        }
        self.end_scan();
        info!(found = self.discovered.len(), "Peripheral scan stopped");
        self.transport.stop_scan().await
    }

    /// Connect to a discovered device.
    ///
    /// Stops any running scan first. Services are discovered before the
    /// session counts as connected, and trigger notifications are enabled if
    /// the device exposes the trigger characteristic. While connected this
    /// returns the existing session without touching the transport.
    ///
    /// # Errors
    ///
    /// - [`PeripheralError::DeviceNotFound`] if the id was not discovered (state unchanged)
    /// - [`PeripheralError::ConnectionFailed`] if the link or service discovery fails
    pub async fn connect(&mut self, device_id: &str) -> Result<PeripheralSession, PeripheralError> {
        if let Some(session) = &self.session {
            if session.device.id.as_str() != device_id.trim() {
                debug!(
                    requested = device_id,
                    connected = %session.device.id,
                    "Already connected, keeping existing session"
                );
            }
            return Ok(session.clone());
        }

        let device = DeviceId::parse(device_id)
            .and_then(|id| self.discovered.get(&id).cloned())
            .ok_or_else(|| PeripheralError::DeviceNotFound {
                device_id: device_id.to_string(),
            })?;

        if let Err(error) = self.stop_scan().await {
            warn!(%error, "Failed to stop scan before connecting");
        }

        self.state = LinkState::Connecting;
        info!(device_id = %device.id, name = ?device.display_name, "Connecting to peripheral");
        match self.establish(&device).await {
            Ok(session) => {
                info!(
                    device_id = %device.id,
                    services = session.services.len(),
                    trigger = session.trigger_subscribed,
                    "Peripheral connected"
                );
                self.session = Some(session.clone());
                self.state = LinkState::Connected;
                Ok(session)
            }
            Err(error) => {
                warn!(device_id = %device.id, %error, "Peripheral connection failed");
                self.state = LinkState::Disconnected;
                Err(error)
            }
        }
    }

    /// Close the active connection. No-op when disconnected.
    ///
    /// # Errors
    ///
    /// Returns the transport error and keeps the session if the link could
    /// not be closed.
    pub async fn disconnect(&mut self) -> Result<(), PeripheralError> {
        let Some(session) = &self.session else {
            return Ok(());
        };
        self.transport.disconnect(&session.device.id).await?;
        info!(device_id = %session.device.id, "Peripheral disconnected");
        self.close_session();
        Ok(())
    }

    /// Read a characteristic of the connected device.
    ///
    /// # Errors
    ///
    /// [`PeripheralError::NotConnected`] unless connected,
    /// [`PeripheralError::CharacteristicNotFound`] if the device does not expose
    /// it, or the transport error.
    pub async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PeripheralError> {
        let device = self.connected_device(service, characteristic)?;
        let value = self.transport.read(device, service, characteristic).await?;
        debug!(%service, %characteristic, len = value.len(), "Characteristic read");
        Ok(value)
    }

    /// Write a characteristic of the connected device.
    ///
    /// # Errors
    ///
    /// Same as [`Self::read_characteristic`].
    pub async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PeripheralError> {
        let device = self.connected_device(service, characteristic)?;
        self.transport
            .write(device, service, characteristic, value)
            .await?;
        debug!(%service, %characteristic, len = value.len(), "Characteristic written");
        Ok(())
    }

    /// Apply a transport event. Returns a trigger signal decoded from a
    /// notification, if any.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<TriggerSignal> {
        match event {
            TransportEvent::Discovered(advert) => {
                if !self.is_scanning() {
                    trace!("Advertisement outside scan window");
                    return None;
                }
                let Some(device) = PeripheralDevice::from_advertisement(advert) else {
                    debug!("Ignoring advertisement without device id");
                    return None;
                };
                if !self.discovered.contains_key(&device.id) {
                    info!(
                        device_id = %device.id,
                        name = ?device.display_name,
                        rssi = ?device.rssi,
                        "Peripheral discovered"
                    );
                }
                self.discovered.insert(device.id.clone(), device);
                if self.state == LinkState::Scanning {
                    self.state = LinkState::DeviceFound;
                }
                None
            }
            TransportEvent::ScanStopped => {
                if self.is_scanning() {
                    debug!("Transport ended the scan");
                    self.end_scan();
                }
                None
            }
            TransportEvent::Disconnected { device_id } => {
                if self.is_connected_to(&device_id) {
                    warn!(%device_id, "Peripheral link lost");
                    self.close_session();
                }
                None
            }
            TransportEvent::Notification {
                device_id,
                characteristic,
                value,
            } => {
                if !self.is_connected_to(&device_id)
                    || characteristic != self.config.trigger_characteristic
                {
                    trace!(%device_id, %characteristic, "Ignoring notification");
                    return None;
                }
                match decode_trigger(&value, self.config.pressure_threshold) {
                    Ok(signal) => signal,
                    Err(error) => {
                        warn!(%device_id, %error, "Malformed trigger payload");
                        None
                    }
                }
            }
        }
    }

    /// A discovered device eligible for auto-connect, if auto-connect applies.
    #[must_use]
    pub fn auto_connect_candidate(&self) -> Option<DeviceId> {
        if !self.config.auto_connect
            || self.session.is_some()
            || self.state == LinkState::Connecting
        {
            return None;
        }
        self.discovered
            .values()
            .find(|device| device.matches_prefix(&self.config.trusted_name_prefix))
            .map(|device| device.id.clone())
    }

    /// Drop the session and fall back to whatever the scan status implies.
    fn close_session(&mut self) {
        self.session = None;
        self.state = if !self.is_scanning() {
            LinkState::Disconnected
        } else if self.discovered.is_empty() {
            LinkState::Scanning
        } else {
            LinkState::DeviceFound
        };
    }

    fn end_scan(&mut self) {
        self.scan_deadline = None;
        if self.state == LinkState::Scanning {
            self.state = LinkState::Disconnected;
        }
    }

    fn is_connected_to(&self, device_id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.device.id.as_str() == device_id)
    }

    fn connected_device(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<&DeviceId, PeripheralError> {
        let session = self.session.as_ref().ok_or(PeripheralError::NotConnected)?;
        let exposed = session
            .services
            .iter()
            .any(|info| info.uuid == service && info.has_characteristic(characteristic));
        if !exposed {
            return Err(PeripheralError::CharacteristicNotFound {
                service,
                characteristic,
            });
        }
        Ok(&session.device.id)
    }

    async fn establish(
        &self,
        device: &PeripheralDevice,
    ) -> Result<PeripheralSession, PeripheralError> {
        let failed = |error: PeripheralError| match error {
            PeripheralError::ConnectionFailed { .. } => error,
            other => PeripheralError::ConnectionFailed {
                device_id: device.id.to_string(),
                message: other.to_string(),
            },
        };

        self.transport.connect(&device.id).await.map_err(failed)?;
        let services = match self.transport.discover_services(&device.id).await {
            Ok(services) => services,
            Err(error) => {
                if let Err(close) = self.transport.disconnect(&device.id).await {
                    debug!(%close, "Cleanup disconnect failed");
                }
                return Err(failed(error));
            }
        };
        let trigger_subscribed = self.subscribe_trigger(&device.id, &services).await;

        Ok(PeripheralSession {
            device: device.clone(),
            services,
            trigger_subscribed,
        })
    }

    async fn subscribe_trigger(&self, device: &DeviceId, services: &[ServiceInfo]) -> bool {
        let service = self.config.trigger_service;
        let characteristic = self.config.trigger_characteristic;
        let exposed = services
            .iter()
            .any(|info| info.uuid == service && info.has_characteristic(characteristic));
        if !exposed {
            debug!(device_id = %device, "Device has no trigger characteristic");
            return false;
        }
        match self
            .transport
            .subscribe(device, service, characteristic, self.events_tx.clone())
            .await
        {
            Ok(()) => true,
            Err(error) => {
                warn!(device_id = %device, %error, "Trigger subscription failed");
                false
            }
        }
    }
}
