//! In-memory transport for tests and machines without Bluetooth.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    Advertisement, DeviceId, PeripheralError, PeripheralTransport, ServiceInfo, TransportEvent,
};
use crate::config::{DEFAULT_TRIGGER_CHARACTERISTIC, DEFAULT_TRIGGER_SERVICE};

#[derive(Default)]
struct MockState {
    adverts: Vec<Advertisement>,
    services: HashMap<String, Vec<ServiceInfo>>,
    failing_connects: HashSet<String>,
    fail_disconnect: bool,
    values: HashMap<(Uuid, Uuid), Vec<u8>>,
    writes: Vec<(Uuid, Uuid, Vec<u8>)>,
    scan_starts: usize,
    connect_calls: usize,
    connected: Option<String>,
    events: Option<mpsc::Sender<TransportEvent>>,
}

/// Scripted [`PeripheralTransport`].
///
/// Devices added with the builder methods are advertised on every scan.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// A transport with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport advertising one trigger device, for running without hardware.
    #[must_use]
    pub fn demo() -> Self {
        Self::new().with_trigger_device("00:00:00:00:5A:FE", "SmartSpray-Demo")
    }

    /// Advertise a device without services.
    #[must_use]
    pub fn with_device(self, id: &str, name: &str) -> Self {
        {
            let mut state = self.lock();
            state.adverts.push(Advertisement {
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                rssi: Some(-60),
            });
            state.services.insert(id.to_string(), Vec::new());
        }
        self
    }

    /// Advertise a device exposing the default trigger characteristic.
    #[must_use]
    pub fn with_trigger_device(self, id: &str, name: &str) -> Self {
        let this = self.with_device(id, name);
        this.lock().services.insert(
            id.to_string(),
            vec![ServiceInfo {
                uuid: DEFAULT_TRIGGER_SERVICE,
                characteristics: vec![DEFAULT_TRIGGER_CHARACTERISTIC],
            }],
        );
        this
    }

    /// Make connecting to `id` fail.
    #[must_use]
    pub fn failing_connect(self, id: &str) -> Self {
        self.lock().failing_connects.insert(id.to_string());
        self
    }

    /// Remove every advertised device.
    pub fn clear_devices(&self) {
        let mut state = self.lock();
        state.adverts.clear();
        state.services.clear();
    }

    /// Make `disconnect` fail.
    pub fn set_fail_disconnect(&self, fail: bool) {
        self.lock().fail_disconnect = fail;
    }

    /// Set the value returned by `read`.
    pub fn set_value(&self, service: Uuid, characteristic: Uuid, value: Vec<u8>) {
        self.lock().values.insert((service, characteristic), value);
    }

    /// Number of scans started.
    #[must_use]
    pub fn scan_starts(&self) -> usize {
        self.lock().scan_starts
    }

    /// Number of connect attempts.
    #[must_use]
    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    /// Id of the connected device.
    #[must_use]
    pub fn connected(&self) -> Option<String> {
        self.lock().connected.clone()
    }

    /// Values written so far.
    #[must_use]
    pub fn writes(&self) -> Vec<(Uuid, Uuid, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Push a notification from the connected device.
    pub async fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        let target = {
            let state = self.lock();
            state.connected.clone().zip(state.events.clone())
        };
        if let Some((device_id, events)) = target {
            let _ = events
                .send(TransportEvent::Notification {
                    device_id,
                    characteristic,
                    value,
                })
                .await;
        }
    }

    /// Deliver an advertisement on the most recent scan's event channel,
    /// whether or not that scan is still running.
    pub async fn advertise(&self, id: &str, name: &str) {
        let events = self.lock().events.clone();
        if let Some(events) = events {
            let advert = Advertisement {
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                rssi: Some(-60),
            };
            let _ = events.send(TransportEvent::Discovered(advert)).await;
        }
    }

    /// Simulate the device going out of range.
    pub async fn drop_link(&self) {
        let target = {
            let mut state = self.lock();
            state.connected.take().zip(state.events.clone())
        };
        if let Some((device_id, events)) = target {
            let _ = events.send(TransportEvent::Disconnected { device_id }).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PeripheralTransport for MockTransport {
    async fn start_scan(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PeripheralError> {
        let adverts = {
            let mut state = self.lock();
            state.scan_starts += 1;
            state.events = Some(events.clone());
            state.adverts.clone()
        };
        for advert in adverts {
            let _ = events.send(TransportEvent::Discovered(advert)).await;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PeripheralError> {
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), PeripheralError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if state.failing_connects.contains(device.as_str())
            || !state.services.contains_key(device.as_str())
        {
            return Err(PeripheralError::ConnectionFailed {
                device_id: device.to_string(),
                message: "device unreachable".to_string(),
            });
        }
        state.connected = Some(device.to_string());
        Ok(())
    }

    async fn discover_services(
        &self,
        device: &DeviceId,
    ) -> Result<Vec<ServiceInfo>, PeripheralError> {
        Ok(self
            .lock()
            .services
            .get(device.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn disconnect(&self, _device: &DeviceId) -> Result<(), PeripheralError> {
        let mut state = self.lock();
        if state.fail_disconnect {
            return Err(PeripheralError::Io {
                message: "disconnect rejected".to_string(),
            });
        }
        state.connected = None;
        Ok(())
    }

    async fn read(
        &self,
        _device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PeripheralError> {
        self.lock()
            .values
            .get(&(service, characteristic))
            .cloned()
            .ok_or(PeripheralError::CharacteristicNotFound {
                service,
                characteristic,
            })
    }

    async fn write(
        &self,
        _device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PeripheralError> {
        self.lock()
            .writes
            .push((service, characteristic, value.to_vec()));
        Ok(())
    }

    async fn subscribe(
        &self,
        _device: &DeviceId,
        _service: Uuid,
        _characteristic: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PeripheralError> {
        self.lock().events = Some(events);
        Ok(())
    }
}
