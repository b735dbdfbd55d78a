//! BlueZ transport (Linux) built on `bluer`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Advertisement, DeviceId, PeripheralError, PeripheralTransport, ServiceInfo, TransportEvent,
};

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Tasks {
    scan: Option<JoinHandle<()>>,
    link: Vec<JoinHandle<()>>,
    events: Option<mpsc::Sender<TransportEvent>>,
}

impl Tasks {
    fn track_link(&mut self, task: JoinHandle<()>) {
        self.link.retain(|task| !task.is_finished());
        self.link.push(task);
    }

    fn abort_link(&mut self) {
        for task in self.link.drain(..) {
            task.abort();
        }
    }
}

/// [`PeripheralTransport`] over the system's default BlueZ adapter.
pub struct BluerTransport {
    _session: Session,
    adapter: Adapter,
    tasks: Mutex<Tasks>,
}

impl BluerTransport {
    /// Open a BlueZ session and power on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`PeripheralError::AdapterUnavailable`] if bluetoothd is not
    /// reachable or there is no adapter.
    pub async fn new() -> Result<Self, PeripheralError> {
        let session = Session::new().await.map_err(adapter_error)?;
        let adapter = session.default_adapter().await.map_err(adapter_error)?;
        adapter.set_powered(true).await.map_err(adapter_error)?;
        info!(adapter = adapter.name(), "Bluetooth adapter ready");

        Ok(Self {
            _session: session,
            adapter,
            tasks: Mutex::new(Tasks::default()),
        })
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device(&self, id: &DeviceId) -> Result<Device, PeripheralError> {
        let address: Address = id
            .as_str()
            .parse()
            .map_err(|_| PeripheralError::DeviceNotFound {
                device_id: id.to_string(),
            })?;
        self.adapter.device(address).map_err(io_error)
    }

    async fn characteristic(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, PeripheralError> {
        let device = self.device(id)?;
        for remote in device.services().await.map_err(io_error)? {
            if remote.uuid().await.map_err(io_error)? != service {
                continue;
            }
            for candidate in remote.characteristics().await.map_err(io_error)? {
                if candidate.uuid().await.map_err(io_error)? == characteristic {
                    return Ok(candidate);
                }
            }
        }
        Err(PeripheralError::CharacteristicNotFound {
            service,
            characteristic,
        })
    }

    async fn watch_link(&self, device: &Device, id: &DeviceId) {
        let Some(events) = self.tasks().events.clone() else {
            return;
        };
        let stream = match device.events().await {
            Ok(stream) => stream,
            Err(error) => {
                debug!(device_id = %id, %error, "Link events unavailable");
                return;
            }
        };
        let device_id = id.to_string();
        let task = tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    let _ = events.send(TransportEvent::Disconnected { device_id }).await;
                    break;
                }
            }
        });
        self.tasks().track_link(task);
    }
}

#[async_trait]
impl PeripheralTransport for BluerTransport {
    async fn start_scan(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PeripheralError> {
        let discovery = self
            .adapter
            .discover_devices()
            .await
            .map_err(|error| PeripheralError::ScanFailed {
                message: error.to_string(),
            })?;
        let adapter = self.adapter.clone();
        let sender = events.clone();
        let task = tokio::spawn(async move {
            let mut discovery = Box::pin(discovery);
            while let Some(event) = discovery.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let device = match adapter.device(address) {
                    Ok(device) => device,
                    Err(error) => {
                        debug!(%address, %error, "Device vanished before inspection");
                        continue;
                    }
                };
                let advert = Advertisement {
                    id: Some(address.to_string()),
                    name: device.name().await.ok().flatten(),
                    rssi: device.rssi().await.ok().flatten(),
                };
                if sender.send(TransportEvent::Discovered(advert)).await.is_err() {
                    return;
                }
            }
            let _ = sender.send(TransportEvent::ScanStopped).await;
        });

        let mut tasks = self.tasks();
        if let Some(previous) = tasks.scan.replace(task) {
            previous.abort();
        }
        tasks.events = Some(events);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), PeripheralError> {
        if let Some(task) = self.tasks().scan.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(&self, id: &DeviceId) -> Result<(), PeripheralError> {
        self.tasks().abort_link();
        let device = self.device(id)?;
        device
            .connect()
            .await
            .map_err(|error| PeripheralError::ConnectionFailed {
                device_id: id.to_string(),
                message: error.to_string(),
            })?;
        self.watch_link(&device, id).await;
        Ok(())
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<Vec<ServiceInfo>, PeripheralError> {
        let device = self.device(id)?;
        let resolved = tokio::time::timeout(SERVICES_RESOLVE_TIMEOUT, async {
            loop {
                match device.is_services_resolved().await {
                    Ok(true) => return Ok(()),
                    Ok(false) => tokio::time::sleep(SERVICES_POLL_INTERVAL).await,
                    Err(error) => return Err(io_error(error)),
                }
            }
        })
        .await;
        match resolved {
            Ok(result) => result?,
            Err(_) => {
                return Err(PeripheralError::ConnectionFailed {
                    device_id: id.to_string(),
                    message: "service discovery timed out".to_string(),
                })
            }
        }

        let mut services = Vec::new();
        for remote in device.services().await.map_err(io_error)? {
            let mut characteristics = Vec::new();
            for characteristic in remote.characteristics().await.map_err(io_error)? {
                characteristics.push(characteristic.uuid().await.map_err(io_error)?);
            }
            services.push(ServiceInfo {
                uuid: remote.uuid().await.map_err(io_error)?,
                characteristics,
            });
        }
        debug!(device_id = %id, services = services.len(), "Services resolved");
        Ok(services)
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<(), PeripheralError> {
        self.tasks().abort_link();
        let device = self.device(id)?;
        device.disconnect().await.map_err(io_error)
    }

    async fn read(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PeripheralError> {
        let remote = self.characteristic(id, service, characteristic).await?;
        remote.read().await.map_err(io_error)
    }

    async fn write(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PeripheralError> {
        let remote = self.characteristic(id, service, characteristic).await?;
        remote.write(value).await.map_err(io_error)
    }

    async fn subscribe(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PeripheralError> {
        let remote = self.characteristic(id, service, characteristic).await?;
        let notifications = remote.notify().await.map_err(io_error)?;
        let device_id = id.to_string();
        let task = tokio::spawn(async move {
            let mut notifications = Box::pin(notifications);
            while let Some(value) = notifications.next().await {
                let event = TransportEvent::Notification {
                    device_id: device_id.clone(),
                    characteristic,
                    value,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            warn!(%device_id, "Trigger notifications ended");
        });
        self.tasks().track_link(task);
        Ok(())
    }
}

impl Drop for BluerTransport {
    fn drop(&mut self) {
        let mut tasks = self.tasks();
        if let Some(scan) = tasks.scan.take() {
            scan.abort();
        }
        tasks.abort_link();
    }
}

fn adapter_error(error: bluer::Error) -> PeripheralError {
    PeripheralError::AdapterUnavailable {
        message: error.to_string(),
    }
}

fn io_error(error: bluer::Error) -> PeripheralError {
    PeripheralError::Io {
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_link_tasks_are_pruned() {
        let mut tasks = Tasks::default();
        let finished = tokio::spawn(async {});
        while !finished.is_finished() {
            tokio::task::yield_now().await;
        }

        tasks.track_link(finished);
        tasks.track_link(tokio::spawn(std::future::pending::<()>()));
        assert_eq!(tasks.link.len(), 1);

        tasks.abort_link();
        assert!(tasks.link.is_empty());
    }
}
