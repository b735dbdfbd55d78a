//! Trigger peripheral discovery, connection lifecycle and characteristic I/O.
//!
//! ```text
//! Disconnected ──start_scan──► Scanning ──advert──► DeviceFound
//!      ▲                                                │ connect
//!      │◄──────────── failure ────────── Connecting ◄───┘
//!      │                                     │ services discovered
//!      └────────────── disconnect ◄──── Connected
//! ```
//!
//! [`SessionManager`] holds the lifecycle and talks to a [`PeripheralTransport`].
//! [`PeripheralService`] runs it on its own task, feeding decoded trigger
//! signals into the countdown.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod protocol;
mod service;
mod session;

#[cfg(feature = "bluetooth")]
mod bluez;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::BluerTransport;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::MockTransport;
pub use protocol::{decode_trigger, ProtocolError};
pub use service::{PeripheralHandle, PeripheralService};
pub use session::SessionManager;

/// Peripheral failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    /// The id is not in the discovered set.
    #[error("device not found: {device_id}")]
    DeviceNotFound {
        /// Requested id.
        device_id: String,
    },

    /// The transport failed to connect or discover services.
    #[error("connection to {device_id} failed: {message}")]
    ConnectionFailed {
        /// Target device.
        device_id: String,
        /// Transport error.
        message: String,
    },

    /// The operation needs a connected device.
    #[error("no peripheral connected")]
    NotConnected,

    /// No usable Bluetooth adapter.
    #[error("bluetooth adapter unavailable: {message}")]
    AdapterUnavailable {
        /// Transport error.
        message: String,
    },

    /// Discovery could not be started.
    #[error("scan failed: {message}")]
    ScanFailed {
        /// Transport error.
        message: String,
    },

    /// The connected device does not expose the characteristic.
    #[error("characteristic {characteristic} not found in service {service}")]
    CharacteristicNotFound {
        /// Service UUID.
        service: Uuid,
        /// Characteristic UUID.
        characteristic: Uuid,
    },

    /// A read, write, subscribe or disconnect failed in the transport.
    #[error("peripheral I/O failed: {message}")]
    Io {
        /// Transport error.
        message: String,
    },

    /// The peripheral task is no longer running.
    #[error("peripheral service stopped")]
    ServiceStopped,
}

/// Opaque, non-empty device identifier (a MAC address on BlueZ).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Validate an identifier. Surrounding whitespace is dropped.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    /// The identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = PeripheralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(PeripheralError::DeviceNotFound { device_id: value })
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw advertisement as reported by a transport. Not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    /// Device id, if the transport reported one.
    pub id: Option<String>,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A discovered peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeripheralDevice {
    /// Device identifier.
    #[schema(value_type = String, example = "C4:7F:0E:12:34:56")]
    pub id: DeviceId,
    /// Advertised name, if any.
    #[schema(example = "SmartSpray-01")]
    pub display_name: Option<String>,
    /// Last seen signal strength in dBm.
    #[schema(example = -62)]
    pub rssi: Option<i16>,
}

impl PeripheralDevice {
    /// Validate an advertisement. Records without an id are rejected.
    #[must_use]
    pub fn from_advertisement(advert: Advertisement) -> Option<Self> {
        let id = DeviceId::parse(advert.id.as_deref()?)?;
        let display_name = advert
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Some(Self {
            id,
            display_name,
            rssi: advert.rssi,
        })
    }

    /// Whether the advertised name starts with `prefix`.
    #[must_use]
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        !prefix.is_empty()
            && self
                .display_name
                .as_deref()
                .is_some_and(|name| name.starts_with(prefix))
    }
}

/// A GATT service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristic UUIDs.
    pub characteristics: Vec<Uuid>,
}

impl ServiceInfo {
    /// Whether this service has the given characteristic.
    #[must_use]
    pub fn has_characteristic(&self, characteristic: Uuid) -> bool {
        self.characteristics.contains(&characteristic)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    /// No connection and no scan.
    Disconnected,
    /// Discovery running, nothing found yet.
    Scanning,
    /// At least one device discovered.
    DeviceFound,
    /// Connection in progress.
    Connecting,
    /// Connected with services discovered.
    Connected,
}

/// The active connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeripheralSession {
    /// Connected device.
    pub device: PeripheralDevice,
    /// Services discovered after connecting.
    pub services: Vec<ServiceInfo>,
    /// Whether trigger notifications are subscribed.
    pub trigger_subscribed: bool,
}

/// Read-only projection of the peripheral session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeripheralSnapshot {
    /// Lifecycle state.
    pub state: LinkState,
    /// Devices found by the current or last scan.
    pub discovered: Vec<PeripheralDevice>,
    /// The active connection, if any.
    pub session: Option<PeripheralSession>,
}

/// Events pushed by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An advertisement was seen.
    Discovered(Advertisement),
    /// Discovery ended on the transport side.
    ScanStopped,
    /// The link to a device dropped.
    Disconnected {
        /// Device that dropped.
        device_id: String,
    },
    /// A subscribed characteristic changed.
    Notification {
        /// Source device.
        device_id: String,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// New value.
        value: Vec<u8>,
    },
}

/// Link-layer access to peripherals.
///
/// Implementations push asynchronous results as [`TransportEvent`]s into the
/// channel passed to `start_scan` and `subscribe`.
#[async_trait]
pub trait PeripheralTransport: Send + Sync {
    /// Begin discovery.
    async fn start_scan(&self, events: mpsc::Sender<TransportEvent>)
        -> Result<(), PeripheralError>;

    /// End discovery.
    async fn stop_scan(&self) -> Result<(), PeripheralError>;

    /// Open a link.
    async fn connect(&self, device: &DeviceId) -> Result<(), PeripheralError>;

    /// List services and characteristics of a connected device.
    async fn discover_services(&self, device: &DeviceId)
        -> Result<Vec<ServiceInfo>, PeripheralError>;

    /// Close a link.
    async fn disconnect(&self, device: &DeviceId) -> Result<(), PeripheralError>;

    /// Read a characteristic value.
    async fn read(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, PeripheralError>;

    /// Write a characteristic value.
    async fn write(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), PeripheralError>;

    /// Enable notifications; values arrive as [`TransportEvent::Notification`].
    async fn subscribe(
        &self,
        device: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), PeripheralError>;
}
