//! Application state shared across handlers.
//!
//! Building the state wires the subsystems together: the alert orchestrator
//! owns the countdown, the peripheral service forwards trigger signals to it,
//! and both are driven through cloneable handles.

use std::sync::Arc;

use anyhow::Context;
use safewalk_core::{
    AlertDispatcher, AlertOrchestrator, Config, CountdownHandle, FileStore, FiringPipeline,
    FixedLocationProvider, KeyValueStore, LocationProvider, LocationResolver, MessagingGateway,
    PeripheralHandle, PeripheralService, PeripheralTransport, ProfileStore,
};
use tracing::info;

use crate::gateway;

/// State handed to every handler.
pub type SharedState = Arc<AppState>;

/// Handles to the running subsystems.
///
/// The background services stop once the last clone of their handles is
/// dropped, so dropping the state shuts everything down.
pub struct AppState {
    /// Configuration the server was started with.
    pub config: Config,
    /// Countdown and alert orchestration.
    pub countdown: CountdownHandle,
    /// Trigger peripheral session.
    pub peripheral: PeripheralHandle,
    /// Contact profile persistence.
    pub profiles: ProfileStore,
}

/// Collaborators the state is assembled from.
pub struct Components {
    /// Profile and location cache storage.
    pub store: Arc<dyn KeyValueStore>,
    /// Outbound messaging.
    pub gateway: Arc<dyn MessagingGateway>,
    /// Device location source.
    pub location: Arc<dyn LocationProvider>,
    /// Bluetooth transport.
    pub transport: Arc<dyn PeripheralTransport>,
}

impl AppState {
    /// Build the production state for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, the messaging gateway or the
    /// Bluetooth adapter cannot be set up.
    pub async fn from_config(config: Config) -> anyhow::Result<SharedState> {
        let data_dir = config.data_dir();
        let store = FileStore::open(&data_dir)
            .with_context(|| format!("opening data directory {}", data_dir.display()))?;
        info!(path = %store.path().display(), "Store opened");

        let components = Components {
            store: Arc::new(store),
            gateway: gateway::from_config(&config.messaging)?,
            location: Arc::new(FixedLocationProvider::from_config(&config.location)),
            transport: default_transport().await?,
        };
        Ok(Self::with_components(config, components))
    }

    /// Spawn the services over explicit collaborators.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_components(config: Config, components: Components) -> SharedState {
        let profiles = ProfileStore::new(Arc::clone(&components.store));
        let resolver = LocationResolver::new(components.location, components.store);
        let dispatcher = AlertDispatcher::new(
            components.gateway,
            profiles.clone(),
            config.alert.maps_base_url.clone(),
        );

        let orchestrator =
            AlertOrchestrator::new(&config.countdown, FiringPipeline::new(resolver, dispatcher));
        let (countdown, _countdown_task) = orchestrator.spawn();

        let service = PeripheralService::new(
            components.transport,
            config.peripheral.clone(),
            Some(countdown.clone()),
        );
        let (peripheral, _peripheral_task) = service.spawn();

        Arc::new(Self {
            config,
            countdown,
            peripheral,
            profiles,
        })
    }
}

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn default_transport() -> anyhow::Result<Arc<dyn PeripheralTransport>> {
    let transport = safewalk_core::BluerTransport::new().await.context(
        "Bluetooth adapter unavailable; build with `--no-default-features --features \
         mock-bluetooth` to run without hardware",
    )?;
    Ok(Arc::new(transport))
}

#[cfg(not(all(feature = "bluetooth", not(feature = "mock-bluetooth"))))]
#[allow(clippy::unused_async)]
async fn default_transport() -> anyhow::Result<Arc<dyn PeripheralTransport>> {
    tracing::warn!("Using the simulated trigger peripheral");
    Ok(Arc::new(safewalk_core::MockTransport::demo()))
}
