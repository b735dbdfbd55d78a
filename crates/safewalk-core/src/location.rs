//! Location resolution with a cached fallback.
//!
//! [`LocationResolver::resolve`] asks the provider for permission and a fresh fix.
//! Every fresh fix is written to the store under `lastLocation`; when permission
//! is denied or the fix fails, that cached coordinate is returned instead and
//! tagged [`Freshness::Cached`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::config::LocationConfig;
use crate::storage::{KeyValueStore, StoreError, StoreKey};

/// A single location reading. Immutable once captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    /// Latitude in decimal degrees.
    #[schema(example = 51.5072)]
    pub latitude: f64,

    /// Longitude in decimal degrees.
    #[schema(example = -0.1276)]
    pub longitude: f64,

    /// When the reading was taken (UTC).
    pub captured_at: DateTime<Utc>,
}

impl Coordinate {
    /// Capture a coordinate stamped with the current time.
    #[must_use]
    pub fn now(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at: Utc::now(),
        }
    }
}

/// Whether a resolved coordinate is a fresh fix or the cached fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    /// Captured during this resolution.
    Fresh,
    /// Read back from the `lastLocation` cache.
    Cached,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ResolvedLocation {
    /// The coordinate.
    pub coordinate: Coordinate,
    /// Where it came from.
    pub freshness: Freshness,
}

/// Answer to a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Location may be read.
    Granted,
    /// Location access was refused.
    Denied,
}

/// Location resolution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The provider refused access and nothing was cached.
    #[error("location permission denied")]
    PermissionDenied,
    /// No fresh or cached fix is available.
    #[error("no location fix available")]
    NoFixAvailable,
}

/// Source of location fixes (GNSS receiver, OS location service, fixed position).
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Ask for foreground location permission.
    async fn request_permission(&self) -> Permission;

    /// Take a fresh fix.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::PermissionDenied`] if access was revoked, or
    /// [`LocationError::NoFixAvailable`] if no reading could be taken.
    async fn current_fix(&self) -> Result<Coordinate, LocationError>;
}

/// Provider for fixed installations: the configured position is the fix.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    enabled: bool,
    position: Option<(f64, f64)>,
}

impl FixedLocationProvider {
    /// Build from configuration.
    #[must_use]
    pub fn from_config(config: &LocationConfig) -> Self {
        Self {
            enabled: config.enabled,
            position: config.fixed_latitude.zip(config.fixed_longitude),
        }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn request_permission(&self) -> Permission {
        if self.enabled {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn current_fix(&self) -> Result<Coordinate, LocationError> {
        if !self.enabled {
            return Err(LocationError::PermissionDenied);
        }
        self.position
            .map(|(lat, lon)| Coordinate::now(lat, lon))
            .ok_or(LocationError::NoFixAvailable)
    }
}

/// Resolves the best available coordinate and maintains the fallback cache.
#[derive(Clone)]
pub struct LocationResolver {
    provider: Arc<dyn LocationProvider>,
    cache: Arc<dyn KeyValueStore>,
}

impl LocationResolver {
    /// Create a resolver over a provider and the store holding `lastLocation`.
    #[must_use]
    pub fn new(provider: Arc<dyn LocationProvider>, cache: Arc<dyn KeyValueStore>) -> Self {
        Self { provider, cache }
    }

    /// Resolve a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::NoFixAvailable`] when permission is denied and nothing
    /// is cached. When permission is granted but the fix fails and nothing is cached,
    /// the provider's error is returned.
    pub async fn resolve(&self) -> Result<ResolvedLocation, LocationError> {
        match self.provider.request_permission().await {
            Permission::Granted => match self.provider.current_fix().await {
                Ok(coordinate) => {
                    self.store_cached(&coordinate).await;
                    debug!(
                        latitude = coordinate.latitude,
                        longitude = coordinate.longitude,
                        "Fresh location fix"
                    );
                    Ok(ResolvedLocation {
                        coordinate,
                        freshness: Freshness::Fresh,
                    })
                }
                Err(error) => {
                    warn!(%error, "Location fix failed, trying cached location");
                    self.cached_or(error)
                }
            },
            Permission::Denied => {
                info!("Location permission denied, trying cached location");
                self.cached_or(LocationError::NoFixAvailable)
            }
        }
    }

    /// The cached coordinate, if any.
    #[must_use]
    pub fn cached(&self) -> Option<Coordinate> {
        match self.load_cached() {
            Ok(coordinate) => coordinate,
            Err(error) => {
                warn!(%error, "Cached location unreadable");
                None
            }
        }
    }

    fn cached_or(&self, error: LocationError) -> Result<ResolvedLocation, LocationError> {
        let coordinate = self.cached().ok_or(error)?;
        info!(
            captured_at = %coordinate.captured_at,
            "Using cached location"
        );
        Ok(ResolvedLocation {
            coordinate,
            freshness: Freshness::Cached,
        })
    }

    fn load_cached(&self) -> Result<Option<Coordinate>, StoreError> {
        self.cache
            .get(StoreKey::LastLocation)?
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|source| StoreError::Encoding {
                    key: StoreKey::LastLocation,
                    source,
                })
            })
            .transpose()
    }

    async fn store_cached(&self, coordinate: &Coordinate) {
        let raw = match serde_json::to_string(coordinate) {
            Ok(raw) => raw,
            Err(source) => {
                let error = StoreError::Encoding {
                    key: StoreKey::LastLocation,
                    source,
                };
                warn!(%error, "Failed to cache location fix");
                return;
            }
        };
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || cache.set(StoreKey::LastLocation, &raw)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, "Failed to cache location fix"),
            Err(error) => warn!(%error, "Location cache write task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        permission: Permission,
        fix: Result<Coordinate, LocationError>,
        fix_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(permission: Permission, fix: Result<Coordinate, LocationError>) -> Arc<Self> {
            Arc::new(Self {
                permission,
                fix,
                fix_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LocationProvider for ScriptedProvider {
        async fn request_permission(&self) -> Permission {
            self.permission
        }

        async fn current_fix(&self) -> Result<Coordinate, LocationError> {
            self.fix_calls.fetch_add(1, Ordering::SeqCst);
            self.fix
        }
    }

    fn seeded_cache(coordinate: &Coordinate) -> Arc<MemoryStore> {
        let cache = Arc::new(MemoryStore::new());
        cache
            .set(
                StoreKey::LastLocation,
                &serde_json::to_string(coordinate).unwrap(),
            )
            .unwrap();
        cache
    }

    #[tokio::test]
    async fn test_fresh_fix_is_cached() {
        let fix = Coordinate::now(40.7128, -74.006);
        let cache = Arc::new(MemoryStore::new());
        let resolver =
            LocationResolver::new(ScriptedProvider::new(Permission::Granted, Ok(fix)), cache.clone());

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.freshness, Freshness::Fresh);
        assert_eq!(resolved.coordinate, fix);
        assert_eq!(resolver.cached(), Some(fix));
    }

    #[tokio::test]
    async fn test_fresh_fix_is_persisted_to_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let fix = Coordinate::now(51.5072, -0.1276);
        let store = Arc::new(crate::storage::FileStore::open(dir.path()).unwrap());
        let resolver =
            LocationResolver::new(ScriptedProvider::new(Permission::Granted, Ok(fix)), store);
        resolver.resolve().await.unwrap();

        let reopened = crate::storage::FileStore::open(dir.path()).unwrap();
        let raw = reopened.get(StoreKey::LastLocation).unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Coordinate>(&raw).unwrap(), fix);
    }

    #[tokio::test]
    async fn test_denied_uses_cache_without_fix() {
        let cached = Coordinate::now(1.5, 2.5);
        let provider = ScriptedProvider::new(Permission::Denied, Ok(Coordinate::now(9.0, 9.0)));
        let resolver = LocationResolver::new(provider.clone(), seeded_cache(&cached));

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.freshness, Freshness::Cached);
        assert_eq!(resolved.coordinate, cached);
        assert_eq!(provider.fix_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_without_cache_is_no_fix() {
        let resolver = LocationResolver::new(
            ScriptedProvider::new(Permission::Denied, Err(LocationError::NoFixAvailable)),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(
            resolver.resolve().await.unwrap_err(),
            LocationError::NoFixAvailable
        );
    }

    #[tokio::test]
    async fn test_failed_fix_falls_back_to_cache() {
        let cached = Coordinate::now(-33.86, 151.2);
        let resolver = LocationResolver::new(
            ScriptedProvider::new(Permission::Granted, Err(LocationError::NoFixAvailable)),
            seeded_cache(&cached),
        );

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.freshness, Freshness::Cached);
    }

    #[tokio::test]
    async fn test_revoked_permission_without_cache() {
        let resolver = LocationResolver::new(
            ScriptedProvider::new(Permission::Granted, Err(LocationError::PermissionDenied)),
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(
            resolver.resolve().await.unwrap_err(),
            LocationError::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_treated_as_missing() {
        let cache = Arc::new(MemoryStore::new());
        cache.set(StoreKey::LastLocation, "{garbage").unwrap();
        let resolver = LocationResolver::new(
            ScriptedProvider::new(Permission::Denied, Err(LocationError::NoFixAvailable)),
            cache,
        );
        assert!(resolver.cached().is_none());
        assert!(resolver.resolve().await.is_err());
    }

    #[tokio::test]
    async fn test_fixed_provider() {
        let provider = FixedLocationProvider::from_config(&LocationConfig {
            enabled: true,
            fixed_latitude: Some(10.0),
            fixed_longitude: Some(20.0),
        });
        assert_eq!(provider.request_permission().await, Permission::Granted);
        let fix = provider.current_fix().await.unwrap();
        assert!((fix.latitude - 10.0).abs() < f64::EPSILON);

        let disabled = FixedLocationProvider::from_config(&LocationConfig {
            enabled: false,
            ..LocationConfig::default()
        });
        assert_eq!(disabled.request_permission().await, Permission::Denied);

        let unset = FixedLocationProvider::from_config(&LocationConfig::default());
        assert_eq!(
            unset.current_fix().await.unwrap_err(),
            LocationError::NoFixAvailable
        );
    }
}
