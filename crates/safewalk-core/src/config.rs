//! Application configuration management.
//!
//! Handles loading, saving, and validating safewalk configuration including:
//! - Countdown length and arming policy
//! - Alert message settings
//! - Location provider settings
//! - Trigger peripheral identity, scan window and trigger protocol
//! - Messaging gateway endpoint
//!
//! Configuration is layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `SAFEWALK__SECTION__KEY` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Prefix for environment variable overrides (`SAFEWALK__COUNTDOWN__TOTAL_SECONDS=45`).
pub const ENV_PREFIX: &str = "SAFEWALK";

/// Default countdown length in seconds.
pub const DEFAULT_TOTAL_SECONDS: u32 = 30;

/// Default scan window in seconds.
pub const DEFAULT_SCAN_WINDOW_SECS: u64 = 10;

/// Default pressure reading above which the trigger arms the countdown.
pub const DEFAULT_PRESSURE_THRESHOLD: u16 = 30_000;

/// Default trigger service UUID advertised by the trusted peripheral.
pub const DEFAULT_TRIGGER_SERVICE: Uuid = Uuid::from_u128(0x7a3f_0001_5c1e_4b8e_9d2a_3f6c_1b2e_8a40);

/// Default trigger characteristic UUID (read/notify).
pub const DEFAULT_TRIGGER_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x7a3f_0002_5c1e_4b8e_9d2a_3f6c_1b2e_8a40);

/// Errors that can occur while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration source could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialized to TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Countdown behavior.
    pub countdown: CountdownConfig,
    /// Alert message composition.
    pub alert: AlertConfig,
    /// Location provider settings.
    pub location: LocationConfig,
    /// Trigger peripheral settings.
    pub peripheral: PeripheralConfig,
    /// Messaging gateway settings.
    pub messaging: MessagingConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Persistent storage settings.
    pub storage: StorageConfig,
}

/// What the countdown does after a firing completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterFirePolicy {
    /// Return to idle; the user must re-arm explicitly.
    #[default]
    Idle,
    /// Start a fresh countdown immediately.
    Rearm,
}

/// Countdown configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// Seconds between arming and firing.
    pub total_seconds: u32,
    /// Arm the countdown as soon as the service starts.
    pub auto_arm_on_start: bool,
    /// State entered after a firing.
    pub after_fire: AfterFirePolicy,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            total_seconds: DEFAULT_TOTAL_SECONDS,
            auto_arm_on_start: true,
            after_fire: AfterFirePolicy::Idle,
        }
    }
}

/// Alert message configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Prefix of the map link; `{lat},{lon}` is appended.
    pub maps_base_url: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            maps_base_url: "https://maps.example/?q=".to_string(),
        }
    }
}

/// Location provider configuration.
///
/// The server runs on fixed hardware without a GNSS receiver, so the "fresh fix"
/// comes from a configured position. Disabling location models a denied permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Whether location access is permitted.
    pub enabled: bool,
    /// Latitude of the configured position.
    pub fixed_latitude: Option<f64>,
    /// Longitude of the configured position.
    pub fixed_longitude: Option<f64>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fixed_latitude: None,
            fixed_longitude: None,
        }
    }
}

/// Trigger peripheral configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Default scan window in seconds.
    pub scan_window_secs: u64,
    /// Advertised name prefix that identifies the trusted trigger.
    pub trusted_name_prefix: String,
    /// Connect automatically to a discovered trusted trigger.
    pub auto_connect: bool,
    /// Seconds between automatic scans while disconnected (0 disables).
    pub rescan_interval_secs: u64,
    /// GATT service carrying the trigger characteristic.
    pub trigger_service: Uuid,
    /// Trigger characteristic (read/notify).
    pub trigger_characteristic: Uuid,
    /// Pressure readings above this value arm the countdown.
    pub pressure_threshold: u16,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            scan_window_secs: DEFAULT_SCAN_WINDOW_SECS,
            trusted_name_prefix: "SmartSpray".to_string(),
            auto_connect: false,
            rescan_interval_secs: 0,
            trigger_service: DEFAULT_TRIGGER_SERVICE,
            trigger_characteristic: DEFAULT_TRIGGER_CHARACTERISTIC,
            pressure_threshold: DEFAULT_PRESSURE_THRESHOLD,
        }
    }
}

/// Messaging gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Endpoint of the SMS webhook. Without one every delivery fails.
    pub webhook_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 15,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Persistent storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory override. Defaults to [`crate::storage::default_data_dir`].
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `path`, layered over defaults and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a parse or
    /// validation error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::layered(Some(path))
    }

    /// Load configuration from `path` if it exists, otherwise from defaults and environment.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::layered(Some(path))
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Self::layered(None)
        }
    }

    fn layered(path: Option<&Path>) -> ConfigResult<Self> {
        let defaults = ::config::Config::try_from(&Self::default())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut builder = ::config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(::config::Config::try_deserialize)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate all sections, collecting every failure.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !(1..=3600).contains(&self.countdown.total_seconds) {
            errors.push(ConfigError::invalid(
                "countdown.total_seconds",
                "must be between 1 and 3600",
            ));
        }

        if !(self.alert.maps_base_url.starts_with("https://")
            || self.alert.maps_base_url.starts_with("http://"))
        {
            errors.push(ConfigError::invalid(
                "alert.maps_base_url",
                "must be an http(s) URL",
            ));
        }

        match (self.location.fixed_latitude, self.location.fixed_longitude) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    errors.push(ConfigError::invalid(
                        "location.fixed_latitude",
                        "must be between -90 and 90",
                    ));
                }
                if !(-180.0..=180.0).contains(&lon) {
                    errors.push(ConfigError::invalid(
                        "location.fixed_longitude",
                        "must be between -180 and 180",
                    ));
                }
            }
            (None, None) => {}
            _ => errors.push(ConfigError::invalid(
                "location",
                "fixed_latitude and fixed_longitude must be set together",
            )),
        }

        if !(1..=120).contains(&self.peripheral.scan_window_secs) {
            errors.push(ConfigError::invalid(
                "peripheral.scan_window_secs",
                "must be between 1 and 120",
            ));
        }
        if self.peripheral.trusted_name_prefix.trim().is_empty() {
            errors.push(ConfigError::invalid(
                "peripheral.trusted_name_prefix",
                "must not be empty",
            ));
        }

        if let Some(url) = &self.messaging.webhook_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                errors.push(ConfigError::invalid(
                    "messaging.webhook_url",
                    "must be an http(s) URL",
                ));
            }
        }
        if self.messaging.timeout_secs == 0 {
            errors.push(ConfigError::invalid(
                "messaging.timeout_secs",
                "must be greater than 0",
            ));
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::invalid(
                "server.bind_address",
                "must be a socket address such as 0.0.0.0:3000",
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Data directory, honoring the `storage.data_dir` override.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(crate::storage::default_data_dir)
    }
}

/// Get the default configuration file path.
///
/// On Linux: `/etc/safewalk/config.toml`
/// Elsewhere: the platform config directory, e.g. `~/Library/Application Support/safewalk/`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/safewalk/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "safewalk").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
