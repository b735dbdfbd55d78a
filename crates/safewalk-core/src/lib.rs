//! # safewalk-core
//!
//! Core logic for the safewalk personal-safety alert service.
//!
//! A countdown is armed by the user or by a wireless trigger device. If it is
//! not disarmed before it reaches zero, the service resolves the user's
//! location and texts an emergency message to the configured contacts.
//!
//! ## Architecture
//!
//! - [`countdown`] - Countdown state machine, tick source and the firing orchestrator
//! - [`location`] - Location resolution with a cached fallback
//! - [`alert`] - Alert message composition and dispatch through a messaging gateway
//! - [`contacts`] - Emergency contact profile and validation
//! - [`peripheral`] - Trigger peripheral scanning, connection lifecycle and characteristic I/O
//! - [`storage`] - Key-value persistence for the profile and the location cache
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod alert;
pub mod config;
pub mod contacts;
pub mod countdown;
pub mod error;
pub mod location;
pub mod peripheral;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use alert::{
    AlertDispatcher, AlertError, AlertMessage, DeliveryOutcome, DeliveryReceipt, MessagingGateway,
};
pub use config::{
    AfterFirePolicy, Config, ConfigError, ConfigResult, CountdownConfig, PeripheralConfig,
};
pub use contacts::{is_valid_contact, Contact, ContactError, Profile, ProfileStore};
pub use countdown::{
    AlertEvent, AlertOrchestrator, AlertOutcome, CountdownHandle, CountdownSnapshot,
    CountdownState, FireCause, FiringPipeline, FiringReport, TriggerSignal,
};
pub use error::{Result, SafewalkError};
pub use location::{
    Coordinate, FixedLocationProvider, Freshness, LocationError, LocationProvider,
    LocationResolver, ResolvedLocation,
};
#[cfg(feature = "bluetooth")]
pub use peripheral::BluerTransport;
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use peripheral::MockTransport;
pub use peripheral::{
    LinkState, PeripheralDevice, PeripheralError, PeripheralHandle, PeripheralService,
    PeripheralSnapshot, PeripheralTransport,
};
pub use storage::{default_data_dir, FileStore, KeyValueStore, MemoryStore};
pub use types::HealthResponse;
