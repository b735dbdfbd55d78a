//! # safewalk-server
//!
//! HTTP server library for the safewalk personal-safety alert service.
//!
//! This library provides the API handlers, the messaging gateway adapters and
//! the state wiring that connects the countdown, the contact profile and the
//! trigger peripheral.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod gateway;
pub mod logging;
pub mod state;
