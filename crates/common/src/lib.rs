//! Common utilities and types shared across the live-room load harness crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for observability configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
