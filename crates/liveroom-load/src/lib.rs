//! Live-room load harness.
//!
//! Drives repeated scenario runs against a live-room session service. Each
//! run creates a session, brings every participant in concurrently, starts
//! background state polling and plays a scripted choreography of timed
//! actions. Runs are folded into an [`report::AggregateReport`] of success
//! counts and latency statistics.
//!
//! # Layers
//!
//! - [`accounts`]: pre-authenticated identities
//! - [`bootstrap`]: one session per run
//! - [`entry`]: all-or-nothing concurrent entry
//! - [`watcher`]: detached state pollers
//! - [`choreography`]: scripted steps and their engine
//! - [`runner`]: one timed run
//! - [`aggregator`]: repeated runs and the fan-in of their reports
//!
//! The session and identity services are reached through the
//! [`clients::SessionClient`] and [`clients::IdentityProvider`] traits.

pub mod accounts;
pub mod aggregator;
pub mod bootstrap;
pub mod choreography;
pub mod clients;
pub mod config;
pub mod entry;
pub mod errors;
pub mod fanout;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod pacing;
pub mod report;
pub mod runner;
pub mod watcher;
