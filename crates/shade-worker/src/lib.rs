//! shade-worker - one worker process of the reply-bot fleet.
//!
//! A worker claims user leases from the registry, runs a long-lived chat
//! client per claimed user, keeps each lease alive with heartbeats,
//! watches for server-side revocation, and drives the per-message
//! trigger-match-and-reply loop. One supervisor loop, N client sessions,
//! 2N auxiliary loops; every wait yields, every task honors the shutdown
//! broadcast.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod config;
pub mod heartbeat;
pub mod probe;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod trigger;

pub use config::{ConfigError, WorkerConfig};
pub use registry::HttpRegistry;
pub use supervisor::Supervisor;
