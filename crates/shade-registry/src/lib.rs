//! shade-registry - Session registry, claim service, and watchdog.
//!
//! The registry owns durable per-user state: identity, session token,
//! ownership lease, heartbeat timestamp, plan, and trigger rules. Workers
//! talk to it exclusively through the HTTP surface in [`http`]; the claim
//! transaction in [`claim`] is the only fleet-wide coordination point and
//! guarantees at-most-one ownership per user.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod claim;
pub mod config;
pub mod db;
pub mod error;
mod model;
pub mod store;
pub mod watchdog;

pub mod http;

pub use config::RegistryConfig;
pub use error::{StoreError, StoreResult};
pub use store::Store;
