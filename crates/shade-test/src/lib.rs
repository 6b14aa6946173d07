//! Shared test support for the shade workspace: mock platform clients,
//! a mock registry, and small fixture builders.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod mocks;

pub use mocks::{MockChatClient, MockConnector, MockRegistry};
