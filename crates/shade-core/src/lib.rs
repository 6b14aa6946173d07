//! shade-core - Foundation types and traits for the shade reply-bot fleet.
//!
//! This crate provides:
//! - Identity newtypes shared by the registry and the workers
//! - Plan tiers and their trigger caps
//! - Wire shapes for the worker ⇄ registry surface
//! - The `ChatClient`/`ChatConnector` traits that abstract the chat
//!   platform, with the tagged `PlatformError` taxonomy
//! - The `RegistryClient` trait workers use to talk to the registry

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod ids;
pub mod plan;
pub mod platform;
pub mod registry;
pub mod trigger;

pub use ids::{ExternalId, SessionToken, WorkerId};
pub use plan::Plan;
pub use platform::{
    ChatClient, ChatConnector, ChatKind, IncomingMessage, PlatformError, PlatformResult,
};
pub use registry::{ClaimedSession, RegistryClient, RegistryError, RegistryResult, UserView};
pub use trigger::TriggerRule;
