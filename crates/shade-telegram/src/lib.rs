//! shade-telegram - Telegram transport for the shade worker fleet.
//!
//! Implements the platform client traits over the Telegram HTTP API via
//! `teloxide`: the session token backs the per-user bot, `get_me` serves
//! as the who-am-I probe, and incoming private messages arrive through a
//! long-poll update loop owned by the session task.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod client;
mod error;

pub use client::{TelegramChatClient, TelegramConnector};
