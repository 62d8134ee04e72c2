//! ForgePM RCON - Remote-console client for running game servers
//!
//! Speaks the Source-style RCON framing over TCP. A [`Session`] is one
//! authenticated connection; [`RconClient`] opens one lazily and throws it
//! away after any failure. Every call is bounded by the caller's timeout.

mod client;
mod error;
pub mod packet;
pub mod parse;

pub use client::{RconClient, Session};
pub use error::{RconError, Result};
pub use parse::{parse_chat, parse_metrics, parse_players, ChatCommand};
