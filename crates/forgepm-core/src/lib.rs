//! ForgePM Core - Shared types, configuration, persistence, and error handling

pub mod config;
pub mod constants;
pub mod error;
pub mod store;
pub mod types;

pub use config::*;
pub use constants::*;
pub use error::{Error, Result};
pub use store::{write_atomic, JsonStore};
pub use types::*;
