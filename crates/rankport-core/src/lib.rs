//! # Rankport Core
//!
//! Error taxonomy, configuration and the API models shared by the platform
//! engine and the HTTP gateway.

pub mod config;
pub mod error;
pub mod types;

pub use config::RankportConfig;
pub use error::{RankportError, Result};
