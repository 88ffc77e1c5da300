//! # wavdrop common library
//!
//! Shared code for the wavdrop service crates:
//! - Error type used by configuration loading
//! - TOML / environment configuration
//! - Event types (`WavdropEvent`) and the broadcast `EventBus`

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
