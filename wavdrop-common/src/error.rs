//! Common error types for wavdrop

use thiserror::Error;

/// Common result type for wavdrop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
