//! Structured error types for the faultline CLI

use thiserror::Error;

use lib_proxy::config::ConfigError;
use lib_proxy::node_key::NodeKeyError;

/// CLI-level configuration errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid attack type: {0}")]
    InvalidAction(String),

    #[error("invalid mutate direction: {0}")]
    InvalidDirection(String),

    #[error("invalid timestamp skew {value:?}: {reason}")]
    InvalidTimestampSkew { value: String, reason: String },

    #[error("failed to load node key: {0}")]
    NodeKey(#[from] NodeKeyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
