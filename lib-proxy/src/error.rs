//! Proxy error types
//!
//! Transport and session failures are fatal to the session that hit them,
//! never to the engine. Codec errors never surface here on the hot path;
//! the session logs them and forwards the frame raw.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by the proxy engine and its sessions
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    /// Session bubble-up of a transport or cancellation failure.
    #[error("fatal session error: {0}")]
    Fatal(String),
}

impl ProxyError {
    /// Stable machine-readable code for structured logging.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::Io(_) => "IO",
            ProxyError::Handshake(_) => "HANDSHAKE",
            ProxyError::Transport(_) => "TRANSPORT",
            ProxyError::Config(_) => "CONFIG",
            ProxyError::DialTimeout(_) => "DIAL_TIMEOUT",
            ProxyError::Fatal(_) => "FATAL",
        }
    }
}
