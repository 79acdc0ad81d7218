//! Faultline Proxy Package
//!
//! The intercepting proxy that sits on the peer-to-peer link between an
//! authentic consensus validator and its peers. Each accepted peer becomes a
//! session with two authenticated, multiplexed channels; consensus frames
//! are decoded into canonical form, optionally mutated under a triggered
//! fault policy, re-encoded and forwarded. Everything else is copied
//! through byte-for-byte.

pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod node_key;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::{ConfigError, Direction, Hooks, ProxyConfig, ProxyConfigOptions, Trigger};
pub use engine::Engine;
pub use error::ProxyError;
pub use metrics::Metrics;
pub use node_key::NodeKey;
pub use session::Session;

/// Result type alias for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
