//! Faultline Codec Package
//!
//! Cross-chain consensus message algebra for the faultline toolkit: the
//! canonical message model, per-chain codec adapters (CometBFT, Hyperledger
//! Besu, Hyperledger Fabric, Kaia), structural validation rules, and the
//! Byzantine mutation pipeline used by the intercepting proxy.
//!
//! The crate is pure data transformation: no I/O, no clocks on the decode
//! path, no global state. Adapters are immutable and safe to share across
//! sessions.

pub mod adapters;
pub mod byzantine;
pub mod error;
pub mod message;
pub mod testing;
pub mod validator;
pub mod value;

// Re-export commonly used types
pub use adapters::{adapter_for_chain, ChainAdapter};
pub use byzantine::{apply_action, ByzantineAction, ByzantineOptions};
pub use error::CodecError;
pub use message::{
    CanonicalMessage, ChainTag, MsgType, RawConsensusMessage, ViewChangeEntry, WireEncoding,
};
pub use validator::{FieldConstraint, FieldType, MessageValidator, ValidationRules};
pub use value::ExtensionValue;

/// Result type alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
