//! Per-chain codec adapters
//!
//! One adapter per chain variant, each a bidirectional map between the
//! chain's wire payloads and the canonical message model. Adapters are
//! immutable and cheap to share; the proxy holds one behind an `Arc`.

pub mod besu;
pub mod cometbft;
pub mod extra_data;
pub mod fabric;
pub mod kaia;

pub use besu::BesuIbftAdapter;
pub use cometbft::CometBftAdapter;
pub use fabric::FabricPbftAdapter;
pub use kaia::KaiaAdapter;

use num_bigint::BigUint;

use crate::error::CodecError;
use crate::message::{CanonicalMessage, ChainTag, MsgType, RawConsensusMessage};

/// Bidirectional codec between chain wire payloads and canonical messages.
pub trait ChainAdapter: Send + Sync {
    /// The chain this adapter handles.
    fn chain_tag(&self) -> ChainTag;

    /// Canonical types this adapter can encode.
    fn supported_types(&self) -> &'static [MsgType];

    /// Decode a chain-tagged wire envelope into canonical form.
    fn to_canonical(&self, raw: &RawConsensusMessage) -> Result<CanonicalMessage, CodecError>;

    /// Encode a canonical message back into the chain's wire envelope.
    fn from_canonical(&self, msg: &CanonicalMessage) -> Result<RawConsensusMessage, CodecError>;
}

/// Default adapter for a chain tag.
///
/// Hyperledger resolves to the Besu IBFT flavour; the Fabric PBFT adapter
/// shares the tag and is constructed directly where needed.
pub fn adapter_for_chain(tag: ChainTag, chain_id: &str) -> Box<dyn ChainAdapter> {
    match tag {
        ChainTag::CometBft => Box::new(CometBftAdapter::new(chain_id)),
        ChainTag::Hyperledger => Box::new(BesuIbftAdapter::new(chain_id)),
        ChainTag::Kaia => Box::new(KaiaAdapter::new(chain_id)),
    }
}

/// Reject envelopes carrying the wrong chain tag.
pub(crate) fn check_chain_tag(
    expected: ChainTag,
    raw: &RawConsensusMessage,
) -> Result<(), CodecError> {
    if raw.chain_tag != expected {
        return Err(CodecError::ChainMismatch {
            expected,
            actual: raw.chain_tag,
        });
    }
    Ok(())
}

/// Parse an unbounded decimal field ("1000" -> 1000).
pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<BigUint, CodecError> {
    value
        .parse::<BigUint>()
        .map_err(|e| CodecError::decode(field, format!("invalid decimal {value:?}: {e}")))
}

/// Lowercase a hex string, stripping any `0x` prefix.
pub(crate) fn normalize_hex(value: &str) -> String {
    let trimmed = value.trim_start_matches("0x").trim_start_matches("0X");
    trimmed.to_ascii_lowercase()
}

/// Normalise an identity that is usually hex: hex input (with optional `0x`)
/// is lowercased; anything else is carried as an opaque string.
pub(crate) fn normalize_identity(value: &str) -> String {
    let candidate = normalize_hex(value);
    if !candidate.is_empty() && hex::decode(&candidate).is_ok() {
        candidate
    } else {
        value.to_string()
    }
}

/// Required-field accessor for the encode direction.
pub(crate) fn require_height(msg: &CanonicalMessage) -> Result<&BigUint, CodecError> {
    msg.height.as_ref().ok_or_else(|| CodecError::missing("height"))
}

pub(crate) fn require_round(msg: &CanonicalMessage) -> Result<&BigUint, CodecError> {
    msg.round.as_ref().ok_or_else(|| CodecError::missing("round"))
}
