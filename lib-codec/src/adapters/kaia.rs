//! Kaia Istanbul-BFT adapter
//!
//! Kaia names map symmetrically: PROPOSAL <-> Proposal, VOTE <-> Vote,
//! BLOCK <-> Block. Accepted encodings are `json` and `rlp`; both carry the
//! same JSON field map in this toolkit.
//!
//! Extension keys that round-trip: `gas_limit`, `gas_used`, `tx_count`,
//! `validator_count`, `consensus_type`, `governance_id`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::{CanonicalMessage, ChainTag, MsgType, RawConsensusMessage, WireEncoding};

use super::{check_chain_tag, normalize_hex, parse_decimal, require_height, require_round};

/// Consensus engine name used when the canonical message does not carry one.
const DEFAULT_CONSENSUS_TYPE: &str = "istanbul";

/// Adapter for Kaia consensus messages
#[derive(Debug, Clone)]
pub struct KaiaAdapter {
    chain_id: String,
}

impl KaiaAdapter {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self { chain_id: chain_id.into() }
    }
}

/// The Kaia wire field map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KaiaWireMessage {
    /// Decimal string.
    pub block_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub round_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub block_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proposer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub validator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub gas_limit: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub gas_used: u64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub tx_count: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub validator_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub consensus_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub governance_id: String,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl super::ChainAdapter for KaiaAdapter {
    fn chain_tag(&self) -> ChainTag {
        ChainTag::Kaia
    }

    fn supported_types(&self) -> &'static [MsgType] {
        &[MsgType::Proposal, MsgType::Vote, MsgType::Block]
    }

    fn to_canonical(&self, raw: &RawConsensusMessage) -> Result<CanonicalMessage, CodecError> {
        check_chain_tag(ChainTag::Kaia, raw)?;
        if raw.encoding == WireEncoding::Proto {
            return Err(CodecError::UnsupportedEncoding {
                encoding: raw.encoding.to_string(),
            });
        }

        let wire: KaiaWireMessage = serde_json::from_slice(&raw.payload)
            .map_err(|e| CodecError::decode("payload", e))?;

        let native = if wire.msg_type.is_empty() {
            raw.message_type.as_str()
        } else {
            wire.msg_type.as_str()
        };
        let msg_type = match native {
            "PROPOSAL" => MsgType::Proposal,
            "VOTE" => MsgType::Vote,
            "BLOCK" => MsgType::Block,
            _ => return Err(CodecError::UnsupportedMessage),
        };

        let mut msg = CanonicalMessage::new(self.chain_id.clone(), msg_type);
        msg.height = Some(parse_decimal("block_number", &wire.block_number)?);
        if !wire.round_number.is_empty() {
            msg.round = Some(parse_decimal("round_number", &wire.round_number)?);
        }
        msg.timestamp = wire.timestamp.or(raw.timestamp);
        msg.raw_payload = Some(raw.payload.clone());

        if !wire.block_hash.is_empty() {
            msg.block_hash = Some(normalize_hex(&wire.block_hash));
        }
        if !wire.parent_hash.is_empty() {
            msg.prev_hash = Some(normalize_hex(&wire.parent_hash));
        }
        if !wire.proposer.is_empty() {
            msg.proposer = Some(wire.proposer.clone());
        }
        if !wire.validator.is_empty() {
            msg.validator = Some(wire.validator.clone());
        }
        if !wire.signature.is_empty() {
            msg.signature = Some(wire.signature.clone());
        }

        if wire.gas_limit != 0 {
            msg.extensions.insert("gas_limit".into(), ext_int(wire.gas_limit));
        }
        if wire.gas_used != 0 {
            msg.extensions.insert("gas_used".into(), ext_int(wire.gas_used));
        }
        if wire.tx_count != 0 {
            msg.extensions.insert("tx_count".into(), wire.tx_count.into());
        }
        if wire.validator_count != 0 {
            msg.extensions
                .insert("validator_count".into(), wire.validator_count.into());
        }
        if !wire.consensus_type.is_empty() {
            msg.extensions
                .insert("consensus_type".into(), wire.consensus_type.clone().into());
        }
        if !wire.governance_id.is_empty() {
            msg.extensions
                .insert("governance_id".into(), wire.governance_id.clone().into());
        }

        Ok(msg)
    }

    fn from_canonical(&self, msg: &CanonicalMessage) -> Result<RawConsensusMessage, CodecError> {
        let native = match msg.msg_type {
            MsgType::Proposal => "PROPOSAL",
            MsgType::Vote => "VOTE",
            MsgType::Block => "BLOCK",
            other => return Err(CodecError::UnsupportedType { msg_type: other }),
        };

        let ext_u64 =
            |key: &str| msg.extensions.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        let ext_str = |key: &str| {
            msg.extensions
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let consensus_type = match ext_str("consensus_type") {
            s if s.is_empty() => DEFAULT_CONSENSUS_TYPE.to_string(),
            s => s,
        };

        let wire = KaiaWireMessage {
            block_number: require_height(msg)?.to_string(),
            round_number: require_round(msg)?.to_string(),
            timestamp: Some(msg.timestamp.unwrap_or_else(Utc::now)),
            msg_type: native.to_string(),
            block_hash: msg.block_hash.clone().unwrap_or_default(),
            parent_hash: msg.prev_hash.clone().unwrap_or_default(),
            proposer: msg.proposer.clone().unwrap_or_default(),
            validator: msg.validator.clone().unwrap_or_default(),
            signature: msg.signature.clone().unwrap_or_default(),
            gas_limit: ext_u64("gas_limit"),
            gas_used: ext_u64("gas_used"),
            tx_count: ext_u64("tx_count") as u32,
            validator_count: ext_u64("validator_count") as u32,
            consensus_type: consensus_type.clone(),
            governance_id: ext_str("governance_id"),
        };

        let payload = serde_json::to_vec(&wire).map_err(|e| CodecError::decode("payload", e))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("consensus_type".to_string(), consensus_type.into());

        Ok(RawConsensusMessage {
            chain_tag: ChainTag::Kaia,
            chain_id: self.chain_id.clone(),
            message_type: native.to_string(),
            payload,
            encoding: WireEncoding::Json,
            timestamp: Some(Utc::now()),
            metadata,
        })
    }
}

// u64 extension values saturate at the signed boundary; gas fields never
// reach it in practice.
fn ext_int(value: u64) -> crate::value::ExtensionValue {
    crate::value::ExtensionValue::Int(value.min(i64::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChainAdapter;
    use num_bigint::BigUint;

    fn adapter() -> KaiaAdapter {
        KaiaAdapter::new("kaia-chain")
    }

    fn raw(payload: serde_json::Value) -> RawConsensusMessage {
        RawConsensusMessage {
            chain_tag: ChainTag::Kaia,
            chain_id: "kaia-chain".into(),
            message_type: String::new(),
            payload: serde_json::to_vec(&payload).expect("fixture"),
            encoding: WireEncoding::Json,
            timestamp: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_proposal_roundtrip_with_gas_fields() {
        let fixture = serde_json::json!({
            "block_number": "31337",
            "round_number": "2",
            "type": "PROPOSAL",
            "timestamp": "2025-10-18T10:30:00Z",
            "block_hash": "0xAB12",
            "parent_hash": "0xCD34",
            "proposer": "0xproposer",
            "signature": "a2FpYS1zaWc=",
            "gas_limit": 30000000u64,
            "gas_used": 21000u64,
            "tx_count": 4,
            "validator_count": 7,
            "consensus_type": "istanbul",
            "governance_id": "gov-1"
        });
        let codec = adapter();
        let msg = codec.to_canonical(&raw(fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::Proposal);
        assert_eq!(msg.height, Some(BigUint::from(31337u64)));
        assert_eq!(msg.block_hash.as_deref(), Some("ab12"));
        assert_eq!(msg.prev_hash.as_deref(), Some("cd34"));
        assert_eq!(
            msg.extensions.get("gas_limit").and_then(|v| v.as_u64()),
            Some(30_000_000)
        );

        let encoded = codec.from_canonical(&msg).expect("encode");
        let output: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
        assert_eq!(output["type"], serde_json::json!("PROPOSAL"));
        assert_eq!(output["block_number"], serde_json::json!("31337"));
        assert_eq!(output["round_number"], serde_json::json!("2"));
        assert_eq!(output["gas_limit"], serde_json::json!(30000000));
        assert_eq!(output["governance_id"], serde_json::json!("gov-1"));
        assert_eq!(output["signature"], serde_json::json!("a2FpYS1zaWc="));
    }

    #[test]
    fn test_vote_maps_to_generic_vote() {
        let fixture = serde_json::json!({
            "block_number": "5",
            "round_number": "0",
            "type": "VOTE",
            "validator": "0xval"
        });
        let msg = adapter().to_canonical(&raw(fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::Vote);
        assert_eq!(msg.validator.as_deref(), Some("0xval"));
    }

    #[test]
    fn test_block_maps_symmetrically() {
        let fixture = serde_json::json!({
            "block_number": "8",
            "round_number": "0",
            "type": "BLOCK",
            "block_hash": "0xEE"
        });
        let codec = adapter();
        let msg = codec.to_canonical(&raw(fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::Block);
        let encoded = codec.from_canonical(&msg).expect("encode");
        assert_eq!(encoded.message_type, "BLOCK");
    }

    #[test]
    fn test_default_consensus_type_on_encode() {
        let msg = CanonicalMessage::new("kaia-chain", MsgType::Vote)
            .with_height(1)
            .with_round(0);
        let encoded = adapter().from_canonical(&msg).expect("encode");
        let output: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
        assert_eq!(output["consensus_type"], serde_json::json!("istanbul"));
    }

    #[test]
    fn test_prepare_unsupported() {
        let msg = CanonicalMessage::new("kaia-chain", MsgType::Prepare)
            .with_height(1)
            .with_round(0);
        let err = adapter().from_canonical(&msg).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_proto_rejected() {
        let mut envelope = raw(serde_json::json!({"block_number": "1", "type": "VOTE"}));
        envelope.encoding = WireEncoding::Proto;
        let err = adapter().to_canonical(&envelope).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ENCODING");
    }
}
