//! Hyperledger Besu IBFT 2.0 / QBFT adapter
//!
//! Messages carry an 8-bit code (0 = Proposal, 1 = Prepare, 2 = Commit,
//! 3 = RoundChange). Commit is an outer record `{body, commit_seal}` whose
//! seal is a 65-byte secp256k1 signature over the body hash, carried base64
//! in the canonical signature field. RoundChange maps to canonical
//! RoundChange in both directions.
//!
//! Accepted encodings: `json` and `rlp`; in this toolkit both carry the same
//! JSON field map, the tag recording what the payload stood in for on the
//! original link. The epoch extra-data record round-trips through
//! `extensions["extra_data"]` (see [`super::extra_data`]) and is only
//! encoded when that extension is present.
//!
//! Extension keys that round-trip: `ibft_type`, `ibft_body_signature`,
//! `gas_limit`, `gas_used`, `tx_count`, `validator_count`,
//! `consensus_type`, `extra_data`.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::{CanonicalMessage, ChainTag, MsgType, RawConsensusMessage, WireEncoding};
use crate::value::ExtensionValue;

use super::extra_data::{EpochExtraData, EXTRA_DATA_KEY};
use super::{check_chain_tag, normalize_hex, parse_decimal, require_height, require_round};

/// IBFT message codes.
pub const CODE_PROPOSAL: u8 = 0x00;
pub const CODE_PREPARE: u8 = 0x01;
pub const CODE_COMMIT: u8 = 0x02;
pub const CODE_ROUND_CHANGE: u8 = 0x03;

/// Metadata keys copied into extensions and back.
const CARRIED_METADATA: &[&str] = &[
    "gas_limit",
    "gas_used",
    "tx_count",
    "validator_count",
    "consensus_type",
];

/// Adapter for Besu IBFT consensus messages
#[derive(Debug, Clone)]
pub struct BesuIbftAdapter {
    chain_id: String,
}

impl BesuIbftAdapter {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self { chain_id: chain_id.into() }
    }
}

/// The IBFT message header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BesuWireMessage {
    pub code: u8,
    /// Decimal string.
    pub height: String,
    pub round: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub block_hash: String,
    /// Base64 of the 65-byte secp256k1 signature.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
}

/// Commit outer record: the header plus the commit seal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BesuCommitPayload {
    pub body: BesuWireMessage,
    pub commit_seal: String,
}

impl super::ChainAdapter for BesuIbftAdapter {
    fn chain_tag(&self) -> ChainTag {
        ChainTag::Hyperledger
    }

    fn supported_types(&self) -> &'static [MsgType] {
        &[MsgType::Proposal, MsgType::Prepare, MsgType::Commit, MsgType::RoundChange]
    }

    fn to_canonical(&self, raw: &RawConsensusMessage) -> Result<CanonicalMessage, CodecError> {
        check_chain_tag(ChainTag::Hyperledger, raw)?;
        if raw.encoding == WireEncoding::Proto {
            return Err(CodecError::UnsupportedEncoding {
                encoding: raw.encoding.to_string(),
            });
        }

        let (msg_type, header, commit_seal) = match raw.message_type.as_str() {
            "Proposal" => (MsgType::Proposal, parse_header(&raw.payload)?, None),
            "Prepare" => (MsgType::Prepare, parse_header(&raw.payload)?, None),
            "RoundChange" => (MsgType::RoundChange, parse_header(&raw.payload)?, None),
            "Commit" => {
                let outer: BesuCommitPayload = serde_json::from_slice(&raw.payload)
                    .map_err(|e| CodecError::decode("payload", e))?;
                (MsgType::Commit, outer.body, Some(outer.commit_seal))
            }
            _ => return Err(CodecError::UnsupportedMessage),
        };

        let mut msg = CanonicalMessage::new(self.chain_id.clone(), msg_type);
        msg.height = Some(parse_decimal("height", &header.height)?);
        msg.round = Some(header.round.into());
        msg.timestamp = raw.timestamp;
        msg.raw_payload = Some(raw.payload.clone());
        if !header.block_hash.is_empty() {
            msg.block_hash = Some(normalize_hex(&header.block_hash));
        }

        msg.extensions
            .insert("ibft_type".into(), raw.message_type.clone().into());
        match commit_seal {
            Some(seal) => {
                if !header.signature.is_empty() {
                    msg.extensions
                        .insert("ibft_body_signature".into(), header.signature.clone().into());
                }
                msg.commit_seals = vec![seal.clone()];
                msg.signature = Some(seal);
            }
            None => {
                if !header.signature.is_empty() {
                    msg.signature = Some(header.signature.clone());
                }
            }
        }

        if let Some(identity) = raw.metadata.get("validator").and_then(|v| v.as_str()) {
            msg.validator = Some(identity.to_string());
            msg.proposer = Some(identity.to_string());
        }
        for key in CARRIED_METADATA {
            if let Some(value) = raw.metadata.get(*key) {
                msg.extensions.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(extra) = raw.metadata.get(EXTRA_DATA_KEY) {
            let bytes = extra
                .as_bytes()
                .ok_or_else(|| CodecError::decode(EXTRA_DATA_KEY, "expected bytes"))?;
            let record = EpochExtraData::decode(&bytes)?;
            msg.extensions.insert(EXTRA_DATA_KEY.into(), record.to_extension());
        }

        Ok(msg)
    }

    fn from_canonical(&self, msg: &CanonicalMessage) -> Result<RawConsensusMessage, CodecError> {
        let (code, name) = match msg.msg_type {
            MsgType::Proposal => (CODE_PROPOSAL, "Proposal"),
            MsgType::Prepare => (CODE_PREPARE, "Prepare"),
            MsgType::Commit => (CODE_COMMIT, "Commit"),
            MsgType::RoundChange => (CODE_ROUND_CHANGE, "RoundChange"),
            other => return Err(CodecError::UnsupportedType { msg_type: other }),
        };

        let height = require_height(msg)?.to_string();
        let round = u64::try_from(require_round(msg)?)
            .map_err(|_| CodecError::decode("round", "exceeds the IBFT wire range"))?;

        let block_hash = msg
            .block_hash
            .as_deref()
            .map(|h| format!("0x{}", normalize_hex(h)))
            .unwrap_or_default();

        let header = BesuWireMessage {
            code,
            height,
            round,
            block_hash,
            signature: match msg.msg_type {
                MsgType::Commit => msg
                    .extensions
                    .get("ibft_body_signature")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                _ => msg.signature.clone().unwrap_or_default(),
            },
        };

        let payload = if msg.msg_type == MsgType::Commit {
            let commit_seal = msg
                .signature
                .clone()
                .or_else(|| msg.commit_seals.first().cloned())
                .ok_or_else(|| CodecError::missing("signature"))?;
            serde_json::to_vec(&BesuCommitPayload { body: header, commit_seal })
        } else {
            serde_json::to_vec(&header)
        }
        .map_err(|e| CodecError::decode("payload", e))?;

        let mut metadata = BTreeMap::new();
        if let Some(identity) = msg.validator.as_deref().or(msg.proposer.as_deref()) {
            metadata.insert("validator".to_string(), identity.into());
        }
        for key in CARRIED_METADATA {
            if let Some(value) = msg.extensions.get(*key) {
                metadata.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(extra) = msg.extensions.get(EXTRA_DATA_KEY) {
            let record = EpochExtraData::from_extension(extra)?;
            metadata.insert(
                EXTRA_DATA_KEY.to_string(),
                ExtensionValue::Bytes(record.encode()?),
            );
        }

        Ok(RawConsensusMessage {
            chain_tag: ChainTag::Hyperledger,
            chain_id: self.chain_id.clone(),
            message_type: name.to_string(),
            payload,
            encoding: WireEncoding::Json,
            timestamp: msg.timestamp.or_else(|| Some(Utc::now())),
            metadata,
        })
    }
}

fn parse_header(payload: &[u8]) -> Result<BesuWireMessage, CodecError> {
    serde_json::from_slice(payload).map_err(|e| CodecError::decode("payload", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ChainAdapter;
    use num_bigint::BigUint;

    fn adapter() -> BesuIbftAdapter {
        BesuIbftAdapter::new("besu-chain")
    }

    fn raw(message_type: &str, payload: serde_json::Value) -> RawConsensusMessage {
        RawConsensusMessage {
            chain_tag: ChainTag::Hyperledger,
            chain_id: "besu-chain".into(),
            message_type: message_type.into(),
            payload: serde_json::to_vec(&payload).expect("fixture"),
            encoding: WireEncoding::Json,
            timestamp: Some(Utc::now()),
            metadata: BTreeMap::from([(
                "validator".to_string(),
                ExtensionValue::Text("0xabc1".into()),
            )]),
        }
    }

    #[test]
    fn test_prepare_roundtrip() {
        let fixture = serde_json::json!({
            "code": 1,
            "height": "120",
            "round": 2,
            "block_hash": "0xAB00CD00EF00AB00CD00EF00AB00CD00EF00AB00CD00EF00AB00CD00EF00AB00",
            "signature": "c2lnLTY1LWJ5dGVz"
        });
        let codec = adapter();
        let msg = codec.to_canonical(&raw("Prepare", fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::Prepare);
        assert_eq!(msg.height, Some(BigUint::from(120u64)));
        assert_eq!(msg.round, Some(BigUint::from(2u64)));
        assert_eq!(msg.validator.as_deref(), Some("0xabc1"));

        let encoded = codec.from_canonical(&msg).expect("encode");
        assert_eq!(encoded.message_type, "Prepare");
        let output: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
        assert_eq!(output["code"], serde_json::json!(1));
        assert_eq!(output["height"], serde_json::json!("120"));
        assert_eq!(output["round"], serde_json::json!(2));
        assert_eq!(output["signature"], serde_json::json!("c2lnLTY1LWJ5dGVz"));
        assert_eq!(
            output["block_hash"],
            serde_json::json!("0xab00cd00ef00ab00cd00ef00ab00cd00ef00ab00cd00ef00ab00cd00ef00ab00")
        );
    }

    #[test]
    fn test_commit_outer_record() {
        let fixture = serde_json::json!({
            "body": {
                "code": 2,
                "height": "9",
                "round": 0,
                "block_hash": "0x11",
                "signature": "Ym9keS1zaWc="
            },
            "commit_seal": "c2VhbC02NS1ieXRlcw=="
        });
        let codec = adapter();
        let msg = codec.to_canonical(&raw("Commit", fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::Commit);
        assert_eq!(msg.signature.as_deref(), Some("c2VhbC02NS1ieXRlcw=="));
        assert_eq!(msg.commit_seals, vec!["c2VhbC02NS1ieXRlcw==".to_string()]);
        assert_eq!(
            msg.extensions.get("ibft_body_signature").and_then(|v| v.as_str()),
            Some("Ym9keS1zaWc=")
        );

        let encoded = codec.from_canonical(&msg).expect("encode");
        let output: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
        assert_eq!(output["commit_seal"], serde_json::json!("c2VhbC02NS1ieXRlcw=="));
        assert_eq!(output["body"]["code"], serde_json::json!(2));
        assert_eq!(output["body"]["signature"], serde_json::json!("Ym9keS1zaWc="));
    }

    #[test]
    fn test_round_change_maps_symmetrically() {
        let fixture = serde_json::json!({
            "code": 3,
            "height": "50",
            "round": 4,
            "signature": "cmM="
        });
        let codec = adapter();
        let msg = codec.to_canonical(&raw("RoundChange", fixture)).expect("decode");
        assert_eq!(msg.msg_type, MsgType::RoundChange);
        let encoded = codec.from_canonical(&msg).expect("encode");
        assert_eq!(encoded.message_type, "RoundChange");
    }

    #[test]
    fn test_extra_data_roundtrip() {
        let record = EpochExtraData {
            validators: vec![vec![0xaa; 20], vec![0xbb; 20]],
            round: 1,
            seals: vec![vec![0xcc; 65]],
            ..Default::default()
        };
        let msg = CanonicalMessage::new("besu-chain", MsgType::Proposal)
            .with_height(10)
            .with_round(1)
            .with_extension(EXTRA_DATA_KEY, record.to_extension());

        let codec = adapter();
        let encoded = codec.from_canonical(&msg).expect("encode");
        let carried = encoded
            .metadata
            .get(EXTRA_DATA_KEY)
            .and_then(|v| v.as_bytes())
            .expect("extra data bytes");
        assert_eq!(EpochExtraData::decode(&carried).expect("decode"), record);

        let back = codec.to_canonical(&encoded).expect("to_canonical");
        assert_eq!(
            back.extensions.get(EXTRA_DATA_KEY),
            Some(&record.to_extension())
        );
    }

    #[test]
    fn test_vote_is_unsupported_on_encode() {
        let msg = CanonicalMessage::new("besu-chain", MsgType::Prevote)
            .with_height(1)
            .with_round(0);
        let err = adapter().from_canonical(&msg).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_proto_encoding_rejected() {
        let mut envelope = raw("Prepare", serde_json::json!({"code": 1, "height": "1", "round": 0}));
        envelope.encoding = WireEncoding::Proto;
        let err = adapter().to_canonical(&envelope).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ENCODING");
    }

    #[test]
    fn test_unknown_message_type() {
        let envelope = raw("Gossip", serde_json::json!({"code": 9, "height": "1", "round": 0}));
        let err = adapter().to_canonical(&envelope).unwrap_err();
        assert_eq!(err, CodecError::UnsupportedMessage);
    }
}
