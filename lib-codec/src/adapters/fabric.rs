//! Hyperledger Fabric PBFT-style adapter
//!
//! Carries view numbers and view-change certificates alongside the usual
//! header fields. Wire signatures are `0x`-prefixed hex and pass through
//! verbatim; this adapter does not re-encode them to base64.
//!
//! Extension keys that round-trip: `channel_id`, `tx_count`,
//! `endorser_count`, `chaincode_id`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::{
    CanonicalMessage, ChainTag, MsgType, RawConsensusMessage, ViewChangeEntry, WireEncoding,
};

use super::{check_chain_tag, normalize_hex, parse_decimal, require_height};

/// Adapter for Fabric consensus messages
#[derive(Debug, Clone)]
pub struct FabricPbftAdapter {
    chain_id: String,
}

impl FabricPbftAdapter {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self { chain_id: chain_id.into() }
    }
}

/// The Fabric wire field map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricWireMessage {
    /// Decimal string.
    pub block_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub view_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub block_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proposer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endorser: String,
    /// `0x`-prefixed hex, passed through verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub tx_count: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub endorser_count: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chaincode_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub view_changes: Vec<FabricViewChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricViewChange {
    pub view: String,
    pub height: String,
    pub validator: String,
    pub signature: String,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl super::ChainAdapter for FabricPbftAdapter {
    fn chain_tag(&self) -> ChainTag {
        ChainTag::Hyperledger
    }

    fn supported_types(&self) -> &'static [MsgType] {
        &[
            MsgType::Proposal,
            MsgType::Prepare,
            MsgType::Commit,
            MsgType::ViewChange,
            MsgType::NewView,
        ]
    }

    fn to_canonical(&self, raw: &RawConsensusMessage) -> Result<CanonicalMessage, CodecError> {
        check_chain_tag(ChainTag::Hyperledger, raw)?;
        if raw.encoding == WireEncoding::Rlp {
            return Err(CodecError::UnsupportedEncoding {
                encoding: raw.encoding.to_string(),
            });
        }

        let wire: FabricWireMessage = serde_json::from_slice(&raw.payload)
            .map_err(|e| CodecError::decode("payload", e))?;

        let native = if wire.msg_type.is_empty() {
            raw.message_type.as_str()
        } else {
            wire.msg_type.as_str()
        };
        let msg_type = match native {
            "PROPOSAL" => MsgType::Proposal,
            "PREPARE" => MsgType::Prepare,
            "COMMIT" => MsgType::Commit,
            "VIEW_CHANGE" => MsgType::ViewChange,
            "NEW_VIEW" => MsgType::NewView,
            _ => return Err(CodecError::UnsupportedMessage),
        };

        let mut msg = CanonicalMessage::new(self.chain_id.clone(), msg_type);
        msg.height = Some(parse_decimal("block_number", &wire.block_number)?);
        if !wire.view_number.is_empty() {
            msg.view = Some(parse_decimal("view_number", &wire.view_number)?);
        }
        msg.timestamp = wire.timestamp.or(raw.timestamp);
        msg.raw_payload = Some(raw.payload.clone());

        if !wire.block_hash.is_empty() {
            msg.block_hash = Some(normalize_hex(&wire.block_hash));
        }
        if !wire.prev_hash.is_empty() {
            msg.prev_hash = Some(normalize_hex(&wire.prev_hash));
        }
        if !wire.proposer.is_empty() {
            msg.proposer = Some(wire.proposer.clone());
        }
        if !wire.endorser.is_empty() {
            msg.validator = Some(wire.endorser.clone());
        }
        if !wire.signature.is_empty() {
            msg.signature = Some(wire.signature.clone());
        }

        for entry in &wire.view_changes {
            let view = parse_decimal("view_changes.view", &entry.view)?;
            if let Some(outer) = &msg.view {
                if view < *outer {
                    return Err(CodecError::ConstraintViolation {
                        field: "view_changes".into(),
                        rule: format!("entry view {view} below outer view {outer}"),
                    });
                }
            }
            msg.view_changes.push(ViewChangeEntry {
                view,
                height: parse_decimal("view_changes.height", &entry.height)?,
                validator: entry.validator.clone(),
                signature: entry.signature.clone(),
            });
        }

        if !wire.channel_id.is_empty() {
            msg.extensions.insert("channel_id".into(), wire.channel_id.clone().into());
        }
        if wire.tx_count != 0 {
            msg.extensions.insert("tx_count".into(), wire.tx_count.into());
        }
        if wire.endorser_count != 0 {
            msg.extensions
                .insert("endorser_count".into(), wire.endorser_count.into());
        }
        if !wire.chaincode_id.is_empty() {
            msg.extensions
                .insert("chaincode_id".into(), wire.chaincode_id.clone().into());
        }

        Ok(msg)
    }

    fn from_canonical(&self, msg: &CanonicalMessage) -> Result<RawConsensusMessage, CodecError> {
        let native = match msg.msg_type {
            MsgType::Proposal => "PROPOSAL",
            MsgType::Prepare => "PREPARE",
            MsgType::Commit => "COMMIT",
            MsgType::ViewChange => "VIEW_CHANGE",
            MsgType::NewView => "NEW_VIEW",
            other => return Err(CodecError::UnsupportedType { msg_type: other }),
        };

        let ext_str = |key: &str| {
            msg.extensions
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let ext_u32 =
            |key: &str| msg.extensions.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        let wire = FabricWireMessage {
            block_number: require_height(msg)?.to_string(),
            view_number: msg.view.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            timestamp: Some(msg.timestamp.unwrap_or_else(Utc::now)),
            msg_type: native.to_string(),
            block_hash: msg.block_hash.clone().unwrap_or_default(),
            prev_hash: msg.prev_hash.clone().unwrap_or_default(),
            proposer: msg.proposer.clone().unwrap_or_default(),
            endorser: msg.validator.clone().unwrap_or_default(),
            signature: msg.signature.clone().unwrap_or_default(),
            channel_id: ext_str("channel_id"),
            tx_count: ext_u32("tx_count"),
            endorser_count: ext_u32("endorser_count"),
            chaincode_id: ext_str("chaincode_id"),
            view_changes: msg
                .view_changes
                .iter()
                .map(|entry| FabricViewChange {
                    view: entry.view.to_string(),
                    height: entry.height.to_string(),
                    validator: entry.validator.clone(),
                    signature: entry.signature.clone(),
                })
                .collect(),
        };

        let payload = serde_json::to_vec(&wire).map_err(|e| CodecError::decode("payload", e))?;

        Ok(RawConsensusMessage {
            chain_tag: ChainTag::Hyperledger,
            chain_id: self.chain_id.clone(),
            message_type: native.to_string(),
            payload,
            encoding: WireEncoding::Json,
            timestamp: Some(Utc::now()),
            metadata: BTreeMap::new(),
        })
    }
}
