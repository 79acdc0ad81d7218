//! CometBFT-style Tendermint adapter
//!
//! Wire payloads are the JSON field map used on the consensus channels
//! (heights and rounds as decimal strings, hashes hex, signatures base64).
//! The `proto` encoding tag is accepted as well: the proxy's wire bridge
//! lowers protobuf consensus envelopes into the same field map before
//! handing them to this adapter.
//!
//! Mapping table (fixed):
//! - `Proposal` -> Proposal
//! - `Vote` subtype 1 -> Prevote, subtype 2 -> Precommit, otherwise Vote
//! - `BlockPart` -> Block
//! - administrative messages (`NewRoundStep`, `NewValidBlock`, `HasVote`,
//!   `VoteSetMaj23`, `VoteSetBits`, `ProposalPOL`) -> Proposal with the
//!   native name preserved in `extensions["native_type"]`
//!
//! Extension keys that round-trip: `vote_type`, `validator_index`,
//! `extension`, `extension_signature`, `pol_round`, `part_set_header`,
//! `native_type` and the administrative per-type fields. Extension entries
//! foreign to this adapter are dropped on encode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::message::{CanonicalMessage, ChainTag, MsgType, RawConsensusMessage, WireEncoding};
use crate::value::ExtensionValue;

use super::{
    check_chain_tag, normalize_hex, normalize_identity, parse_decimal, require_height,
    require_round,
};

/// Native vote subtype carried in the wire `type` field.
pub const VOTE_SUBTYPE_PREVOTE: i32 = 1;
/// Native vote subtype for precommits.
pub const VOTE_SUBTYPE_PRECOMMIT: i32 = 2;

/// Engine version advertised in re-encoded payloads.
const DEFAULT_ENGINE_VERSION: &str = "0.38.17";

const ADMIN_MESSAGE_TYPES: &[&str] = &[
    "NewRoundStep",
    "NewValidBlock",
    "HasVote",
    "VoteSetMaj23",
    "VoteSetBits",
    "ProposalPOL",
];

/// Adapter for CometBFT consensus messages
#[derive(Debug, Clone)]
pub struct CometBftAdapter {
    chain_id: String,
}

impl CometBftAdapter {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self { chain_id: chain_id.into() }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

/// The CometBFT wire field map
///
/// Mirrors the consensus envelope contents; all fields optional so the same
/// struct covers proposals, votes, block parts and the administrative
/// messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CometBftWireMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_type: String,
    /// Vote subtype (1 = prevote, 2 = precommit).
    #[serde(rename = "type", default, skip_serializing_if = "is_zero_i32")]
    pub vote_type: i32,
    /// Decimal string, no leading zeros other than "0".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub height: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub round: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "WireBlockId::is_empty")]
    pub block_id: WireBlockId,

    // Proposal
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proposer_address: String,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub pol_round: i32,

    // Vote
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub validator_address: String,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub validator_index: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extension_signature: String,

    // NewRoundStep
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub step: u32,
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub last_commit_round: i32,
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub seconds_since_start_time: i64,

    // NewValidBlock
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_commit: bool,

    // BlockPart
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub part_index: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub part_bytes: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub part_proof: String,

    // VoteSetBits
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub votes_bit_array: Vec<String>,

    // ProposalPOL
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub proposal_pol_round: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposal_pol: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireBlockId {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_hash: String,
    #[serde(rename = "parts", alias = "part_set_header", default, skip_serializing_if = "WirePartSetHeader::is_empty")]
    pub parts: WirePartSetHeader,
}

impl WireBlockId {
    fn is_empty(&self) -> bool {
        self.hash.is_empty() && self.prev_hash.is_empty() && self.parts.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WirePartSetHeader {
    #[serde(default)]
    pub total: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl WirePartSetHeader {
    fn is_empty(&self) -> bool {
        self.total == 0 && self.hash.is_empty()
    }
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl super::ChainAdapter for CometBftAdapter {
    fn chain_tag(&self) -> ChainTag {
        ChainTag::CometBft
    }

    fn supported_types(&self) -> &'static [MsgType] {
        &[MsgType::Proposal, MsgType::Prevote, MsgType::Precommit, MsgType::Block]
    }

    fn to_canonical(&self, raw: &RawConsensusMessage) -> Result<CanonicalMessage, CodecError> {
        check_chain_tag(ChainTag::CometBft, raw)?;

        let wire: CometBftWireMessage = match raw.encoding {
            WireEncoding::Json | WireEncoding::Proto => serde_json::from_slice(&raw.payload)
                .map_err(|e| CodecError::decode("payload", e))?,
            other => {
                return Err(CodecError::UnsupportedEncoding {
                    encoding: other.to_string(),
                })
            }
        };

        let native = if wire.message_type.is_empty() {
            raw.message_type.as_str()
        } else {
            wire.message_type.as_str()
        };

        let mut msg = CanonicalMessage::new(self.chain_id.clone(), map_native_type(native, wire.vote_type)?);
        if !wire.height.is_empty() {
            msg.height = Some(parse_decimal("height", &wire.height)?);
        }
        if !wire.round.is_empty() {
            msg.round = Some(parse_decimal("round", &wire.round)?);
        }
        msg.timestamp = wire.timestamp;
        msg.raw_payload = Some(raw.payload.clone());

        match native {
            "Proposal" => {
                set_block_fields(&mut msg, &wire.block_id);
                if !wire.proposer_address.is_empty() {
                    msg.proposer = Some(normalize_identity(&wire.proposer_address));
                }
                if !wire.signature.is_empty() {
                    msg.signature = Some(wire.signature.clone());
                }
                if wire.pol_round != 0 {
                    msg.extensions.insert("pol_round".into(), wire.pol_round.into());
                }
                insert_part_set_header(&mut msg.extensions, &wire.block_id.parts);
            }
            "Vote" => {
                set_block_fields(&mut msg, &wire.block_id);
                if !wire.validator_address.is_empty() {
                    msg.validator = Some(normalize_identity(&wire.validator_address));
                }
                if !wire.signature.is_empty() {
                    msg.signature = Some(wire.signature.clone());
                }
                msg.extensions.insert("vote_type".into(), wire.vote_type.into());
                msg.extensions
                    .insert("validator_index".into(), wire.validator_index.into());
                if !wire.extension.is_empty() {
                    msg.extensions
                        .insert("extension".into(), wire.extension.clone().into());
                }
                if !wire.extension_signature.is_empty() {
                    msg.extensions.insert(
                        "extension_signature".into(),
                        wire.extension_signature.clone().into(),
                    );
                }
            }
            "BlockPart" => {
                set_block_fields(&mut msg, &wire.block_id);
                msg.extensions.insert("part_index".into(), wire.part_index.into());
                if !wire.part_bytes.is_empty() {
                    msg.extensions
                        .insert("part_bytes".into(), wire.part_bytes.clone().into());
                }
                if !wire.part_proof.is_empty() {
                    msg.extensions
                        .insert("part_proof".into(), wire.part_proof.clone().into());
                }
            }
            admin if ADMIN_MESSAGE_TYPES.contains(&admin) => {
                msg.extensions.insert("native_type".into(), admin.into());
                set_block_fields(&mut msg, &wire.block_id);
                match admin {
                    "NewRoundStep" => {
                        msg.extensions.insert("step".into(), wire.step.into());
                        msg.extensions
                            .insert("last_commit_round".into(), wire.last_commit_round.into());
                        msg.extensions.insert(
                            "seconds_since_start_time".into(),
                            wire.seconds_since_start_time.into(),
                        );
                    }
                    "NewValidBlock" => {
                        msg.extensions.insert("is_commit".into(), wire.is_commit.into());
                        insert_part_set_header(&mut msg.extensions, &wire.block_id.parts);
                    }
                    "HasVote" => {
                        msg.extensions.insert("vote_type".into(), wire.vote_type.into());
                        msg.extensions
                            .insert("validator_index".into(), wire.validator_index.into());
                    }
                    "VoteSetMaj23" => {
                        msg.extensions.insert("vote_type".into(), wire.vote_type.into());
                    }
                    "VoteSetBits" => {
                        msg.extensions.insert("vote_type".into(), wire.vote_type.into());
                        msg.extensions.insert(
                            "votes_bit_array".into(),
                            ExtensionValue::List(
                                wire.votes_bit_array.iter().cloned().map(Into::into).collect(),
                            ),
                        );
                    }
                    "ProposalPOL" => {
                        msg.extensions
                            .insert("proposal_pol_round".into(), wire.proposal_pol_round.into());
                        msg.extensions.insert(
                            "proposal_pol".into(),
                            ExtensionValue::List(
                                wire.proposal_pol.iter().cloned().map(Into::into).collect(),
                            ),
                        );
                    }
                    _ => unreachable!("admin list is closed"),
                }
            }
            _ => return Err(CodecError::UnsupportedMessage),
        }

        Ok(msg)
    }

    fn from_canonical(&self, msg: &CanonicalMessage) -> Result<RawConsensusMessage, CodecError> {
        if !self.supported_types().contains(&msg.msg_type) {
            return Err(CodecError::UnsupportedType { msg_type: msg.msg_type });
        }

        let mut wire = CometBftWireMessage {
            version: DEFAULT_ENGINE_VERSION.to_string(),
            ..Default::default()
        };
        wire.height = require_height(msg)?.to_string();
        wire.round = require_round(msg)?.to_string();
        // Re-set to the encoder clock only when the canonical timestamp is absent.
        wire.timestamp = Some(msg.timestamp.unwrap_or_else(Utc::now));

        match msg.msg_type {
            MsgType::Proposal => {
                if let Some(native) = msg.extensions.get("native_type").and_then(|v| v.as_str()) {
                    encode_admin_message(&mut wire, native, msg)?;
                } else {
                    wire.message_type = "Proposal".into();
                    wire.block_id = block_id_from(msg);
                    wire.proposer_address = msg.proposer.clone().unwrap_or_default();
                    wire.signature = msg.signature.clone().unwrap_or_default();
                    if let Some(pol) = msg.extensions.get("pol_round").and_then(|v| v.as_i64()) {
                        wire.pol_round = pol as i32;
                    }
                }
            }
            MsgType::Prevote | MsgType::Precommit => {
                wire.message_type = "Vote".into();
                wire.vote_type = if msg.msg_type == MsgType::Prevote {
                    VOTE_SUBTYPE_PREVOTE
                } else {
                    VOTE_SUBTYPE_PRECOMMIT
                };
                wire.block_id = block_id_from(msg);
                wire.validator_address = msg.validator.clone().unwrap_or_default();
                wire.validator_index = msg
                    .extensions
                    .get("validator_index")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0) as i32;
                wire.signature = msg.signature.clone().unwrap_or_default();
                if let Some(ext) = msg.extensions.get("extension").and_then(|v| v.as_str()) {
                    wire.extension = ext.to_string();
                }
                if let Some(sig) = msg
                    .extensions
                    .get("extension_signature")
                    .and_then(|v| v.as_str())
                {
                    wire.extension_signature = sig.to_string();
                }
            }
            MsgType::Block => {
                wire.message_type = "BlockPart".into();
                wire.block_id = block_id_from(msg);
                if let Some(index) = msg.extensions.get("part_index").and_then(|v| v.as_i64()) {
                    wire.part_index = index as u32;
                }
                if let Some(bytes) = msg.extensions.get("part_bytes").and_then(|v| v.as_str()) {
                    wire.part_bytes = bytes.to_string();
                }
                if let Some(proof) = msg.extensions.get("part_proof").and_then(|v| v.as_str()) {
                    wire.part_proof = proof.to_string();
                }
            }
            other => return Err(CodecError::UnsupportedType { msg_type: other }),
        }

        let message_type = wire.message_type.clone();
        let payload = serde_json::to_vec(&wire).map_err(|e| CodecError::decode("payload", e))?;

        Ok(RawConsensusMessage {
            chain_tag: ChainTag::CometBft,
            chain_id: self.chain_id.clone(),
            message_type,
            payload,
            encoding: WireEncoding::Json,
            timestamp: Some(Utc::now()),
            metadata: BTreeMap::from([(
                "version".to_string(),
                ExtensionValue::Text(DEFAULT_ENGINE_VERSION.into()),
            )]),
        })
    }
}

fn map_native_type(native: &str, vote_subtype: i32) -> Result<MsgType, CodecError> {
    match native {
        "Proposal" => Ok(MsgType::Proposal),
        "Vote" => Ok(match vote_subtype {
            VOTE_SUBTYPE_PREVOTE => MsgType::Prevote,
            VOTE_SUBTYPE_PRECOMMIT => MsgType::Precommit,
            _ => MsgType::Vote,
        }),
        "BlockPart" => Ok(MsgType::Block),
        admin if ADMIN_MESSAGE_TYPES.contains(&admin) => Ok(MsgType::Proposal),
        _ => Err(CodecError::UnsupportedMessage),
    }
}

fn set_block_fields(msg: &mut CanonicalMessage, block_id: &WireBlockId) {
    if !block_id.hash.is_empty() {
        msg.block_hash = Some(normalize_hex(&block_id.hash));
    }
    if !block_id.prev_hash.is_empty() {
        msg.prev_hash = Some(normalize_hex(&block_id.prev_hash));
    }
}

fn insert_part_set_header(
    extensions: &mut BTreeMap<String, ExtensionValue>,
    parts: &WirePartSetHeader,
) {
    if parts.is_empty() {
        return;
    }
    let mut entry = BTreeMap::new();
    entry.insert("total".to_string(), ExtensionValue::Int(parts.total as i64));
    entry.insert("hash".to_string(), ExtensionValue::Text(parts.hash.clone()));
    extensions.insert("part_set_header".into(), ExtensionValue::Map(entry));
}

fn block_id_from(msg: &CanonicalMessage) -> WireBlockId {
    let hash = msg.block_hash.clone().unwrap_or_default();
    let parts = match msg.extensions.get("part_set_header").and_then(|v| v.as_map()) {
        Some(map) => WirePartSetHeader {
            total: map.get("total").and_then(|v| v.as_i64()).unwrap_or(0) as u32,
            hash: map
                .get("hash")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        },
        None if !hash.is_empty() => WirePartSetHeader { total: 1, hash: hash.clone() },
        None => WirePartSetHeader::default(),
    };
    WireBlockId {
        hash,
        prev_hash: msg.prev_hash.clone().unwrap_or_default(),
        parts,
    }
}

fn encode_admin_message(
    wire: &mut CometBftWireMessage,
    native: &str,
    msg: &CanonicalMessage,
) -> Result<(), CodecError> {
    if !ADMIN_MESSAGE_TYPES.contains(&native) {
        return Err(CodecError::decode(
            "native_type",
            format!("unknown administrative message {native:?}"),
        ));
    }
    wire.message_type = native.to_string();
    wire.block_id = block_id_from(msg);
    let ext = |key: &str| msg.extensions.get(key);
    match native {
        "NewRoundStep" => {
            wire.step = ext("step").and_then(|v| v.as_i64()).unwrap_or(0) as u32;
            wire.last_commit_round =
                ext("last_commit_round").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            wire.seconds_since_start_time = ext("seconds_since_start_time")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
        }
        "NewValidBlock" => {
            wire.is_commit = ext("is_commit").and_then(|v| v.as_bool()).unwrap_or(false);
        }
        "HasVote" => {
            wire.vote_type = ext("vote_type").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            wire.validator_index =
                ext("validator_index").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        }
        "VoteSetMaj23" => {
            wire.vote_type = ext("vote_type").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
        }
        "VoteSetBits" => {
            wire.vote_type = ext("vote_type").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            if let Some(bits) = ext("votes_bit_array").and_then(|v| v.as_list()) {
                wire.votes_bit_array = bits
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
        }
        "ProposalPOL" => {
            wire.proposal_pol_round =
                ext("proposal_pol_round").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            if let Some(pol) = ext("proposal_pol").and_then(|v| v.as_list()) {
                wire.proposal_pol = pol
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
        }
        _ => unreachable!("admin list is closed"),
    }
    Ok(())
}
