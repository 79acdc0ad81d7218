//! Canonical consensus message model
//!
//! The normalized envelope every chain adapter decodes into and encodes
//! from. All fields are owned; cloning a message is a deep clone. Heights,
//! rounds and views are arbitrary-precision non-negative integers and
//! serialize as decimal strings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::value::ExtensionValue;

/// Supported blockchain platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainTag {
    CometBft,
    Hyperledger,
    Kaia,
}

impl fmt::Display for ChainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainTag::CometBft => "cometbft",
            ChainTag::Hyperledger => "hyperledger",
            ChainTag::Kaia => "kaia",
        };
        f.write_str(name)
    }
}

impl FromStr for ChainTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cometbft" => Ok(ChainTag::CometBft),
            "hyperledger" => Ok(ChainTag::Hyperledger),
            "kaia" => Ok(ChainTag::Kaia),
            other => Err(format!("unknown chain tag: {other}")),
        }
    }
}

/// Consensus message types across the supported chains
///
/// Only a subset is valid for any given chain; adapters declare theirs via
/// [`crate::adapters::ChainAdapter::supported_types`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    Proposal,
    Prevote,
    Precommit,
    Vote,
    Prepare,
    Commit,
    ViewChange,
    NewView,
    Block,
    RoundChange,
}

impl MsgType {
    /// True for the vote family: generic votes, prevotes and precommits.
    pub fn is_vote(&self) -> bool {
        matches!(self, MsgType::Vote | MsgType::Prevote | MsgType::Precommit)
    }

    /// True for proposals.
    pub fn is_proposal(&self) -> bool {
        matches!(self, MsgType::Proposal)
    }

    /// Wire name used in logs, triggers and serialized forms.
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Proposal => "proposal",
            MsgType::Prevote => "prevote",
            MsgType::Precommit => "precommit",
            MsgType::Vote => "vote",
            MsgType::Prepare => "prepare",
            MsgType::Commit => "commit",
            MsgType::ViewChange => "view_change",
            MsgType::NewView => "new_view",
            MsgType::Block => "block",
            MsgType::RoundChange => "round_change",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MsgType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "proposal" => Ok(MsgType::Proposal),
            "prevote" => Ok(MsgType::Prevote),
            "precommit" => Ok(MsgType::Precommit),
            "vote" => Ok(MsgType::Vote),
            "prepare" => Ok(MsgType::Prepare),
            "commit" => Ok(MsgType::Commit),
            "view_change" => Ok(MsgType::ViewChange),
            "new_view" => Ok(MsgType::NewView),
            "block" => Ok(MsgType::Block),
            "round_change" => Ok(MsgType::RoundChange),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// Declared payload encodings. The closed set an adapter may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireEncoding {
    Json,
    Proto,
    Rlp,
}

impl fmt::Display for WireEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WireEncoding::Json => "json",
            WireEncoding::Proto => "proto",
            WireEncoding::Rlp => "rlp",
        };
        f.write_str(name)
    }
}

impl FromStr for WireEncoding {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireEncoding::Json),
            "proto" => Ok(WireEncoding::Proto),
            "rlp" => Ok(WireEncoding::Rlp),
            other => Err(format!("unknown encoding: {other}")),
        }
    }
}

/// A view change entry in PBFT-style protocols
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewChangeEntry {
    #[serde(with = "biguint_dec")]
    pub view: BigUint,
    #[serde(with = "biguint_dec")]
    pub height: BigUint,
    pub validator: String,
    pub signature: String,
}

/// The normalized consensus message format
///
/// `raw_payload` retains the original wire bytes for forensic comparison and
/// is excluded from semantic identity (see [`CanonicalMessage::semantically_eq`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub chain_id: String,
    #[serde(rename = "type")]
    pub msg_type: MsgType,

    #[serde(default, with = "biguint_dec_opt", skip_serializing_if = "Option::is_none")]
    pub height: Option<BigUint>,
    #[serde(default, with = "biguint_dec_opt", skip_serializing_if = "Option::is_none")]
    pub round: Option<BigUint>,
    #[serde(default, with = "biguint_dec_opt", skip_serializing_if = "Option::is_none")]
    pub view: Option<BigUint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_seals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub view_changes: Vec<ViewChangeEntry>,

    /// Chain-specific fields carried losslessly across conversions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, ExtensionValue>,

    /// Original wire bytes; not part of semantic identity.
    #[serde(skip)]
    pub raw_payload: Option<Vec<u8>>,
}

impl CanonicalMessage {
    /// Create an empty canonical message of the given chain and type.
    pub fn new(chain_id: impl Into<String>, msg_type: MsgType) -> Self {
        Self {
            chain_id: chain_id.into(),
            msg_type,
            height: None,
            round: None,
            view: None,
            timestamp: None,
            block_hash: None,
            prev_hash: None,
            proposer: None,
            validator: None,
            signature: None,
            commit_seals: Vec::new(),
            view_changes: Vec::new(),
            extensions: BTreeMap::new(),
            raw_payload: None,
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = Some(BigUint::from(height));
        self
    }

    pub fn with_round(mut self, round: u64) -> Self {
        self.round = Some(BigUint::from(round));
        self
    }

    pub fn with_view(mut self, view: u64) -> Self {
        self.view = Some(BigUint::from(view));
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_block_hash(mut self, hash: impl Into<String>) -> Self {
        self.block_hash = Some(hash.into());
        self
    }

    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = Some(validator.into());
        self
    }

    pub fn with_proposer(mut self, proposer: impl Into<String>) -> Self {
        self.proposer = Some(proposer.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<ExtensionValue>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn is_vote(&self) -> bool {
        self.msg_type.is_vote()
    }

    pub fn is_proposal(&self) -> bool {
        self.msg_type.is_proposal()
    }

    /// Height rendered as its decimal string, `"0"` when absent. Log helper.
    pub fn height_dec(&self) -> String {
        self.height
            .as_ref()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "0".to_string())
    }

    /// Round rendered as its decimal string, `"0"` when absent. Log helper.
    pub fn round_dec(&self) -> String {
        self.round
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "0".to_string())
    }

    /// Structural equality over semantic fields.
    ///
    /// `raw_payload` is ignored. Extension maps compare by key/value;
    /// `BTreeMap` makes key order canonical by construction.
    pub fn semantically_eq(&self, other: &CanonicalMessage) -> bool {
        self.chain_id == other.chain_id
            && self.msg_type == other.msg_type
            && self.height == other.height
            && self.round == other.round
            && self.view == other.view
            && self.timestamp == other.timestamp
            && self.block_hash == other.block_hash
            && self.prev_hash == other.prev_hash
            && self.proposer == other.proposer
            && self.validator == other.validator
            && self.signature == other.signature
            && self.commit_seals == other.commit_seals
            && self.view_changes == other.view_changes
            && self.extensions == other.extensions
    }
}

/// A chain-tagged wire envelope. The payload is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawConsensusMessage {
    pub chain_tag: ChainTag,
    pub chain_id: String,
    /// Original message type name in the chain's own vocabulary.
    pub message_type: String,
    #[serde(with = "payload_b64")]
    pub payload: Vec<u8>,
    pub encoding: WireEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, ExtensionValue>,
}

/// Decimal-string serde for `BigUint`
pub mod biguint_dec {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BigUint::from_str(&raw).map_err(|e| D::Error::custom(format!("invalid decimal: {e}")))
    }
}

/// Decimal-string serde for `Option<BigUint>`
pub mod biguint_dec_opt {
    use num_bigint::BigUint;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => BigUint::from_str(&s)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid decimal: {e}"))),
        }
    }
}

/// Base64 serde for raw payload bytes
mod payload_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD
            .decode(raw.as_bytes())
            .map_err(|e| D::Error::custom(format!("invalid base64: {e}")))
    }
}
