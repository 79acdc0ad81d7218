//! Consensus channel wire bridge
//!
//! The consensus channels carry protobuf envelopes. This module owns the
//! channel map, the hand-written protobuf mirror of the consensus envelope
//! and the lowering into the adapter's JSON field map. Only proposal and
//! vote payloads translate; the remaining envelope variants decode (their
//! contents are skipped) and are classified unsupported so the session
//! forwards them raw.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use prost::Message as _;

use lib_codec::adapters::cometbft::{CometBftWireMessage, WireBlockId, WirePartSetHeader};
use lib_codec::{CodecError, ChainTag, RawConsensusMessage, WireEncoding};

use crate::transport::ChannelDescriptor;

/// Consensus channel ids (Tendermint profile).
pub const STATE_CHANNEL_ID: u8 = 0x20;
pub const DATA_CHANNEL_ID: u8 = 0x21;
pub const VOTE_CHANNEL_ID: u8 = 0x22;
pub const VOTE_SET_BITS_CHANNEL_ID: u8 = 0x23;

/// Known non-consensus channels, forwarded byte-for-byte.
pub const MEMPOOL_CHANNEL_ID: u8 = 0x30;
pub const EVIDENCE_CHANNEL_ID: u8 = 0x38;

/// Native proposal subtype in the signed message type enum.
const SIGNED_MSG_TYPE_PROPOSAL: i32 = 32;

pub fn is_consensus_channel(channel_id: u8) -> bool {
    matches!(
        channel_id,
        STATE_CHANNEL_ID | DATA_CHANNEL_ID | VOTE_CHANNEL_ID | VOTE_SET_BITS_CHANNEL_ID
    )
}

/// The default multiplexed channel set for the Tendermint profile.
pub fn default_descriptors() -> Vec<ChannelDescriptor> {
    vec![
        ChannelDescriptor::new(STATE_CHANNEL_ID, 6, 100, 1 << 20),
        ChannelDescriptor::new(DATA_CHANNEL_ID, 10, 100, 1 << 20),
        ChannelDescriptor::new(VOTE_CHANNEL_ID, 7, 100, 1 << 20),
        ChannelDescriptor::new(VOTE_SET_BITS_CHANNEL_ID, 1, 10, 1 << 20),
        ChannelDescriptor::new(MEMPOOL_CHANNEL_ID, 5, 128, 1 << 21),
        ChannelDescriptor::new(EVIDENCE_CHANNEL_ID, 4, 32, 1 << 20),
    ]
}

// --- protobuf mirror of the consensus envelope ---

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoPartSetHeader {
    #[prost(uint32, tag = "1")]
    pub total: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoBlockId {
    #[prost(bytes = "vec", tag = "1")]
    pub hash: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub part_set_header: Option<ProtoPartSetHeader>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoProposal {
    #[prost(int32, tag = "1")]
    pub msg_type: i32,
    #[prost(int64, tag = "2")]
    pub height: i64,
    #[prost(int32, tag = "3")]
    pub round: i32,
    #[prost(int32, tag = "4")]
    pub pol_round: i32,
    #[prost(message, optional, tag = "5")]
    pub block_id: Option<ProtoBlockId>,
    #[prost(message, optional, tag = "6")]
    pub timestamp: Option<ProtoTimestamp>,
    #[prost(bytes = "vec", tag = "7")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoVote {
    #[prost(int32, tag = "1")]
    pub msg_type: i32,
    #[prost(int64, tag = "2")]
    pub height: i64,
    #[prost(int32, tag = "3")]
    pub round: i32,
    #[prost(message, optional, tag = "4")]
    pub block_id: Option<ProtoBlockId>,
    #[prost(message, optional, tag = "5")]
    pub timestamp: Option<ProtoTimestamp>,
    #[prost(bytes = "vec", tag = "6")]
    pub validator_address: Vec<u8>,
    #[prost(int32, tag = "7")]
    pub validator_index: i32,
    #[prost(bytes = "vec", tag = "8")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub extension: Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub extension_signature: Vec<u8>,
}

/// Wrapper carried in the envelope's `proposal` variant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposalEnvelope {
    #[prost(message, optional, tag = "1")]
    pub proposal: Option<ProtoProposal>,
}

/// Wrapper carried in the envelope's `vote` variant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteEnvelope {
    #[prost(message, optional, tag = "1")]
    pub vote: Option<ProtoVote>,
}

// Recognised but untranslated variants. Their fields are skipped on decode;
// the session forwards the original bytes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewRoundStep {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewValidBlock {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProposalPol {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockPart {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HasVote {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteSetMaj23 {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VoteSetBits {}

/// The multiplexed consensus envelope.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusEnvelope {
    #[prost(oneof = "consensus_sum::Sum", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9")]
    pub sum: Option<consensus_sum::Sum>,
}

pub mod consensus_sum {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Sum {
        #[prost(message, tag = "1")]
        NewRoundStep(super::NewRoundStep),
        #[prost(message, tag = "2")]
        NewValidBlock(super::NewValidBlock),
        #[prost(message, tag = "3")]
        Proposal(super::ProposalEnvelope),
        #[prost(message, tag = "4")]
        ProposalPol(super::ProposalPol),
        #[prost(message, tag = "5")]
        BlockPart(super::BlockPart),
        #[prost(message, tag = "6")]
        Vote(super::VoteEnvelope),
        #[prost(message, tag = "7")]
        HasVote(super::HasVote),
        #[prost(message, tag = "8")]
        VoteSetMaj23(super::VoteSetMaj23),
        #[prost(message, tag = "9")]
        VoteSetBits(super::VoteSetBits),
    }
}

/// Decode a consensus channel frame.
pub fn decode_envelope(payload: &[u8]) -> Result<ConsensusEnvelope, CodecError> {
    ConsensusEnvelope::decode(payload)
        .map_err(|e| CodecError::DecodeFailure { field: "envelope".into(), reason: e.to_string() })
}

/// Lower a decoded envelope into the adapter's chain-tagged field map.
///
/// Untranslated envelope variants yield `UnsupportedMessage`.
pub fn envelope_to_raw(
    envelope: &ConsensusEnvelope,
    chain_id: &str,
) -> Result<RawConsensusMessage, CodecError> {
    let (wire, message_type) = match &envelope.sum {
        Some(consensus_sum::Sum::Proposal(wrapper)) => {
            let proposal = wrapper
                .proposal
                .as_ref()
                .ok_or_else(|| CodecError::DecodeFailure {
                    field: "proposal".into(),
                    reason: "empty proposal payload".into(),
                })?;
            (proposal_to_wire(proposal), "Proposal")
        }
        Some(consensus_sum::Sum::Vote(wrapper)) => {
            let vote = wrapper.vote.as_ref().ok_or_else(|| CodecError::DecodeFailure {
                field: "vote".into(),
                reason: "empty vote payload".into(),
            })?;
            (vote_to_wire(vote), "Vote")
        }
        _ => return Err(CodecError::UnsupportedMessage),
    };

    let timestamp = wire.timestamp;
    let payload = serde_json::to_vec(&wire)
        .map_err(|e| CodecError::DecodeFailure { field: "payload".into(), reason: e.to_string() })?;

    Ok(RawConsensusMessage {
        chain_tag: ChainTag::CometBft,
        chain_id: chain_id.to_string(),
        message_type: message_type.to_string(),
        payload,
        encoding: WireEncoding::Proto,
        timestamp,
        metadata: Default::default(),
    })
}

/// Raise an adapter field map back into consensus envelope bytes.
pub fn raw_to_frame(raw: &RawConsensusMessage) -> Result<Vec<u8>, CodecError> {
    let wire: CometBftWireMessage = serde_json::from_slice(&raw.payload)
        .map_err(|e| CodecError::DecodeFailure { field: "payload".into(), reason: e.to_string() })?;

    let sum = match wire.message_type.to_ascii_lowercase().as_str() {
        "proposal" => {
            let proposal = ProtoProposal {
                msg_type: SIGNED_MSG_TYPE_PROPOSAL,
                height: parse_wire_int(&wire.height, "height")?,
                round: parse_wire_int(&wire.round, "round")? as i32,
                pol_round: wire.pol_round,
                block_id: Some(block_id_to_proto(&wire.block_id)),
                timestamp: Some(timestamp_to_proto(wire.timestamp)),
                signature: opaque_to_bytes(&wire.signature),
            };
            consensus_sum::Sum::Proposal(ProposalEnvelope { proposal: Some(proposal) })
        }
        "vote" => {
            let vote = ProtoVote {
                msg_type: wire.vote_type,
                height: parse_wire_int(&wire.height, "height")?,
                round: parse_wire_int(&wire.round, "round")? as i32,
                block_id: Some(block_id_to_proto(&wire.block_id)),
                timestamp: Some(timestamp_to_proto(wire.timestamp)),
                validator_address: hex_to_bytes(&wire.validator_address),
                validator_index: wire.validator_index,
                signature: opaque_to_bytes(&wire.signature),
                extension: opaque_to_bytes(&wire.extension),
                extension_signature: opaque_to_bytes(&wire.extension_signature),
            };
            consensus_sum::Sum::Vote(VoteEnvelope { vote: Some(vote) })
        }
        _ => return Err(CodecError::UnsupportedMessage),
    };

    Ok(ConsensusEnvelope { sum: Some(sum) }.encode_to_vec())
}

fn proposal_to_wire(proposal: &ProtoProposal) -> CometBftWireMessage {
    CometBftWireMessage {
        message_type: "Proposal".into(),
        height: proposal.height.to_string(),
        round: proposal.round.to_string(),
        pol_round: proposal.pol_round,
        timestamp: proposal.timestamp.as_ref().and_then(proto_to_timestamp),
        block_id: proposal.block_id.as_ref().map(proto_to_block_id).unwrap_or_default(),
        signature: STANDARD.encode(&proposal.signature),
        ..Default::default()
    }
}

fn vote_to_wire(vote: &ProtoVote) -> CometBftWireMessage {
    CometBftWireMessage {
        message_type: "Vote".into(),
        vote_type: vote.msg_type,
        height: vote.height.to_string(),
        round: vote.round.to_string(),
        timestamp: vote.timestamp.as_ref().and_then(proto_to_timestamp),
        block_id: vote.block_id.as_ref().map(proto_to_block_id).unwrap_or_default(),
        validator_address: hex::encode(&vote.validator_address),
        validator_index: vote.validator_index,
        signature: STANDARD.encode(&vote.signature),
        extension: encode_optional_bytes(&vote.extension),
        extension_signature: encode_optional_bytes(&vote.extension_signature),
        ..Default::default()
    }
}

fn proto_to_block_id(block_id: &ProtoBlockId) -> WireBlockId {
    WireBlockId {
        hash: hex::encode(&block_id.hash),
        prev_hash: String::new(),
        parts: block_id
            .part_set_header
            .as_ref()
            .map(|parts| WirePartSetHeader {
                total: parts.total,
                hash: hex::encode(&parts.hash),
            })
            .unwrap_or_default(),
    }
}

fn block_id_to_proto(block_id: &WireBlockId) -> ProtoBlockId {
    ProtoBlockId {
        hash: hex_to_bytes(&block_id.hash),
        // Part hashes travel as hex in the field map (see proto_to_block_id).
        part_set_header: Some(ProtoPartSetHeader {
            total: block_id.parts.total,
            hash: hex_to_bytes(&block_id.parts.hash),
        }),
    }
}

fn proto_to_timestamp(ts: &ProtoTimestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32).single()
}

/// Absent timestamps re-set to the encoder clock, mirroring the adapter rule.
fn timestamp_to_proto(ts: Option<DateTime<Utc>>) -> ProtoTimestamp {
    let ts = ts.unwrap_or_else(Utc::now);
    ProtoTimestamp {
        seconds: ts.timestamp(),
        nanos: ts.timestamp_subsec_nanos().min(999_999_999) as i32,
    }
}

fn parse_wire_int(value: &str, field: &str) -> Result<i64, CodecError> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse::<i64>().map_err(|e| CodecError::DecodeFailure {
        field: field.into(),
        reason: format!("{value:?} does not fit the wire envelope: {e}"),
    })
}

/// Hex (optionally `0x`-prefixed) or raw bytes.
fn hex_to_bytes(value: &str) -> Vec<u8> {
    if value.is_empty() {
        return Vec::new();
    }
    hex::decode(value.trim_start_matches("0x")).unwrap_or_else(|_| value.as_bytes().to_vec())
}

/// Base64, then hex, then raw bytes. Signatures arrive base64; addresses hex.
fn opaque_to_bytes(value: &str) -> Vec<u8> {
    if value.is_empty() {
        return Vec::new();
    }
    STANDARD
        .decode(value.as_bytes())
        .unwrap_or_else(|_| hex_to_bytes(value))
}

fn encode_optional_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        String::new()
    } else {
        STANDARD.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vote() -> ProtoVote {
        ProtoVote {
            msg_type: 1,
            height: 1000,
            round: 2,
            block_id: Some(ProtoBlockId {
                hash: vec![0xaa; 32],
                part_set_header: Some(ProtoPartSetHeader { total: 1, hash: vec![0x01] }),
            }),
            timestamp: Some(ProtoTimestamp { seconds: 1_760_783_400, nanos: 123_000_000 }),
            validator_address: vec![0x95, 0xce, 0xc6],
            validator_index: 7,
            signature: b"sig".to_vec(),
            extension: Vec::new(),
            extension_signature: Vec::new(),
        }
    }

    #[test]
    fn test_consensus_channel_set() {
        assert!(is_consensus_channel(STATE_CHANNEL_ID));
        assert!(is_consensus_channel(DATA_CHANNEL_ID));
        assert!(is_consensus_channel(VOTE_CHANNEL_ID));
        assert!(is_consensus_channel(VOTE_SET_BITS_CHANNEL_ID));
        assert!(!is_consensus_channel(MEMPOOL_CHANNEL_ID));
        assert!(!is_consensus_channel(EVIDENCE_CHANNEL_ID));
        assert!(!is_consensus_channel(0x00));
    }

    #[test]
    fn test_vote_frame_roundtrip() {
        let envelope = ConsensusEnvelope {
            sum: Some(consensus_sum::Sum::Vote(VoteEnvelope { vote: Some(sample_vote()) })),
        };
        let frame = envelope.encode_to_vec();

        let decoded = decode_envelope(&frame).expect("decode");
        let raw = envelope_to_raw(&decoded, "test-chain").expect("lower");
        assert_eq!(raw.message_type, "Vote");
        assert_eq!(raw.encoding, WireEncoding::Proto);

        let wire: serde_json::Value = serde_json::from_slice(&raw.payload).unwrap();
        assert_eq!(wire["type"], serde_json::json!(1));
        assert_eq!(wire["height"], serde_json::json!("1000"));
        assert_eq!(wire["round"], serde_json::json!("2"));
        assert_eq!(wire["validator_address"], serde_json::json!("95cec6"));

        let reencoded = raw_to_frame(&raw).expect("raise");
        let back = decode_envelope(&reencoded).expect("decode again");
        let Some(consensus_sum::Sum::Vote(wrapper)) = back.sum else {
            panic!("expected vote envelope");
        };
        let vote = wrapper.vote.expect("inner vote");
        assert_eq!(vote.height, 1000);
        assert_eq!(vote.round, 2);
        assert_eq!(vote.msg_type, 1);
        assert_eq!(vote.validator_address, vec![0x95, 0xce, 0xc6]);
        assert_eq!(vote.signature, b"sig".to_vec());
        assert_eq!(vote.block_id.unwrap().hash, vec![0xaa; 32]);
    }

    #[test]
    fn test_proposal_frame_roundtrip() {
        let proposal = ProtoProposal {
            msg_type: SIGNED_MSG_TYPE_PROPOSAL,
            height: 7,
            round: 1,
            pol_round: -1,
            block_id: Some(ProtoBlockId {
                hash: vec![0xcc; 32],
                part_set_header: Some(ProtoPartSetHeader { total: 3, hash: vec![0x02, 0x03] }),
            }),
            timestamp: Some(ProtoTimestamp { seconds: 1_760_783_400, nanos: 0 }),
            signature: b"proposal-sig".to_vec(),
        };
        let envelope = ConsensusEnvelope {
            sum: Some(consensus_sum::Sum::Proposal(ProposalEnvelope {
                proposal: Some(proposal.clone()),
            })),
        };

        let raw = envelope_to_raw(&envelope, "test-chain").expect("lower");
        let frame = raw_to_frame(&raw).expect("raise");
        let back = decode_envelope(&frame).expect("decode");
        let Some(consensus_sum::Sum::Proposal(wrapper)) = back.sum else {
            panic!("expected proposal envelope");
        };
        let got = wrapper.proposal.expect("inner proposal");
        assert_eq!(got.height, proposal.height);
        assert_eq!(got.round, proposal.round);
        assert_eq!(got.pol_round, proposal.pol_round);
        assert_eq!(got.signature, proposal.signature);
        assert_eq!(got.block_id.unwrap().hash, vec![0xcc; 32]);
    }

    #[test]
    fn test_untranslated_variant_is_unsupported() {
        let envelope = ConsensusEnvelope {
            sum: Some(consensus_sum::Sum::NewRoundStep(NewRoundStep {})),
        };
        let err = envelope_to_raw(&envelope, "test-chain").unwrap_err();
        assert_eq!(err, CodecError::UnsupportedMessage);
    }

    #[test]
    fn test_garbage_frame_fails_decode() {
        // A frame whose wire type contradicts its tag cannot decode.
        let err = decode_envelope(&[0x0a, 0xff, 0xff, 0xff, 0xff, 0x00]).unwrap_err();
        assert_eq!(err.code(), "DECODE_FAILURE");
    }

    #[test]
    fn test_oversized_height_rejected_on_raise() {
        let mut raw = {
            let envelope = ConsensusEnvelope {
                sum: Some(consensus_sum::Sum::Vote(VoteEnvelope { vote: Some(sample_vote()) })),
            };
            envelope_to_raw(&envelope, "test-chain").expect("lower")
        };
        let mut wire: serde_json::Value = serde_json::from_slice(&raw.payload).unwrap();
        wire["height"] = serde_json::json!("92233720368547758080"); // 2^63
        raw.payload = serde_json::to_vec(&wire).unwrap();

        let err = raw_to_frame(&raw).unwrap_err();
        assert_eq!(err.code(), "DECODE_FAILURE");
    }
}
