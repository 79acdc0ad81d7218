//! Cross-chain translation tests
//!
//! Exercise the full `wire -> canonical -> wire` pipeline across adapters,
//! including mutation in the middle, the way the proxy drives it.

use std::collections::BTreeMap;

use chrono::Utc;
use lib_codec::adapters::{BesuIbftAdapter, CometBftAdapter, FabricPbftAdapter, KaiaAdapter};
use lib_codec::{
    apply_action, ByzantineAction, ByzantineOptions, ChainAdapter, ChainTag, MsgType,
    RawConsensusMessage, WireEncoding,
};

fn cometbft_vote_envelope(subtype: i32, height: &str) -> RawConsensusMessage {
    let payload = serde_json::json!({
        "type": subtype,
        "height": height,
        "round": "1",
        "block_id": {
            "hash": "AA11".repeat(16),
            "parts": {"total": 1, "hash": "BB22"}
        },
        "timestamp": "2025-10-18T10:30:00.123Z",
        "validator_address": "95CEC6B107344C3A3D9C1E9C8F29D002E8E74092",
        "validator_index": 3,
        "signature": "c2lnbmF0dXJl"
    });
    RawConsensusMessage {
        chain_tag: ChainTag::CometBft,
        chain_id: "origin-chain".into(),
        message_type: "Vote".into(),
        payload: serde_json::to_vec(&payload).unwrap(),
        encoding: WireEncoding::Json,
        timestamp: None,
        metadata: BTreeMap::new(),
    }
}

#[test]
fn prevote_translates_from_cometbft_to_kaia() {
    let source = CometBftAdapter::new("origin-chain");
    let target = KaiaAdapter::new("kaia-chain");

    let mut canonical = source
        .to_canonical(&cometbft_vote_envelope(1, "1000"))
        .expect("decode");
    assert_eq!(canonical.msg_type, MsgType::Prevote);

    // Kaia's supported set has no prevote granularity; a generic vote crosses.
    canonical.msg_type = MsgType::Vote;
    let encoded = target.from_canonical(&canonical).expect("encode");
    assert_eq!(encoded.chain_tag, ChainTag::Kaia);
    assert_eq!(encoded.message_type, "VOTE");

    let wire: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
    assert_eq!(wire["block_number"], serde_json::json!("1000"));
    assert_eq!(wire["round_number"], serde_json::json!("1"));
    assert_eq!(wire["validator"], serde_json::json!("95cec6b107344c3a3d9c1e9c8f29d002e8e74092"));
}

#[test]
fn commit_translates_from_besu_to_fabric() {
    let source = BesuIbftAdapter::new("besu-chain");
    let target = FabricPbftAdapter::new("fabric-chain");

    let payload = serde_json::json!({
        "body": {"code": 2, "height": "88", "round": 1, "block_hash": "0xAB", "signature": "Ym9keQ=="},
        "commit_seal": "c2VhbA=="
    });
    let raw = RawConsensusMessage {
        chain_tag: ChainTag::Hyperledger,
        chain_id: "besu-chain".into(),
        message_type: "Commit".into(),
        payload: serde_json::to_vec(&payload).unwrap(),
        encoding: WireEncoding::Json,
        timestamp: Some(Utc::now()),
        metadata: BTreeMap::new(),
    };

    let canonical = source.to_canonical(&raw).expect("decode");
    assert_eq!(canonical.msg_type, MsgType::Commit);
    assert_eq!(canonical.commit_seals.len(), 1);

    let encoded = target.from_canonical(&canonical).expect("encode");
    assert_eq!(encoded.message_type, "COMMIT");
    let wire: serde_json::Value = serde_json::from_slice(&encoded.payload).unwrap();
    assert_eq!(wire["block_number"], serde_json::json!("88"));
    assert_eq!(wire["signature"], serde_json::json!("c2VhbA=="));
}

#[test]
fn double_vote_mutation_produces_conflicting_wire_messages() {
    let codec = CometBftAdapter::new("origin-chain");
    let canonical = codec
        .to_canonical(&cometbft_vote_envelope(1, "11"))
        .expect("decode");

    let outputs = apply_action(
        &canonical,
        ByzantineAction::DoubleVote,
        &ByzantineOptions::default(),
    )
    .expect("mutation");
    assert_eq!(outputs.len(), 2);

    let decoded: Vec<serde_json::Value> = outputs
        .iter()
        .map(|m| {
            let raw = codec.from_canonical(m).expect("encode");
            serde_json::from_slice(&raw.payload).expect("wire json")
        })
        .collect();

    let hash0 = decoded[0]["block_id"]["hash"].as_str().unwrap().to_lowercase();
    let hash1 = decoded[1]["block_id"]["hash"].as_str().unwrap().to_lowercase();
    assert_ne!(hash0, hash1, "double vote must reference conflicting blocks");
    assert_eq!(decoded[0]["height"], decoded[1]["height"]);
    assert_eq!(decoded[0]["round"], decoded[1]["round"]);
    assert_eq!(decoded[0]["type"], decoded[1]["type"]);
}

#[test]
fn alter_validator_survives_reencoding() {
    let codec = CometBftAdapter::new("origin-chain");
    let canonical = codec
        .to_canonical(&cometbft_vote_envelope(2, "64"))
        .expect("decode");

    let opts = ByzantineOptions {
        alternate_validator: Some("1111111111111111111111111111111111111111".into()),
        ..Default::default()
    };
    let outputs = apply_action(&canonical, ByzantineAction::AlterValidator, &opts).expect("mutate");
    let raw = codec.from_canonical(&outputs[0]).expect("encode");
    let wire: serde_json::Value = serde_json::from_slice(&raw.payload).unwrap();
    assert_eq!(
        wire["validator_address"],
        serde_json::json!("1111111111111111111111111111111111111111")
    );
}

#[test]
fn unsupported_canonical_type_cannot_cross_to_cometbft() {
    let source = FabricPbftAdapter::new("fabric-chain");
    let target = CometBftAdapter::new("origin-chain");

    let payload = serde_json::json!({
        "block_number": "5",
        "view_number": "2",
        "type": "NEW_VIEW",
        "timestamp": "2025-10-18T10:30:00Z"
    });
    let raw = RawConsensusMessage {
        chain_tag: ChainTag::Hyperledger,
        chain_id: "fabric-chain".into(),
        message_type: "NEW_VIEW".into(),
        payload: serde_json::to_vec(&payload).unwrap(),
        encoding: WireEncoding::Json,
        timestamp: None,
        metadata: BTreeMap::new(),
    };

    let canonical = source.to_canonical(&raw).expect("decode");
    let err = target.from_canonical(&canonical).unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_TYPE");
}
