//! Mutation actions over canonical messages

use chrono::Duration;
use num_bigint::BigUint;

use crate::error::CodecError;
use crate::message::CanonicalMessage;

use super::{ByzantineAction, ByzantineOptions};

/// The 64-hex-zero string substituted for an empty hash.
const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Apply a byzantine action to a canonical message.
///
/// Returns the ordered, non-empty set of canonical messages that should
/// subsequently be encoded. The input is never mutated.
pub fn apply_action(
    msg: &CanonicalMessage,
    action: ByzantineAction,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    match action {
        ByzantineAction::None => Ok(vec![msg.clone()]),
        ByzantineAction::DoubleVote => apply_double_vote(msg, opts),
        ByzantineAction::DoubleProposal => apply_double_proposal(msg, opts),
        ByzantineAction::AlterValidator => apply_alter_validator(msg, opts),
        ByzantineAction::DropSignature => apply_drop_signature(msg, opts),
        ByzantineAction::TimestampSkew => apply_timestamp_skew(msg, opts),
    }
}

fn apply_double_vote(
    msg: &CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    if !msg.is_vote() {
        return Err(CodecError::ActionRequirementUnmet {
            action: ByzantineAction::DoubleVote,
            requirement: "a vote canonical message".into(),
        });
    }

    let original = msg.clone();
    let mut mutated = msg.clone();
    mutated.block_hash = Some(choose_alternate_hash(
        msg.block_hash.as_deref(),
        opts.alternate_block_hash.as_deref(),
    ));
    if let Some(sig) = &opts.alternate_signature {
        mutated.signature = Some(sig.clone());
    }

    apply_common_mutations(&mut mutated, opts)?;
    ensure_timestamp_progress(&mut mutated, &original);

    Ok(vec![original, mutated])
}

fn apply_double_proposal(
    msg: &CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    if !msg.is_proposal() {
        return Err(CodecError::ActionRequirementUnmet {
            action: ByzantineAction::DoubleProposal,
            requirement: "a proposal canonical message".into(),
        });
    }

    let original = msg.clone();
    let mut mutated = msg.clone();
    mutated.block_hash = Some(choose_alternate_hash(
        msg.block_hash.as_deref(),
        opts.alternate_block_hash.as_deref(),
    ));
    if let Some(prev) = &opts.alternate_prev_hash {
        mutated.prev_hash = Some(prev.clone());
    } else if mutated.prev_hash == msg.prev_hash {
        mutated.prev_hash = Some(choose_alternate_hash(msg.prev_hash.as_deref(), None));
    }
    if let Some(sig) = &opts.alternate_signature {
        mutated.signature = Some(sig.clone());
    }

    apply_common_mutations(&mut mutated, opts)?;
    ensure_timestamp_progress(&mut mutated, &original);

    Ok(vec![original, mutated])
}

fn apply_alter_validator(
    msg: &CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    let replacement = match opts.alternate_validator.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            return Err(CodecError::InvalidOption {
                option: "alternate_validator".into(),
                reason: "alter_validator requires a replacement identity".into(),
            })
        }
    };

    let mut mutated = msg.clone();
    if msg.is_vote() {
        mutated.validator = Some(replacement);
    } else if msg.is_proposal() {
        mutated.proposer = Some(replacement);
    } else {
        return Err(CodecError::ActionRequirementUnmet {
            action: ByzantineAction::AlterValidator,
            requirement: "a proposal or vote canonical message".into(),
        });
    }

    apply_common_mutations(&mut mutated, opts)?;
    ensure_timestamp_progress(&mut mutated, msg);

    Ok(vec![mutated])
}

fn apply_drop_signature(
    msg: &CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    let mut mutated = msg.clone();
    mutated.signature = None;

    apply_common_mutations(&mut mutated, opts)?;
    ensure_timestamp_progress(&mut mutated, msg);

    Ok(vec![mutated])
}

fn apply_timestamp_skew(
    msg: &CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<Vec<CanonicalMessage>, CodecError> {
    if opts.timestamp_shift.is_zero() {
        return Err(CodecError::InvalidOption {
            option: "timestamp_shift".into(),
            reason: "timestamp_skew requires a non-zero shift".into(),
        });
    }

    let mut mutated = msg.clone();
    apply_common_mutations(&mut mutated, opts)?;
    ensure_timestamp_progress(&mut mutated, msg);

    Ok(vec![mutated])
}

/// Offsets and timestamp shift applied to every non-`none` output, after the
/// action-specific mutations.
fn apply_common_mutations(
    target: &mut CanonicalMessage,
    opts: &ByzantineOptions,
) -> Result<(), CodecError> {
    if opts.height_offset != 0 {
        target.height = shift_value("height_offset", target.height.take(), opts.height_offset)?;
    }
    if opts.round_offset != 0 {
        target.round = shift_value("round_offset", target.round.take(), opts.round_offset)?;
    }
    if !opts.timestamp_shift.is_zero() {
        if let Some(ts) = target.timestamp {
            target.timestamp = Some(ts + opts.timestamp_shift);
        }
    }
    Ok(())
}

/// Shift an unbounded non-negative value by a signed offset.
///
/// An offset that would take the value below zero (or a negative offset on an
/// absent value) is rejected.
fn shift_value(
    option: &str,
    value: Option<BigUint>,
    offset: i64,
) -> Result<Option<BigUint>, CodecError> {
    if offset >= 0 {
        let step = BigUint::from(offset as u64);
        return Ok(Some(value.map_or(step.clone(), |v| v + step)));
    }

    let magnitude = BigUint::from(offset.unsigned_abs());
    match value {
        Some(v) if v >= magnitude => Ok(Some(v - magnitude)),
        Some(v) => Err(CodecError::InvalidOption {
            option: option.into(),
            reason: format!("offset {offset} would take {v} below zero"),
        }),
        None => Err(CodecError::InvalidOption {
            option: option.into(),
            reason: format!("offset {offset} applied to an absent value"),
        }),
    }
}

/// Guarantee the mutated timestamp moved past the original's.
fn ensure_timestamp_progress(mutated: &mut CanonicalMessage, original: &CanonicalMessage) {
    let Some(reference) = original.timestamp else {
        return;
    };
    if mutated.timestamp == Some(reference) {
        mutated.timestamp = Some(reference + Duration::milliseconds(1));
    }
}

/// Pick the conflicting hash for a double-sign mutation.
fn choose_alternate_hash(original: Option<&str>, provided: Option<&str>) -> String {
    if let Some(alt) = provided {
        if !alt.is_empty() {
            return alt.to_string();
        }
    }
    match original {
        None | Some("") => ZERO_HASH.to_string(),
        Some(hash) => perturb_hex(hash),
    }
}

/// Deterministic hex perturbation.
///
/// Scans from the last character and flips the first `0`/`1` pair or bumps
/// `a`/`A` to `b` and `f`/`F` to `e`; appends `"0"` when nothing flippable
/// is found.
pub fn perturb_hex(original: &str) -> String {
    if original.is_empty() {
        return ZERO_HASH.to_string();
    }

    let mut chars: Vec<char> = original.chars().collect();
    for i in (0..chars.len()).rev() {
        match chars[i] {
            '0' => {
                chars[i] = '1';
                return chars.into_iter().collect();
            }
            '1' => {
                chars[i] = '0';
                return chars.into_iter().collect();
            }
            'a' | 'A' => {
                chars[i] = 'b';
                return chars.into_iter().collect();
            }
            'f' | 'F' => {
                chars[i] = 'e';
                return chars.into_iter().collect();
            }
            _ => {}
        }
    }
    format!("{original}0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgType;
    use chrono::{TimeZone, Utc};

    fn prevote() -> CanonicalMessage {
        CanonicalMessage::new("test-chain", MsgType::Prevote)
            .with_height(5)
            .with_round(1)
            .with_timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
            .with_block_hash("aa".repeat(32))
            .with_validator("validator-1")
            .with_signature("sig-1")
    }

    fn proposal() -> CanonicalMessage {
        CanonicalMessage::new("test-chain", MsgType::Proposal)
            .with_height(7)
            .with_round(0)
            .with_timestamp(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
            .with_block_hash("cc".repeat(32))
            .with_proposer("proposer-1")
            .with_signature("sig-p")
    }

    #[test]
    fn test_none_clones_the_input() {
        let msg = prevote();
        let outputs = apply_action(&msg, ByzantineAction::None, &ByzantineOptions::default())
            .expect("none action failed");
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].semantically_eq(&msg));
        // Distinct instance: mutating the output must not touch the input.
        let mut out = outputs.into_iter().next().unwrap();
        out.chain_id = "other".into();
        assert_eq!(msg.chain_id, "test-chain");
    }

    #[test]
    fn test_double_vote_full_option_set() {
        // Scenario: all overrides plus common offsets and a 2 ms shift.
        let msg = prevote();
        let opts = ByzantineOptions {
            alternate_block_hash: Some("bb".repeat(32)),
            alternate_signature: Some("sig-2".into()),
            round_offset: 1,
            height_offset: 2,
            timestamp_shift: Duration::milliseconds(2),
            ..Default::default()
        };

        let outputs =
            apply_action(&msg, ByzantineAction::DoubleVote, &opts).expect("double vote failed");
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].semantically_eq(&msg));

        let mutated = &outputs[1];
        assert_eq!(mutated.block_hash.as_deref(), Some("bb".repeat(32).as_str()));
        assert_eq!(mutated.signature.as_deref(), Some("sig-2"));
        assert_eq!(mutated.height, Some(BigUint::from(7u64)));
        assert_eq!(mutated.round, Some(BigUint::from(2u64)));
        assert_eq!(
            mutated.timestamp,
            Some(Utc.timestamp_millis_opt(1_700_000_000_002).unwrap())
        );
    }

    #[test]
    fn test_double_vote_timestamps_progress() {
        let msg = prevote();
        let outputs = apply_action(&msg, ByzantineAction::DoubleVote, &ByzantineOptions::default())
            .expect("double vote failed");
        assert!(outputs[1].timestamp > outputs[0].timestamp);
    }

    #[test]
    fn test_double_vote_perturbs_hash_without_override() {
        let msg = prevote();
        let outputs = apply_action(&msg, ByzantineAction::DoubleVote, &ByzantineOptions::default())
            .expect("double vote failed");
        assert_ne!(outputs[1].block_hash, outputs[0].block_hash);
        assert_eq!(outputs[0].block_hash, msg.block_hash);
    }

    #[test]
    fn test_double_vote_rejects_proposal() {
        let err = apply_action(
            &proposal(),
            ByzantineAction::DoubleVote,
            &ByzantineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "ACTION_REQUIREMENT_UNMET");
    }

    #[test]
    fn test_double_proposal_diverges_prev_hash() {
        let mut msg = proposal();
        msg.prev_hash = Some("dd".repeat(32));
        let outputs = apply_action(
            &msg,
            ByzantineAction::DoubleProposal,
            &ByzantineOptions::default(),
        )
        .expect("double proposal failed");
        assert_eq!(outputs.len(), 2);
        assert_ne!(outputs[1].prev_hash, msg.prev_hash);
        assert_ne!(outputs[1].block_hash, msg.block_hash);
    }

    #[test]
    fn test_alter_validator_on_proposal() {
        // Scenario: proposer rewritten, timestamp strictly advances.
        let msg = proposal();
        let opts = ByzantineOptions {
            alternate_validator: Some("proposer-2".into()),
            ..Default::default()
        };
        let outputs =
            apply_action(&msg, ByzantineAction::AlterValidator, &opts).expect("alter failed");
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].proposer.as_deref(), Some("proposer-2"));
        assert!(outputs[0].timestamp > msg.timestamp);
    }

    #[test]
    fn test_alter_validator_on_vote() {
        let msg = prevote();
        let opts = ByzantineOptions {
            alternate_validator: Some("validator-9".into()),
            ..Default::default()
        };
        let outputs =
            apply_action(&msg, ByzantineAction::AlterValidator, &opts).expect("alter failed");
        assert_eq!(outputs[0].validator.as_deref(), Some("validator-9"));
    }

    #[test]
    fn test_alter_validator_requires_override() {
        let err = apply_action(
            &prevote(),
            ByzantineAction::AlterValidator,
            &ByzantineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_OPTION");
    }

    #[test]
    fn test_drop_signature() {
        let outputs = apply_action(
            &prevote(),
            ByzantineAction::DropSignature,
            &ByzantineOptions::default(),
        )
        .expect("drop signature failed");
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].signature.is_none());
    }

    #[test]
    fn test_timestamp_skew_requires_shift() {
        let err = apply_action(
            &prevote(),
            ByzantineAction::TimestampSkew,
            &ByzantineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_OPTION");
    }

    #[test]
    fn test_timestamp_skew_shifts_backwards() {
        let msg = prevote();
        let opts = ByzantineOptions {
            timestamp_shift: Duration::milliseconds(-500),
            ..Default::default()
        };
        let outputs =
            apply_action(&msg, ByzantineAction::TimestampSkew, &opts).expect("skew failed");
        assert_eq!(
            outputs[0].timestamp,
            Some(Utc.timestamp_millis_opt(1_699_999_999_500).unwrap())
        );
    }

    #[test]
    fn test_height_underflow_is_rejected() {
        let msg = prevote(); // height 5
        let opts = ByzantineOptions {
            height_offset: -6,
            ..Default::default()
        };
        let err = apply_action(&msg, ByzantineAction::DoubleVote, &opts).unwrap_err();
        assert_eq!(err.code(), "INVALID_OPTION");
    }

    #[test]
    fn test_negative_offset_within_range() {
        let msg = prevote(); // height 5, round 1
        let opts = ByzantineOptions {
            height_offset: -5,
            round_offset: -1,
            ..Default::default()
        };
        let outputs = apply_action(&msg, ByzantineAction::DropSignature, &opts).expect("shift");
        assert_eq!(outputs[0].height, Some(BigUint::from(0u64)));
        assert_eq!(outputs[0].round, Some(BigUint::from(0u64)));
    }

    #[test]
    fn test_perturb_hex_table() {
        assert_eq!(perturb_hex("7b0c"), "7b1c");
        assert_eq!(perturb_hex("7b1c"), "7b0c");
        assert_eq!(perturb_hex("ccca"), "cccb");
        assert_eq!(perturb_hex("cccF"), "ccce");
        assert_eq!(perturb_hex("9998"), "99980");
        assert_eq!(perturb_hex(""), ZERO_HASH);
    }
}
