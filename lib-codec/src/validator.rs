//! Structural validation of canonical messages
//!
//! A declarative, per-chain ruleset with four layers: required fields, field
//! types, parametric constraints and chain-specific custom rules. Validation
//! fails fast on the first violation and returns a structured error carrying
//! the field name and code.
//!
//! The proxy never validates on its hot path; validation is offered to
//! direct callers of the adapters (tests, tooling).

use std::collections::BTreeMap;

use chrono::Utc;
use num_bigint::BigUint;

use crate::error::CodecError;
use crate::message::{CanonicalMessage, ChainTag, MsgType};

/// Expected type tag for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    BigInt,
    Time,
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "string",
            FieldType::BigInt => "bigint",
            FieldType::Time => "time",
        }
    }
}

/// Parametric constraints for a single field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldConstraint {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub max_age_seconds: Option<u64>,
}

/// A chain-specific predicate over the whole message
#[derive(Clone)]
pub struct CustomRule {
    pub name: &'static str,
    pub description: &'static str,
    pub check: fn(&CanonicalMessage) -> Result<(), CodecError>,
}

impl std::fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomRule")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Validation rules for a specific chain
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    pub required_fields: Vec<&'static str>,
    pub field_types: BTreeMap<&'static str, FieldType>,
    pub constraints: BTreeMap<&'static str, FieldConstraint>,
    pub custom_rules: Vec<CustomRule>,
}

/// Validates canonical messages against chain-specific rules
#[derive(Debug, Clone)]
pub struct MessageValidator {
    chain: ChainTag,
    rules: ValidationRules,
}

impl MessageValidator {
    /// Validator with the default ruleset for the chain.
    pub fn for_chain(chain: ChainTag) -> Self {
        Self {
            chain,
            rules: default_rules(chain),
        }
    }

    /// Validator with a caller-supplied ruleset.
    pub fn with_rules(chain: ChainTag, rules: ValidationRules) -> Self {
        Self { chain, rules }
    }

    pub fn chain(&self) -> ChainTag {
        self.chain
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate a canonical message. Fails fast on the first violation.
    pub fn validate(&self, msg: &CanonicalMessage) -> Result<(), CodecError> {
        for field in &self.rules.required_fields {
            check_field_present(msg, field)?;
        }
        for (field, expected) in &self.rules.field_types {
            check_field_type(msg, field, *expected)?;
        }
        for (field, constraint) in &self.rules.constraints {
            check_constraint(msg, field, constraint)?;
        }
        for rule in &self.rules.custom_rules {
            (rule.check)(msg)?;
        }
        Ok(())
    }
}

fn check_field_present(msg: &CanonicalMessage, field: &str) -> Result<(), CodecError> {
    let present = match field {
        "chain_id" => !msg.chain_id.is_empty(),
        "height" => msg.height.is_some(),
        "round" => msg.round.is_some(),
        "view" => msg.view.is_some(),
        "timestamp" => msg.timestamp.is_some(),
        // msg_type is a closed enum; presence is structural
        "type" => true,
        "block_hash" => msg.block_hash.as_deref().is_some_and(|h| !h.is_empty()),
        "proposer" => msg.proposer.as_deref().is_some_and(|p| !p.is_empty()),
        "validator" => msg.validator.as_deref().is_some_and(|v| !v.is_empty()),
        "signature" => msg.signature.as_deref().is_some_and(|s| !s.is_empty()),
        _ => true,
    };
    if present {
        Ok(())
    } else {
        Err(CodecError::missing(field))
    }
}

// Field storage is strongly typed, so a type violation can only come from a
// ruleset expecting a different tag than the model declares for that field.
fn check_field_type(
    _msg: &CanonicalMessage,
    field: &str,
    expected: FieldType,
) -> Result<(), CodecError> {
    let ok = match (field, expected) {
        ("chain_id", FieldType::Text) => true,
        ("type", FieldType::Text) => true,
        ("height", FieldType::BigInt) => true,
        ("round", FieldType::BigInt) => true,
        ("view", FieldType::BigInt) => true,
        ("timestamp", FieldType::Time) => true,
        ("block_hash" | "prev_hash" | "proposer" | "validator" | "signature", FieldType::Text) => {
            true
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CodecError::InvalidFieldType {
            field: field.into(),
            expected: expected.name().into(),
        })
    }
}

fn check_constraint(
    msg: &CanonicalMessage,
    field: &str,
    constraint: &FieldConstraint,
) -> Result<(), CodecError> {
    let numeric = match field {
        "height" => msg.height.as_ref(),
        "round" => msg.round.as_ref(),
        "view" => msg.view.as_ref(),
        _ => None,
    };

    if let Some(value) = numeric {
        if let Some(min) = constraint.min {
            let floor = BigUint::from(min.max(0) as u64);
            if *value < floor {
                return Err(CodecError::ConstraintViolation {
                    field: field.into(),
                    rule: format!("must be >= {min}"),
                });
            }
        }
        if let Some(max) = constraint.max {
            if max >= 0 && *value > BigUint::from(max as u64) {
                return Err(CodecError::ConstraintViolation {
                    field: field.into(),
                    rule: format!("must be <= {max}"),
                });
            }
        }
    }

    if field == "timestamp" {
        if let (Some(ts), Some(max_age)) = (msg.timestamp, constraint.max_age_seconds) {
            let age = Utc::now().signed_duration_since(ts).num_seconds();
            if age > max_age as i64 {
                return Err(CodecError::ConstraintViolation {
                    field: field.into(),
                    rule: format!("message is too old: {age}s > {max_age}s"),
                });
            }
        }
    }

    Ok(())
}

fn allowed_types_rule(
    msg: &CanonicalMessage,
    allowed: &[MsgType],
) -> Result<(), CodecError> {
    if allowed.contains(&msg.msg_type) {
        Ok(())
    } else {
        Err(CodecError::UnsupportedType {
            msg_type: msg.msg_type,
        })
    }
}

fn tendermint_message_type(msg: &CanonicalMessage) -> Result<(), CodecError> {
    allowed_types_rule(
        msg,
        &[MsgType::Proposal, MsgType::Prevote, MsgType::Precommit, MsgType::Block],
    )
}

fn pbft_message_type(msg: &CanonicalMessage) -> Result<(), CodecError> {
    allowed_types_rule(
        msg,
        &[
            MsgType::Proposal,
            MsgType::Prepare,
            MsgType::Commit,
            MsgType::ViewChange,
            MsgType::NewView,
        ],
    )
}

fn ibft_message_type(msg: &CanonicalMessage) -> Result<(), CodecError> {
    allowed_types_rule(msg, &[MsgType::Proposal, MsgType::Vote, MsgType::Block])
}

/// Default validation rules per chain style.
fn default_rules(chain: ChainTag) -> ValidationRules {
    let common_types: BTreeMap<&'static str, FieldType> = [
        ("chain_id", FieldType::Text),
        ("height", FieldType::BigInt),
        ("timestamp", FieldType::Time),
        ("type", FieldType::Text),
    ]
    .into_iter()
    .collect();

    match chain {
        ChainTag::CometBft => {
            let mut field_types = common_types;
            field_types.insert("round", FieldType::BigInt);
            ValidationRules {
                required_fields: vec!["chain_id", "height", "round", "timestamp", "type"],
                field_types,
                constraints: [
                    ("height", FieldConstraint { min: Some(0), ..Default::default() }),
                    ("round", FieldConstraint { min: Some(0), ..Default::default() }),
                    (
                        "timestamp",
                        FieldConstraint { max_age_seconds: Some(3600), ..Default::default() },
                    ),
                ]
                .into_iter()
                .collect(),
                custom_rules: vec![CustomRule {
                    name: "tendermint_message_type",
                    description: "restrict to the Tendermint consensus message set",
                    check: tendermint_message_type,
                }],
            }
        }
        ChainTag::Hyperledger => ValidationRules {
            required_fields: vec!["chain_id", "height", "timestamp", "type"],
            field_types: common_types,
            constraints: [
                ("height", FieldConstraint { min: Some(0), ..Default::default() }),
                (
                    "timestamp",
                    FieldConstraint { max_age_seconds: Some(7200), ..Default::default() },
                ),
            ]
            .into_iter()
            .collect(),
            custom_rules: vec![CustomRule {
                name: "pbft_message_type",
                description: "restrict to the PBFT message set",
                check: pbft_message_type,
            }],
        },
        ChainTag::Kaia => {
            let mut field_types = common_types;
            field_types.insert("round", FieldType::BigInt);
            ValidationRules {
                required_fields: vec!["chain_id", "height", "round", "timestamp", "type"],
                field_types,
                constraints: [
                    ("height", FieldConstraint { min: Some(0), ..Default::default() }),
                    ("round", FieldConstraint { min: Some(0), ..Default::default() }),
                    (
                        "timestamp",
                        FieldConstraint { max_age_seconds: Some(1800), ..Default::default() },
                    ),
                ]
                .into_iter()
                .collect(),
                custom_rules: vec![CustomRule {
                    name: "ibft_message_type",
                    description: "restrict to the Istanbul-BFT message set",
                    check: ibft_message_type,
                }],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn valid_prevote() -> CanonicalMessage {
        CanonicalMessage::new("test-chain", MsgType::Prevote)
            .with_height(10)
            .with_round(0)
            .with_timestamp(Utc::now())
    }

    #[test]
    fn test_valid_message_passes() {
        let validator = MessageValidator::for_chain(ChainTag::CometBft);
        validator.validate(&valid_prevote()).expect("expected valid");
    }

    #[test]
    fn test_missing_height() {
        let validator = MessageValidator::for_chain(ChainTag::CometBft);
        let mut msg = valid_prevote();
        msg.height = None;
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err, CodecError::MissingField { field: "height".into() });
    }

    #[test]
    fn test_missing_chain_id() {
        let validator = MessageValidator::for_chain(ChainTag::CometBft);
        let mut msg = valid_prevote();
        msg.chain_id.clear();
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err.code(), "MISSING_FIELD");
    }

    #[test]
    fn test_missing_round_required_for_tendermint() {
        let validator = MessageValidator::for_chain(ChainTag::CometBft);
        let mut msg = valid_prevote();
        msg.round = None;
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err, CodecError::MissingField { field: "round".into() });
    }

    #[test]
    fn test_round_not_required_for_pbft() {
        let validator = MessageValidator::for_chain(ChainTag::Hyperledger);
        let mut msg = valid_prevote();
        msg.msg_type = MsgType::Prepare;
        msg.round = None;
        validator.validate(&msg).expect("round is optional for PBFT");
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let validator = MessageValidator::for_chain(ChainTag::Kaia);
        let mut msg = valid_prevote();
        msg.msg_type = MsgType::Vote;
        // Kaia allows 1800 seconds of skew
        msg.timestamp = Some(Utc::now() - Duration::seconds(1801));
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn test_fresh_timestamp_accepted() {
        let validator = MessageValidator::for_chain(ChainTag::Kaia);
        let mut msg = valid_prevote();
        msg.msg_type = MsgType::Vote;
        msg.timestamp = Some(Utc::now() - Duration::seconds(60));
        validator.validate(&msg).expect("fresh message");
    }

    #[test]
    fn test_tendermint_type_restriction() {
        let validator = MessageValidator::for_chain(ChainTag::CometBft);
        let mut msg = valid_prevote();
        msg.msg_type = MsgType::NewView;
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err, CodecError::UnsupportedType { msg_type: MsgType::NewView });
    }

    #[test]
    fn test_pbft_type_restriction() {
        let validator = MessageValidator::for_chain(ChainTag::Hyperledger);
        let mut msg = valid_prevote();
        msg.msg_type = MsgType::Prevote;
        let err = validator.validate(&msg).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
    }

    #[test]
    fn test_custom_ruleset_override() {
        let rules = ValidationRules {
            required_fields: vec!["chain_id", "signature"],
            ..Default::default()
        };
        let validator = MessageValidator::with_rules(ChainTag::CometBft, rules);
        let err = validator.validate(&valid_prevote()).unwrap_err();
        assert_eq!(err, CodecError::MissingField { field: "signature".into() });
    }
}
