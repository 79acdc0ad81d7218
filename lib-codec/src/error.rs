//! Closed error taxonomy for codec, validation and mutation failures
//!
//! Every fallible operation in this crate returns one of these variants.
//! `code()` yields the stable machine-readable code used in structured log
//! events and CLI output.

use thiserror::Error;

use crate::byzantine::ByzantineAction;
use crate::message::{ChainTag, MsgType};

/// Codec, validation and mutation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Adapter used for the wrong chain tag.
    #[error("chain mismatch: adapter handles {expected}, message is {actual}")]
    ChainMismatch { expected: ChainTag, actual: ChainTag },

    /// Payload cannot be parsed under its declared encoding.
    #[error("failed to decode {field}: {reason}")]
    DecodeFailure { field: String, reason: String },

    /// Encoding tag not in the adapter's declared set.
    #[error("unsupported encoding: {encoding}")]
    UnsupportedEncoding { encoding: String },

    /// Decoded structure is not a consensus message.
    #[error("not a consensus message")]
    UnsupportedMessage,

    /// Required field absent on encode or validation.
    #[error("required field is missing: {field}")]
    MissingField { field: String },

    /// Validator type check failed.
    #[error("field {field} has the wrong type, expected {expected}")]
    InvalidFieldType { field: String, expected: String },

    /// Validator constraint failed.
    #[error("field {field} violates constraint: {rule}")]
    ConstraintViolation { field: String, rule: String },

    /// Canonical type not in the adapter's supported set.
    #[error("unsupported message type: {msg_type}")]
    UnsupportedType { msg_type: MsgType },

    /// Mutator precondition failed.
    #[error("action {action} requires {requirement}")]
    ActionRequirementUnmet {
        action: ByzantineAction,
        requirement: String,
    },

    /// Mutator option invalid.
    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },
}

impl CodecError {
    /// Stable machine-readable code for structured logging.
    pub fn code(&self) -> &'static str {
        match self {
            CodecError::ChainMismatch { .. } => "CHAIN_MISMATCH",
            CodecError::DecodeFailure { .. } => "DECODE_FAILURE",
            CodecError::UnsupportedEncoding { .. } => "UNSUPPORTED_ENCODING",
            CodecError::UnsupportedMessage => "UNSUPPORTED_MESSAGE",
            CodecError::MissingField { .. } => "MISSING_FIELD",
            CodecError::InvalidFieldType { .. } => "INVALID_FIELD_TYPE",
            CodecError::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            CodecError::UnsupportedType { .. } => "UNSUPPORTED_TYPE",
            CodecError::ActionRequirementUnmet { .. } => "ACTION_REQUIREMENT_UNMET",
            CodecError::InvalidOption { .. } => "INVALID_OPTION",
        }
    }

    pub(crate) fn decode(field: impl Into<String>, reason: impl ToString) -> Self {
        CodecError::DecodeFailure {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn missing(field: impl Into<String>) -> Self {
        CodecError::MissingField { field: field.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = CodecError::MissingField {
            field: "height".into(),
        };
        assert_eq!(err.code(), "MISSING_FIELD");
        assert_eq!(err.to_string(), "required field is missing: height");

        let err = CodecError::UnsupportedType {
            msg_type: MsgType::NewView,
        };
        assert_eq!(err.code(), "UNSUPPORTED_TYPE");
        assert!(err.to_string().contains("new_view"));
    }

    #[test]
    fn test_chain_mismatch_message() {
        let err = CodecError::ChainMismatch {
            expected: ChainTag::CometBft,
            actual: ChainTag::Kaia,
        };
        assert!(err.to_string().contains("cometbft"));
        assert!(err.to_string().contains("kaia"));
    }
}
