//! Byzantine mutation pipeline
//!
//! Named, parametric transformations of a canonical message into one or more
//! canonical messages representing Byzantine behaviour. Inputs are cloned,
//! never mutated in place; every output is a new instance.

mod mutator;

pub use mutator::{apply_action, perturb_hex};

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

use crate::error::CodecError;

/// The manipulation to apply when re-encoding a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByzantineAction {
    /// Pass the message through untouched (still cloned).
    #[default]
    None,
    /// Emit two vote messages with conflicting block hashes.
    DoubleVote,
    /// Emit two proposal messages referencing different blocks.
    DoubleProposal,
    /// Rewrite the validator or proposer identity.
    AlterValidator,
    /// Strip the signature from the message.
    DropSignature,
    /// Shift the message timestamp.
    TimestampSkew,
}

impl ByzantineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ByzantineAction::None => "none",
            ByzantineAction::DoubleVote => "double_vote",
            ByzantineAction::DoubleProposal => "double_proposal",
            ByzantineAction::AlterValidator => "alter_validator",
            ByzantineAction::DropSignature => "drop_signature",
            ByzantineAction::TimestampSkew => "timestamp_skew",
        }
    }
}

impl fmt::Display for ByzantineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByzantineAction {
    type Err = CodecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(ByzantineAction::None),
            "double_vote" => Ok(ByzantineAction::DoubleVote),
            "double_proposal" => Ok(ByzantineAction::DoubleProposal),
            "alter_validator" => Ok(ByzantineAction::AlterValidator),
            "drop_signature" => Ok(ByzantineAction::DropSignature),
            "timestamp_skew" => Ok(ByzantineAction::TimestampSkew),
            other => Err(CodecError::InvalidOption {
                option: "action".into(),
                reason: format!("unknown byzantine action: {other}"),
            }),
        }
    }
}

/// Optional overrides and common mutations for the mutated messages.
#[derive(Debug, Clone, PartialEq)]
pub struct ByzantineOptions {
    pub alternate_block_hash: Option<String>,
    pub alternate_prev_hash: Option<String>,
    pub alternate_signature: Option<String>,
    pub alternate_validator: Option<String>,
    pub round_offset: i64,
    pub height_offset: i64,
    pub timestamp_shift: Duration,
}

impl Default for ByzantineOptions {
    fn default() -> Self {
        Self {
            alternate_block_hash: None,
            alternate_prev_hash: None,
            alternate_signature: None,
            alternate_validator: None,
            round_offset: 0,
            height_offset: 0,
            timestamp_shift: Duration::zero(),
        }
    }
}
