//! Embedded consensus engine simulator
//!
//! A deliberately small model of a Tendermint-style engine used by the test
//! suites to drive adapters and the mutation pipeline with plausible traffic.
//! Never on the proxy hot path.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::message::{CanonicalMessage, MsgType};

/// A validator in the simulated set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimValidator {
    pub address: String,
    pub pub_key: String,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

/// The simulated validator set
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    pub validators: Vec<SimValidator>,
    pub total_power: i64,
}

impl ValidatorSet {
    pub fn new(validators: Vec<SimValidator>) -> Self {
        let total_power = validators.iter().map(|v| v.voting_power).sum();
        Self { validators, total_power }
    }

    /// Round-robin proposer: `round mod |validators|`.
    pub fn proposer_for_round(&self, round: u32) -> Option<&SimValidator> {
        if self.validators.is_empty() {
            return None;
        }
        let index = round as usize % self.validators.len();
        self.validators.get(index)
    }
}

/// Consensus step within a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsensusStep {
    NewRound,
    Propose,
    Prevote,
    Precommit,
}

/// Current `(height, round, step)` plus bookkeeping
#[derive(Debug, Clone)]
pub struct ConsensusState {
    pub height: u64,
    pub round: u32,
    pub step: ConsensusStep,
    pub start_time: DateTime<Utc>,
    pub last_commit_height: Option<u64>,
    pub last_commit_round: Option<u32>,
}

/// Simulates consensus engine behaviour for tests
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    state: ConsensusState,
    validator_set: ValidatorSet,
    by_address: HashMap<String, SimValidator>,
    proposer: String,
}

impl SimulatedEngine {
    pub fn new(validators: Vec<SimValidator>) -> Self {
        let by_address: HashMap<String, SimValidator> = validators
            .iter()
            .cloned()
            .map(|v| (v.address.clone(), v))
            .collect();
        let validator_set = ValidatorSet::new(validators);
        let proposer = validator_set
            .proposer_for_round(0)
            .map(|v| v.address.clone())
            .unwrap_or_default();
        Self {
            state: ConsensusState {
                height: 0,
                round: 0,
                step: ConsensusStep::NewRound,
                start_time: Utc::now(),
                last_commit_height: None,
                last_commit_round: None,
            },
            validator_set,
            by_address,
            proposer,
        }
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn proposer(&self) -> &str {
        &self.proposer
    }

    pub fn voting_power(&self, address: &str) -> i64 {
        self.by_address.get(address).map(|v| v.voting_power).unwrap_or(0)
    }

    pub fn consensus_reached(&self) -> bool {
        self.state.step >= ConsensusStep::Precommit
    }

    /// Process a canonical message and advance the simulated state.
    pub fn process_message(&mut self, msg: &CanonicalMessage) -> Result<()> {
        self.check_height_round(msg)?;
        match msg.msg_type {
            MsgType::Proposal => {
                let proposer = msg
                    .proposer
                    .as_deref()
                    .ok_or_else(|| anyhow!("proposal without a proposer"))?;
                if proposer != self.proposer {
                    bail!("invalid proposer: expected {}, got {proposer}", self.proposer);
                }
                self.state.step = self.state.step.max(ConsensusStep::Propose);
                if let Some(ts) = msg.timestamp {
                    self.state.start_time = ts;
                }
            }
            MsgType::Prevote => {
                self.check_known_validator(msg)?;
                self.state.step = self.state.step.max(ConsensusStep::Prevote);
            }
            MsgType::Precommit => {
                self.check_known_validator(msg)?;
                self.state.step = self.state.step.max(ConsensusStep::Precommit);
            }
            MsgType::Block => {}
            other => bail!("simulator does not model {other} messages"),
        }
        Ok(())
    }

    /// Advance to the next round, rotating the proposer.
    pub fn advance_round(&mut self) {
        self.state.round += 1;
        self.state.step = ConsensusStep::NewRound;
        self.state.start_time = Utc::now();
        self.rotate_proposer();
    }

    /// Jump to a height, resetting round and step.
    pub fn advance_height(&mut self, height: u64) {
        self.state.last_commit_height = Some(self.state.height);
        self.state.last_commit_round = Some(self.state.round);
        self.state.height = height;
        self.state.round = 0;
        self.state.step = ConsensusStep::NewRound;
        self.state.start_time = Utc::now();
        self.rotate_proposer();
    }

    /// Deterministic block hash for fixture construction.
    pub fn generate_block_hash(&self, height: u64, round: u32, proposer: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{height}:{round}:{proposer}"));
        hex::encode(hasher.finalize())
    }

    fn rotate_proposer(&mut self) {
        if let Some(v) = self.validator_set.proposer_for_round(self.state.round) {
            self.proposer = v.address.clone();
        }
    }

    fn check_known_validator(&self, msg: &CanonicalMessage) -> Result<()> {
        let address = msg
            .validator
            .as_deref()
            .ok_or_else(|| anyhow!("vote without a validator"))?;
        if !self.by_address.contains_key(address) {
            bail!("unknown validator: {address}");
        }
        Ok(())
    }

    fn check_height_round(&self, msg: &CanonicalMessage) -> Result<()> {
        let height = msg.height.as_ref().ok_or_else(|| anyhow!("message without height"))?;
        if *height != BigUint::from(self.state.height) {
            bail!("height mismatch: engine at {}, message at {height}", self.state.height);
        }
        if let Some(round) = &msg.round {
            if *round != BigUint::from(self.state.round) {
                bail!("round mismatch: engine at {}, message at {round}", self.state.round);
            }
        }
        Ok(())
    }
}

/// A four-validator set with equal power, the default test topology.
pub fn default_validator_set() -> Vec<SimValidator> {
    (0..4)
        .map(|i| SimValidator {
            address: format!("validator-{i}"),
            pub_key: format!("pubkey-{i}"),
            voting_power: 100,
            proposer_priority: (4 - i) as i64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MsgType;

    fn engine() -> SimulatedEngine {
        SimulatedEngine::new(default_validator_set())
    }

    fn vote(engine: &SimulatedEngine, validator: &str, msg_type: MsgType) -> CanonicalMessage {
        CanonicalMessage::new("sim-chain", msg_type)
            .with_height(engine.state().height)
            .with_round(engine.state().round as u64)
            .with_timestamp(Utc::now())
            .with_validator(validator)
    }

    #[test]
    fn test_round_robin_proposer() {
        let mut sim = engine();
        assert_eq!(sim.proposer(), "validator-0");
        sim.advance_round();
        assert_eq!(sim.proposer(), "validator-1");
        sim.advance_round();
        sim.advance_round();
        sim.advance_round();
        // wraps around after |validators| rounds
        assert_eq!(sim.proposer(), "validator-0");
    }

    #[test]
    fn test_step_progression() {
        let mut sim = engine();
        let proposal = CanonicalMessage::new("sim-chain", MsgType::Proposal)
            .with_height(0)
            .with_round(0)
            .with_timestamp(Utc::now())
            .with_proposer("validator-0");
        sim.process_message(&proposal).expect("proposal");
        assert_eq!(sim.state().step, ConsensusStep::Propose);

        let prevote = vote(&sim, "validator-1", MsgType::Prevote);
        sim.process_message(&prevote).expect("prevote");
        assert_eq!(sim.state().step, ConsensusStep::Prevote);

        let precommit = vote(&sim, "validator-2", MsgType::Precommit);
        sim.process_message(&precommit).expect("precommit");
        assert!(sim.consensus_reached());
    }

    #[test]
    fn test_wrong_proposer_rejected() {
        let mut sim = engine();
        let proposal = CanonicalMessage::new("sim-chain", MsgType::Proposal)
            .with_height(0)
            .with_round(0)
            .with_proposer("validator-3");
        assert!(sim.process_message(&proposal).is_err());
    }

    #[test]
    fn test_unknown_validator_rejected() {
        let mut sim = engine();
        let prevote = vote(&sim, "intruder", MsgType::Prevote);
        assert!(sim.process_message(&prevote).is_err());
    }

    #[test]
    fn test_height_mismatch_rejected() {
        let mut sim = engine();
        let prevote = CanonicalMessage::new("sim-chain", MsgType::Prevote)
            .with_height(99)
            .with_round(0)
            .with_validator("validator-1");
        assert!(sim.process_message(&prevote).is_err());
    }

    #[test]
    fn test_advance_height_resets_round() {
        let mut sim = engine();
        sim.advance_round();
        sim.advance_height(5);
        assert_eq!(sim.state().height, 5);
        assert_eq!(sim.state().round, 0);
        assert_eq!(sim.state().last_commit_height, Some(0));
    }

    #[test]
    fn test_block_hash_deterministic() {
        let sim = engine();
        let a = sim.generate_block_hash(10, 1, "validator-0");
        let b = sim.generate_block_hash(10, 1, "validator-0");
        assert_eq!(a, b);
        assert_ne!(a, sim.generate_block_hash(10, 2, "validator-0"));
        assert_eq!(a.len(), 64);
    }
}
