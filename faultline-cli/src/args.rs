//! Command-line surface of the faultline proxy

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Byzantine fault-injection proxy for BFT consensus links
#[derive(Parser, Debug, Clone)]
#[command(name = "faultline")]
#[command(author, version, about, long_about = None)]
pub struct FaultlineArgs {
    /// Address to accept external peers (tcp://host:port)
    #[arg(long, default_value = "tcp://0.0.0.0:26656")]
    pub listen: String,

    /// Address of the upstream validator (tcp://host:port)
    #[arg(long, default_value = "tcp://127.0.0.1:26657")]
    pub upstream: String,

    /// Path to the node_key.json used for the proxy handshake
    #[arg(long = "node-key")]
    pub node_key: PathBuf,

    /// Chain identifier used for canonical mapping
    #[arg(long = "chain-id", default_value = "proxy-chain")]
    pub chain_id: String,

    /// Byzantine action to apply (none|double_vote|double_proposal|alter_validator|drop_signature|timestamp_skew)
    #[arg(long, default_value = "none")]
    pub attack: String,

    /// Height at which mutations activate (0 disables)
    #[arg(long = "trigger-height", default_value_t = 0)]
    pub trigger_height: u64,

    /// Round at which mutations activate (0 disables)
    #[arg(long = "trigger-round", default_value_t = 0)]
    pub trigger_round: u64,

    /// Canonical message type (proposal|prevote|precommit) required for mutation
    #[arg(long = "trigger-step", default_value = "")]
    pub trigger_step: String,

    /// Delay applied to triggered messages before forwarding (e.g. 200ms)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "0s")]
    pub delay: Duration,

    /// Drop triggered messages instead of forwarding
    #[arg(long)]
    pub drop: bool,

    /// Duplicate triggered messages after mutation
    #[arg(long)]
    pub duplicate: bool,

    /// Alternate block hash used during mutation
    #[arg(long = "alternate-block")]
    pub alternate_block: Option<String>,

    /// Alternate previous block hash used during mutation
    #[arg(long = "alternate-prev-hash")]
    pub alternate_prev_hash: Option<String>,

    /// Alternate signature for forged messages
    #[arg(long = "alternate-signature")]
    pub alternate_signature: Option<String>,

    /// Alternate validator/proposer identifier
    #[arg(long = "alternate-validator")]
    pub alternate_validator: Option<String>,

    /// Offset applied to the canonical round when mutating
    #[arg(long = "round-offset", default_value_t = 0, allow_hyphen_values = true)]
    pub round_offset: i64,

    /// Offset applied to the canonical height when mutating
    #[arg(long = "height-offset", default_value_t = 0, allow_hyphen_values = true)]
    pub height_offset: i64,

    /// Signed duration applied to canonical timestamps when mutating (e.g. 2s, -500ms)
    #[arg(long = "timestamp-skew", default_value = "0s", allow_hyphen_values = true)]
    pub timestamp_skew: String,

    /// Timeout used when dialing the upstream validator
    #[arg(long = "dial-timeout", value_parser = humantime::parse_duration, default_value = "5s")]
    pub dial_timeout: Duration,

    /// Direction to apply mutations (upstream|downstream|both)
    #[arg(long = "mutate-direction", default_value = "upstream")]
    pub mutate_direction: String,
}
