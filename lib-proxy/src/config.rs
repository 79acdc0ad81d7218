//! Proxy engine configuration
//!
//! Built once from CLI-level options, validated, then immutable for the
//! lifetime of `Engine::run`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use num_bigint::BigUint;
use thiserror::Error;

use lib_codec::{ByzantineAction, ByzantineOptions, CanonicalMessage};

use crate::node_key::NodeKey;

/// Default timeout for dialing the upstream validator.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("node key is required")]
    MissingNodeKey,

    #[error("chain id is required")]
    MissingChainId,

    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    #[error("invalid upstream address: {0}")]
    InvalidUpstreamAddress(String),

    #[error("unknown direction {0:?}")]
    InvalidDirection(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),
}

/// Which link has mutations applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Mutate messages originating from the upstream validator before they
    /// reach external peers.
    #[default]
    Upstream,
    /// Mutate messages heading to the upstream validator.
    Downstream,
    /// Mutate both directions.
    Both,
}

impl Direction {
    pub fn should_mutate_upstream(&self) -> bool {
        matches!(self, Direction::Upstream | Direction::Both)
    }

    pub fn should_mutate_downstream(&self) -> bool {
        matches!(self, Direction::Downstream | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
            Direction::Both => "both",
        };
        f.write_str(name)
    }
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "upstream" => Ok(Direction::Upstream),
            "downstream" => Ok(Direction::Downstream),
            "both" => Ok(Direction::Both),
            other => Err(ConfigError::InvalidDirection(other.to_string())),
        }
    }
}

/// Conjunction of optional predicates arming the mutation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trigger {
    pub height: Option<u64>,
    pub round: Option<u64>,
    /// Canonical type name (`proposal`, `prevote`, `precommit`, ...).
    pub step: Option<String>,
}

impl Trigger {
    /// True when every configured predicate holds for the message.
    pub fn matches(&self, msg: &CanonicalMessage) -> bool {
        if let Some(height) = self.height {
            match &msg.height {
                Some(h) if *h == BigUint::from(height) => {}
                _ => return false,
            }
        }
        if let Some(round) = self.round {
            match &msg.round {
                Some(r) if *r == BigUint::from(round) => {}
                _ => return false,
            }
        }
        if let Some(step) = &self.step {
            if !step.is_empty() && msg.msg_type.as_str() != step.to_ascii_lowercase() {
                return false;
            }
        }
        true
    }

    /// True when no predicate is configured; every message matches.
    pub fn is_empty(&self) -> bool {
        self.height.is_none()
            && self.round.is_none()
            && self.step.as_deref().map_or(true, str::is_empty)
    }
}

/// Behavioural hooks applied around mutated forwarding.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Hooks {
    pub delay: Duration,
    pub drop: bool,
    pub duplicate: bool,
}

/// Inputs to build a [`ProxyConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProxyConfigOptions {
    /// URL-ish listen address, `[scheme://]host:port`, default scheme `tcp`.
    pub listen_address: String,
    pub upstream_target: String,
    pub chain_id: String,
    pub node_key: Option<NodeKey>,
    pub action: ByzantineAction,
    pub options: ByzantineOptions,
    pub trigger: Trigger,
    pub hooks: Hooks,
    pub direction: Direction,
    pub dial_timeout: Option<Duration>,
}

/// The validated, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_network: String,
    pub listen_address: String,
    pub upstream_network: String,
    pub upstream_address: String,
    pub chain_id: String,
    pub node_key: NodeKey,
    pub action: ByzantineAction,
    pub options: ByzantineOptions,
    pub trigger: Trigger,
    pub hooks: Hooks,
    pub direction: Direction,
    pub dial_timeout: Duration,
}

impl ProxyConfig {
    /// Validate and normalise proxy options.
    pub fn new(opts: ProxyConfigOptions) -> Result<Self, ConfigError> {
        let (listen_network, listen_address) = parse_network_address(&opts.listen_address)
            .map_err(ConfigError::InvalidListenAddress)?;
        let (upstream_network, upstream_address) = parse_network_address(&opts.upstream_target)
            .map_err(ConfigError::InvalidUpstreamAddress)?;

        let node_key = opts.node_key.ok_or(ConfigError::MissingNodeKey)?;
        let chain_id = opts.chain_id.trim().to_string();
        if chain_id.is_empty() {
            return Err(ConfigError::MissingChainId);
        }

        let trigger = Trigger {
            height: opts.trigger.height,
            round: opts.trigger.round,
            step: opts
                .trigger
                .step
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty()),
        };

        let dial_timeout = match opts.dial_timeout {
            Some(t) if !t.is_zero() => t,
            _ => DEFAULT_DIAL_TIMEOUT,
        };

        Ok(Self {
            listen_network,
            listen_address,
            upstream_network,
            upstream_address,
            chain_id,
            node_key,
            action: opts.action,
            options: opts.options,
            trigger,
            hooks: opts.hooks,
            direction: opts.direction,
            dial_timeout,
        })
    }
}

/// Split `[scheme://]host:port` into `(network, address)`, defaulting the
/// scheme to `tcp`.
pub fn parse_network_address(raw: &str) -> Result<(String, String), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("address cannot be empty".to_string());
    }
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Ok(("tcp".to_string(), raw.to_string()));
    };
    if scheme.is_empty() {
        return Err(format!("missing scheme in {raw:?}"));
    }
    if rest.is_empty() {
        return Err(format!("missing host in {raw:?}"));
    }
    Ok((scheme.to_ascii_lowercase(), rest.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_codec::MsgType;

    fn options() -> ProxyConfigOptions {
        ProxyConfigOptions {
            listen_address: "tcp://0.0.0.0:26656".into(),
            upstream_target: "127.0.0.1:26657".into(),
            chain_id: "test-chain".into(),
            node_key: Some(NodeKey::generate()),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_builds_with_defaults() {
        let cfg = ProxyConfig::new(options()).expect("config");
        assert_eq!(cfg.listen_network, "tcp");
        assert_eq!(cfg.listen_address, "0.0.0.0:26656");
        assert_eq!(cfg.upstream_network, "tcp");
        assert_eq!(cfg.upstream_address, "127.0.0.1:26657");
        assert_eq!(cfg.dial_timeout, DEFAULT_DIAL_TIMEOUT);
    }

    #[test]
    fn test_missing_node_key() {
        let mut opts = options();
        opts.node_key = None;
        assert_eq!(ProxyConfig::new(opts).unwrap_err(), ConfigError::MissingNodeKey);
    }

    #[test]
    fn test_missing_chain_id() {
        let mut opts = options();
        opts.chain_id = "   ".into();
        assert_eq!(ProxyConfig::new(opts).unwrap_err(), ConfigError::MissingChainId);
    }

    #[test]
    fn test_invalid_addresses() {
        let mut opts = options();
        opts.listen_address = "".into();
        assert!(matches!(
            ProxyConfig::new(opts).unwrap_err(),
            ConfigError::InvalidListenAddress(_)
        ));

        let mut opts = options();
        opts.upstream_target = "tcp://".into();
        assert!(matches!(
            ProxyConfig::new(opts).unwrap_err(),
            ConfigError::InvalidUpstreamAddress(_)
        ));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("".parse::<Direction>().unwrap(), Direction::Upstream);
        assert_eq!("Both".parse::<Direction>().unwrap(), Direction::Both);
        assert!(matches!(
            "sideways".parse::<Direction>().unwrap_err(),
            ConfigError::InvalidDirection(_)
        ));
        assert!(Direction::Both.should_mutate_upstream());
        assert!(Direction::Both.should_mutate_downstream());
        assert!(!Direction::Upstream.should_mutate_downstream());
    }

    #[test]
    fn test_trigger_conjunction() {
        let msg = CanonicalMessage::new("test-chain", MsgType::Prevote)
            .with_height(5)
            .with_round(1);

        let all = Trigger { height: Some(5), round: Some(1), step: Some("prevote".into()) };
        assert!(all.matches(&msg));

        let wrong_height = Trigger { height: Some(6), ..all.clone() };
        assert!(!wrong_height.matches(&msg));

        let wrong_round = Trigger { round: Some(2), ..all.clone() };
        assert!(!wrong_round.matches(&msg));

        let wrong_step = Trigger { step: Some("proposal".into()), ..all };
        assert!(!wrong_step.matches(&msg));

        // No predicates: everything matches.
        assert!(Trigger::default().matches(&msg));
        assert!(Trigger::default().is_empty());
    }

    #[test]
    fn test_trigger_step_is_case_insensitive() {
        let msg = CanonicalMessage::new("test-chain", MsgType::Proposal).with_height(7);
        let trigger = Trigger { step: Some("Proposal".into()), ..Default::default() };
        assert!(trigger.matches(&msg));
    }

    #[test]
    fn test_trigger_absent_field_fails_predicate() {
        let msg = CanonicalMessage::new("test-chain", MsgType::Prevote);
        let trigger = Trigger { height: Some(5), ..Default::default() };
        assert!(!trigger.matches(&msg));
    }

    #[test]
    fn test_step_normalised_during_build() {
        let mut opts = options();
        opts.trigger.step = Some("  PreVote ".into());
        let cfg = ProxyConfig::new(opts).expect("config");
        assert_eq!(cfg.trigger.step.as_deref(), Some("prevote"));
    }
}
