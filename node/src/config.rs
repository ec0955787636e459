//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use agora_governance::{GovernanceParams, BPS_DENOMINATOR};
use agora_types::Identity;

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for an Agora node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Whether to enable the RPC server.
    #[serde(default = "default_true")]
    pub enable_rpc: bool,

    /// Address the RPC server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// RPC port (if enabled). 0 picks a free port.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often expired proposals are tallied.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Timeout for compliance checks and executor calls.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Identities allowed to revert proposals and change the threshold.
    #[serde(default)]
    pub administrators: Vec<String>,

    /// Proposers the standard compliance policy always rejects.
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Starting balances of the in-memory account service.
    #[serde(default)]
    pub initial_balances: BTreeMap<String, u64>,

    /// Weight delegated to each representative. When empty, a vote counts at
    /// most the stake it escrows.
    #[serde(default)]
    pub delegations: BTreeMap<String, u64>,

    /// Governance parameters (`[governance]` table).
    #[serde(default)]
    pub governance: GovernanceParams,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_rpc_port() -> u16 {
    7077
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.log_format()?;
        if self.sweep_interval_secs == 0 {
            return Err(NodeError::Config("sweep_interval_secs must be non-zero".into()));
        }
        if self.default_timeout_ms == 0 {
            return Err(NodeError::Config("default_timeout_ms must be non-zero".into()));
        }
        if self.governance.voting_period_secs == 0 {
            return Err(NodeError::Config(
                "governance.voting_period_secs must be non-zero".into(),
            ));
        }
        if u128::from(self.governance.initial_threshold_bps) > BPS_DENOMINATOR {
            return Err(NodeError::Config(format!(
                "governance.initial_threshold_bps must be at most {BPS_DENOMINATOR}, got {}",
                self.governance.initial_threshold_bps
            )));
        }
        self.administrator_ids()?;
        self.blacklist_ids()?;
        for name in self.delegations.keys() {
            parse_identity("delegations", name)?;
        }
        for name in self.initial_balances.keys() {
            parse_identity("initial_balances", name)?;
        }
        Ok(())
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.rpc_port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn administrator_ids(&self) -> Result<Vec<Identity>, NodeError> {
        self.administrators
            .iter()
            .map(|name| parse_identity("administrators", name))
            .collect()
    }

    pub fn blacklist_ids(&self) -> Result<Vec<Identity>, NodeError> {
        self.blacklist
            .iter()
            .map(|name| parse_identity("blacklist", name))
            .collect()
    }
}

fn parse_identity(field: &str, raw: &str) -> Result<Identity, NodeError> {
    Identity::parse(raw).map_err(|e| NodeError::Config(format!("{field}: {e}")))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enable_rpc: default_true(),
            bind_address: default_bind_address(),
            rpc_port: default_rpc_port(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_timeout_ms: default_timeout_ms(),
            administrators: Vec::new(),
            blacklist: Vec::new(),
            initial_balances: BTreeMap::new(),
            delegations: BTreeMap::new(),
            governance: GovernanceParams::default(),
        }
    }
}
