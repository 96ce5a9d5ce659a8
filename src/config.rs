//! Cluster configuration: the JSON file handed to every node at startup
//! naming every member's address (spec §6.1/§6.4). Loading is swapped from
//! the teacher's TOML `Config::load` to `serde_json`, matching
//! `original_source/src/message_queue_server.py`'s
//! `json.load(config_file)['addresses']`.
//!
//! Field names are `camelCase` on the wire (SPEC_FULL §4.6): unlike the
//! teacher's TOML-internal config, this file is a cross-implementation JSON
//! contract, so the same rename discipline as the peer RPC bodies applies.

use std::fs;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;
use crate::wire::NodeAddr;

fn default_election_timeout_min_ms() -> u64 {
    150
}
fn default_election_timeout_max_ms() -> u64 {
    300
}
fn default_tick_interval_ms() -> u64 {
    20
}
fn default_heartbeat_interval_ms() -> u64 {
    20
}
fn default_rpc_timeout_ms() -> u64 {
    100
}
fn default_fanout_pool_size() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFile {
    pub addresses: Vec<NodeAddr>,

    #[serde(default = "default_election_timeout_min_ms")]
    pub election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    pub election_timeout_max_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Cadence at which a leader drives a replication/heartbeat round
    /// (spec §4.3), independent of the engine's own tick granularity.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Bound on concurrent outbound peer RPCs per election/replication
    /// round (spec §5's "bounded pool — default 5").
    #[serde(default = "default_fanout_pool_size")]
    pub fanout_pool_size: usize,
}

impl ClusterFile {
    pub fn load(path: &str) -> Result<Self, BrokerError> {
        let contents =
            fs::read_to_string(path).map_err(|e| BrokerError::Config(format!("reading {path}: {e}")))?;
        let file: ClusterFile =
            serde_json::from_str(&contents).map_err(|e| BrokerError::Config(format!("parsing {path}: {e}")))?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), BrokerError> {
        if self.addresses.is_empty() {
            return Err(BrokerError::Config("cluster file lists no addresses".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for addr in &self.addresses {
            if !seen.insert((addr.ip.clone(), addr.port)) {
                return Err(BrokerError::Config(format!("duplicate address {}:{}", addr.ip, addr.port)));
            }
        }
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(BrokerError::Config(
                "electionTimeoutMinMs must be less than electionTimeoutMaxMs".to_string(),
            ));
        }
        if self.fanout_pool_size == 0 {
            return Err(BrokerError::Config("fanoutPoolSize must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn address_for(&self, index: usize) -> Result<&NodeAddr, BrokerError> {
        self.addresses
            .get(index)
            .ok_or_else(|| BrokerError::Config(format!("node index {index} out of range (cluster has {} members)", self.addresses.len())))
    }

    pub fn election_timeout_range(&self) -> (Duration, Duration) {
        (Duration::from_millis(self.election_timeout_min_ms), Duration::from_millis(self.election_timeout_max_ms))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed(addresses: Vec<NodeAddr>) -> ClusterFile {
        ClusterFile {
            addresses,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            tick_interval_ms: 20,
            heartbeat_interval_ms: 20,
            rpc_timeout_ms: 100,
            fanout_pool_size: 5,
        }
    }

    #[test]
    fn rejects_empty_address_list() {
        let file = well_formed(vec![]);
        assert!(file.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let file = well_formed(vec![
            NodeAddr { ip: "127.0.0.1".into(), port: 9000 },
            NodeAddr { ip: "127.0.0.1".into(), port: 9000 },
        ]);
        assert!(file.validate().is_err());
    }

    #[test]
    fn rejects_zero_fanout_pool_size() {
        let mut file =
            well_formed(vec![NodeAddr { ip: "127.0.0.1".into(), port: 9000 }]);
        file.fanout_pool_size = 0;
        assert!(file.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_file() {
        let file = well_formed(vec![
            NodeAddr { ip: "127.0.0.1".into(), port: 9000 },
            NodeAddr { ip: "127.0.0.1".into(), port: 9001 },
        ]);
        assert!(file.validate().is_ok());
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let file = well_formed(vec![NodeAddr { ip: "127.0.0.1".into(), port: 9000 }]);
        let value = serde_json::to_value(&file).unwrap();
        assert!(value.get("electionTimeoutMinMs").is_some());
        assert!(value.get("heartbeatIntervalMs").is_some());
        assert!(value.get("fanoutPoolSize").is_some());
    }
}
