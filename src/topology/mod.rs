//! Static description of the cluster: which nodes exist, which of them are
//! masters, which replicas follow which master, and the default node used for
//! commands that are not key-routed.
//!
//! The topology is loaded once and never changes for the lifetime of a
//! client; the number of masters fixes the shard count.

mod address;

pub use address::NodeAddress;

use crate::core::{ClusterError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Role a node plays in the topology (or reports about itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "master" | "primary" => Ok(Self::Master),
            "replica" | "slave" => Ok(Self::Replica),
            other => Err(ClusterError::Configuration(format!(
                "unknown node role '{}'",
                other
            ))),
        }
    }
}

/// Cluster layout: node aliases, master → replicas relation, default node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: BTreeMap<String, NodeAddress>,
    #[serde(default, deserialize_with = "replicas_one_or_many")]
    pub master_of: BTreeMap<String, Vec<String>>,
    pub default_node: String,
    /// Explicit shard order of the masters. Natural alias order when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn replicas_one_or_many<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(master, replicas)| match replicas {
            OneOrMany::One(replica) => (master, vec![replica]),
            OneOrMany::Many(replicas) => (master, replicas),
        })
        .collect())
}

impl Topology {
    /// Starts an empty topology with the given default node alias.
    pub fn new(default_node: impl Into<String>) -> Self {
        Self {
            nodes: BTreeMap::new(),
            master_of: BTreeMap::new(),
            default_node: default_node.into(),
            shards: None,
        }
    }

    /// Adds (or replaces) a node.
    pub fn node(mut self, alias: impl Into<String>, address: NodeAddress) -> Self {
        self.nodes.insert(alias.into(), address);
        self
    }

    /// Declares `replica` as a replica of `master`.
    pub fn replica(mut self, master: impl Into<String>, replica: impl Into<String>) -> Self {
        self.master_of
            .entry(master.into())
            .or_default()
            .push(replica.into());
        self
    }

    /// Pins the shard order of the masters.
    pub fn shard_order(mut self, masters: Vec<String>) -> Self {
        self.shards = Some(masters);
        self
    }

    /// Parses and validates a JSON topology document.
    pub fn from_json(json: &str) -> Result<Self> {
        let topology: Topology = serde_json::from_str(json)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Reads, parses and validates a JSON topology file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ClusterError::from)
    }

    /// Checks the topology invariants.
    ///
    /// - `nodes` is non-empty and `default_node` is one of them,
    /// - every alias in `master_of` exists in `nodes`,
    /// - a replica follows exactly one master and masters are not replicas,
    /// - an explicit shard order names every master exactly once.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(ClusterError::Configuration(
                "topology must declare at least one node".to_string(),
            ));
        }
        for alias in self.nodes.keys() {
            if alias.trim().is_empty() {
                return Err(ClusterError::Configuration(
                    "node alias must not be empty".to_string(),
                ));
            }
        }
        if !self.nodes.contains_key(&self.default_node) {
            return Err(ClusterError::Configuration(format!(
                "default node '{}' is not declared in nodes",
                self.default_node
            )));
        }

        let mut owner: HashMap<&str, &str> = HashMap::new();
        for (master, replicas) in &self.master_of {
            if !self.nodes.contains_key(master) {
                return Err(ClusterError::Configuration(format!(
                    "master '{}' in master_of is not declared in nodes",
                    master
                )));
            }
            for replica in replicas {
                if !self.nodes.contains_key(replica) {
                    return Err(ClusterError::Configuration(format!(
                        "replica '{}' of master '{}' is not declared in nodes",
                        replica, master
                    )));
                }
                if replica == master {
                    return Err(ClusterError::Configuration(format!(
                        "node '{}' cannot replicate itself",
                        master
                    )));
                }
                if let Some(previous) = owner.insert(replica.as_str(), master.as_str()) {
                    return Err(ClusterError::Configuration(format!(
                        "replica '{}' is assigned to both '{}' and '{}'",
                        replica, previous, master
                    )));
                }
            }
        }
        for master in self.master_of.keys() {
            if let Some(upstream) = owner.get(master.as_str()) {
                return Err(ClusterError::Configuration(format!(
                    "node '{}' is both a master and a replica of '{}'",
                    master, upstream
                )));
            }
        }

        if let Some(order) = &self.shards {
            let masters: HashSet<String> = self.natural_masters().into_iter().collect();
            let mut seen = HashSet::new();
            for alias in order {
                if !masters.contains(alias) {
                    return Err(ClusterError::Configuration(format!(
                        "shard order names '{}', which is not a master",
                        alias
                    )));
                }
                if !seen.insert(alias) {
                    return Err(ClusterError::Configuration(format!(
                        "shard order names '{}' more than once",
                        alias
                    )));
                }
            }
            if seen.len() != masters.len() {
                return Err(ClusterError::Configuration(format!(
                    "shard order lists {} masters, topology has {}",
                    seen.len(),
                    masters.len()
                )));
            }
        }

        Ok(())
    }

    /// Masters in shard order: index `i` of the result owns shard `i`.
    pub fn masters(&self) -> Vec<String> {
        match &self.shards {
            Some(order) => order.clone(),
            None => self.natural_masters(),
        }
    }

    /// Every node alias in natural order (`node_2` before `node_10`).
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.nodes.keys().cloned().collect();
        aliases.sort_by_key(|alias| natural_key(alias));
        aliases
    }

    /// Number of shards, i.e. number of masters.
    pub fn shard_count(&self) -> usize {
        self.nodes.len() - self.replica_aliases().len()
    }

    /// Replicas of a master, in declaration order.
    pub fn replicas_of(&self, master: &str) -> &[String] {
        self.master_of
            .get(master)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The master a replica follows.
    pub fn master_of_replica(&self, replica: &str) -> Option<&str> {
        self.master_of
            .iter()
            .find(|(_, replicas)| replicas.iter().any(|r| r == replica))
            .map(|(master, _)| master.as_str())
    }

    pub fn role_of(&self, alias: &str) -> NodeRole {
        if self.master_of_replica(alias).is_some() {
            NodeRole::Replica
        } else {
            NodeRole::Master
        }
    }

    pub fn address(&self, alias: &str) -> Option<&NodeAddress> {
        self.nodes.get(alias)
    }

    fn replica_aliases(&self) -> HashSet<&str> {
        self.master_of
            .values()
            .flatten()
            .map(String::as_str)
            .collect()
    }

    fn natural_masters(&self) -> Vec<String> {
        let replicas = self.replica_aliases();
        let mut masters: Vec<String> = self
            .nodes
            .keys()
            .filter(|alias| !replicas.contains(alias.as_str()))
            .cloned()
            .collect();
        masters.sort_by_key(|alias| natural_key(alias));
        masters
    }
}

/// Sort key splitting a trailing number off the alias, so that `node_2`
/// sorts before `node_10`.
fn natural_key(alias: &str) -> (String, u64, String) {
    let digits = alias.len() - alias.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (prefix, suffix) = alias.split_at(alias.len() - digits);
    let number = suffix.parse::<u64>().unwrap_or(0);
    (prefix.to_string(), number, alias.to_string())
}
