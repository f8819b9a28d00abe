//! One long-lived connection per topology node.

use crate::connection::{ClusterOptions, NodeConnection, NodeConnector};
use crate::core::{Arg, ClusterError, Result};
use crate::topology::{NodeAddress, NodeRole, Topology};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

struct NodeSlot {
    connection: Option<Box<dyn NodeConnection>>,
    reachable: AtomicBool,
    /// Set for replicas: where their traffic goes once they are unreachable.
    master: Option<String>,
}

/// Owns the node connections and resolves aliases to them.
///
/// Built once by [`NodeRegistry::connect`]; afterwards the only mutable state
/// is the per-node reachability flag.
pub struct NodeRegistry {
    topology: Arc<Topology>,
    slots: HashMap<String, NodeSlot>,
    aliases: Vec<String>,
}

impl NodeRegistry {
    /// Connects to every node of the topology, in alias order.
    ///
    /// Each connection is retried once. A replica that stays unreachable is
    /// recorded as such and its traffic falls back to its master for the
    /// lifetime of the registry; a master that stays unreachable fails the
    /// whole registry, since the shard count depends on the master set.
    pub async fn connect(
        topology: Arc<Topology>,
        connector: &dyn NodeConnector,
        options: &ClusterOptions,
    ) -> Result<Self> {
        topology.validate()?;
        options.validate().map_err(ClusterError::Configuration)?;

        let aliases = topology.aliases();
        let mut slots = HashMap::with_capacity(aliases.len());

        for alias in &aliases {
            let address = topology.address(alias).ok_or_else(|| {
                ClusterError::Configuration(format!("node '{}' has no address", alias))
            })?;
            let master = topology.master_of_replica(alias).map(str::to_string);

            let connection = match Self::open(alias, address, connector, options).await {
                Ok(connection) => connection,
                Err(err) => match &master {
                    Some(master) => {
                        warn!(
                            node = %alias,
                            %address,
                            master = %master,
                            error = %err,
                            "replica unreachable, falling back to its master"
                        );
                        slots.insert(
                            alias.clone(),
                            NodeSlot {
                                connection: None,
                                reachable: AtomicBool::new(false),
                                master: Some(master.clone()),
                            },
                        );
                        continue;
                    }
                    None => return Err(unreachable(alias, err)),
                },
            };

            if options.verify_roles {
                Self::verify_role(alias, connection.as_ref(), topology.role_of(alias)).await?;
            }

            if options.database != 0 {
                connection
                    .call("SELECT", &[Arg::Int(options.database as i64)])
                    .await
                    .map_err(|err| {
                        ClusterError::Configuration(format!(
                            "cannot select database {} on '{}': {}",
                            options.database, alias, err
                        ))
                    })?;
            }

            info!(node = %alias, %address, role = %topology.role_of(alias), "connected");
            slots.insert(
                alias.clone(),
                NodeSlot {
                    connection: Some(connection),
                    reachable: AtomicBool::new(true),
                    master,
                },
            );
        }

        Ok(Self {
            topology,
            slots,
            aliases,
        })
    }

    async fn open(
        alias: &str,
        address: &NodeAddress,
        connector: &dyn NodeConnector,
        options: &ClusterOptions,
    ) -> Result<Box<dyn NodeConnection>> {
        match Self::attempt(alias, address, connector, options).await {
            Ok(connection) => Ok(connection),
            Err(err) => {
                debug!(node = %alias, %address, error = %err, "connection failed, retrying once");
                Self::attempt(alias, address, connector, options).await
            }
        }
    }

    async fn attempt(
        alias: &str,
        address: &NodeAddress,
        connector: &dyn NodeConnector,
        options: &ClusterOptions,
    ) -> Result<Box<dyn NodeConnection>> {
        tokio::time::timeout(options.connect_timeout, connector.connect(alias, address, options))
            .await
            .map_err(|_| ClusterError::NodeUnreachable {
                alias: alias.to_string(),
                reason: format!(
                    "connect to {} timed out after {:?}",
                    address, options.connect_timeout
                ),
            })?
    }

    async fn verify_role(
        alias: &str,
        connection: &dyn NodeConnection,
        expected: NodeRole,
    ) -> Result<()> {
        let reported = connection.role().await.map_err(|err| {
            ClusterError::Configuration(format!("cannot verify role of '{}': {}", alias, err))
        })?;
        if reported != expected {
            return Err(ClusterError::Configuration(format!(
                "node '{}' reports role {} but the topology declares it {}",
                alias, reported, expected
            )));
        }
        Ok(())
    }

    /// Connection for `alias`. An unreachable replica resolves to its
    /// master's connection; an unreachable master resolves to nothing.
    pub fn get(&self, alias: &str) -> Option<&dyn NodeConnection> {
        let slot = self.slots.get(alias)?;
        if slot.reachable.load(Ordering::SeqCst)
            && let Some(connection) = &slot.connection
        {
            return Some(connection.as_ref());
        }
        let master = slot.master.as_deref()?;
        let master_slot = self.slots.get(master)?;
        if !master_slot.reachable.load(Ordering::SeqCst) {
            return None;
        }
        master_slot.connection.as_deref()
    }

    pub fn is_reachable(&self, alias: &str) -> bool {
        self.slots
            .get(alias)
            .is_some_and(|slot| slot.reachable.load(Ordering::SeqCst))
    }

    /// Records `alias` as unreachable; replicas then fall back to their master.
    pub fn mark_unreachable(&self, alias: &str) {
        if let Some(slot) = self.slots.get(alias)
            && slot.reachable.swap(false, Ordering::SeqCst)
        {
            warn!(node = %alias, "node marked unreachable");
        }
    }

    /// Every node alias, in alias order.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Masters in shard order.
    pub fn masters(&self) -> Vec<String> {
        self.topology.masters()
    }

    pub fn is_replica(&self, alias: &str) -> bool {
        self.slots
            .get(alias)
            .is_some_and(|slot| slot.master.is_some())
    }

    pub fn address(&self, alias: &str) -> Option<&NodeAddress> {
        self.topology.address(alias)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

fn unreachable(alias: &str, err: ClusterError) -> ClusterError {
    match err {
        ClusterError::NodeUnreachable { .. } => err,
        other => ClusterError::NodeUnreachable {
            alias: alias.to_string(),
            reason: other.to_string(),
        },
    }
}
