use super::{ClusterOptions, NodeConnection, NodeConnector};
use crate::core::{Arg, ClusterError, Reply, Result};
use crate::storage::{MemoryStore, StoreError, is_write_command};
use crate::topology::{NodeAddress, NodeRole, Topology};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::sync::Mutex;

/// An in-process node serving a [`MemoryStore`].
///
/// A replica server shares its master's store, which stands in for
/// replication, and refuses writes. Handles are cheap to clone and all clones
/// observe the same server, so tests keep one to take the node down, inject
/// connection failures or inspect the traffic it received.
#[derive(Clone)]
pub struct MemoryServer {
    store: Arc<Mutex<MemoryStore>>,
    role: NodeRole,
    online: Arc<AtomicBool>,
    refused_connects: Arc<AtomicU32>,
    calls: Arc<AtomicU64>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryServer {
    /// A master with an empty store.
    pub fn master() -> Self {
        Self::with_store(Arc::new(Mutex::new(MemoryStore::new())), NodeRole::Master)
    }

    /// A read-only replica following `master`.
    pub fn replica_of(master: &MemoryServer) -> Self {
        Self::with_store(master.store.clone(), NodeRole::Replica)
    }

    fn with_store(store: Arc<Mutex<MemoryStore>>, role: NodeRole) -> Self {
        Self {
            store,
            role,
            online: Arc::new(AtomicBool::new(true)),
            refused_connects: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicU64::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same server reporting `role` through `ROLE`, whatever it really is.
    pub fn reporting(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Takes the server down: new connections are refused and calls on
    /// existing ones fail.
    pub fn shutdown(&self) {
        self.online.store(false, Ordering::SeqCst);
    }

    pub fn restart(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    /// Refuses the next `attempts` connection attempts.
    pub fn refuse_connections(&self, attempts: u32) {
        self.refused_connects.store(attempts, Ordering::SeqCst);
    }

    /// Number of commands this server has received.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lower-cased names of the commands received so far, in arrival order.
    pub async fn commands(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }

    pub async fn clear_log(&self) {
        self.log.lock().await.clear();
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Runs a command straight against the store, bypassing routing.
    pub async fn execute(&self, db: u32, command: &str, args: &[&str]) -> Reply {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut store = self.store.lock().await;
        store
            .execute(db, command, &owned)
            .unwrap_or_else(|err| Reply::Status(err.to_string()))
    }

    fn accept_connection(&self) -> bool {
        if !self.is_online() {
            return false;
        }
        self.refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_err()
    }
}

/// Connector resolving node addresses to registered [`MemoryServer`]s.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    servers: Arc<Mutex<HashMap<String, MemoryServer>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boots one server per topology node: a master for every master and a
    /// replica sharing its master's store for every replica.
    pub fn for_topology(topology: &Topology) -> Self {
        let mut servers = HashMap::new();
        for master in topology.masters() {
            let primary = MemoryServer::master();
            for replica in topology.replicas_of(&master) {
                if let Some(address) = topology.address(replica) {
                    servers.insert(address.to_string(), MemoryServer::replica_of(&primary));
                }
            }
            if let Some(address) = topology.address(&master) {
                servers.insert(address.to_string(), primary);
            }
        }
        Self {
            servers: Arc::new(Mutex::new(servers)),
        }
    }

    pub async fn register(&self, address: &NodeAddress, server: MemoryServer) {
        self.servers
            .lock()
            .await
            .insert(address.to_string(), server);
    }

    pub async fn server(&self, address: &NodeAddress) -> Option<MemoryServer> {
        self.servers.lock().await.get(&address.to_string()).cloned()
    }

    /// Server listening at the address of topology node `alias`.
    pub async fn node(&self, topology: &Topology, alias: &str) -> Option<MemoryServer> {
        let address = topology.address(alias)?;
        self.server(address).await
    }
}

#[async_trait]
impl NodeConnector for MemoryConnector {
    async fn connect(
        &self,
        alias: &str,
        address: &NodeAddress,
        _options: &ClusterOptions,
    ) -> Result<Box<dyn NodeConnection>> {
        let server = self.server(address).await.ok_or_else(|| {
            ClusterError::NodeUnreachable {
                alias: alias.to_string(),
                reason: format!("nothing listening at {}", address),
            }
        })?;

        if !server.accept_connection() {
            return Err(ClusterError::NodeUnreachable {
                alias: alias.to_string(),
                reason: format!("connection refused by {}", address),
            });
        }

        Ok(Box::new(MemoryConnection {
            alias: alias.to_string(),
            server,
            database: AtomicU32::new(0),
        }))
    }
}

/// Connection to a [`MemoryServer`]; remembers the selected database.
pub struct MemoryConnection {
    alias: String,
    server: MemoryServer,
    database: AtomicU32,
}

impl MemoryConnection {
    pub fn database(&self) -> u32 {
        self.database.load(Ordering::SeqCst)
    }

    fn fail(&self, message: impl Into<String>) -> ClusterError {
        ClusterError::invocation(&self.alias, message)
    }
}

#[async_trait]
impl NodeConnection for MemoryConnection {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn call(&self, command: &str, args: &[Arg]) -> Result<Reply> {
        if !self.server.is_online() {
            return Err(ClusterError::lost(&self.alias, "server went away"));
        }

        let name = command.to_ascii_lowercase();
        self.server.calls.fetch_add(1, Ordering::SeqCst);
        self.server.log.lock().await.push(name.clone());

        let wire = Arg::flatten(args);
        match name.as_str() {
            "select" => {
                let db = wire
                    .first()
                    .and_then(|db| db.parse::<u32>().ok())
                    .ok_or_else(|| self.fail("ERR invalid DB index"))?;
                self.database.store(db, Ordering::SeqCst);
                Ok(Reply::ok())
            }
            "role" => Ok(Reply::Array(vec![Reply::Bulk(self.server.role.to_string())])),
            "info" => {
                let mut store = self.server.store.lock().await;
                let stats = store
                    .execute(self.database(), "info", &wire)
                    .map_err(|err| self.fail(err.to_string()))?;
                let mut entries = vec![("role".to_string(), Reply::Bulk(self.server.role.to_string()))];
                entries.extend(stats.into_map().unwrap_or_default());
                Ok(Reply::Map(entries))
            }
            _ => {
                if self.server.role == NodeRole::Replica && is_write_command(&name) {
                    return Err(self.fail(StoreError::ReadOnly.to_string()));
                }
                let mut store = self.server.store.lock().await;
                store
                    .execute(self.database(), &name, &wire)
                    .map_err(|err| self.fail(err.to_string()))
            }
        }
    }
}
