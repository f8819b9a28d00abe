#![allow(dead_code)]

use kvshard::{ClusterOptions, MemoryConnector, MemoryServer, ShardedClient, Topology};

/// Four masters; node_6 follows node_1 and node_5 follows node_2.
pub const TOPOLOGY: &str = r#"{
    "nodes": {
        "node_1": "127.0.0.1:6379",
        "node_2": "127.0.0.1:6380",
        "node_3": "127.0.0.1:6381",
        "node_4": "127.0.0.1:6382",
        "node_5": "127.0.0.1:6383",
        "node_6": "127.0.0.1:6384"
    },
    "master_of": {
        "node_1": "node_6",
        "node_2": "node_5"
    },
    "default_node": "node_1"
}"#;

pub const DATABASE: u32 = 4;

pub fn topology() -> Topology {
    Topology::from_json(TOPOLOGY).unwrap()
}

pub fn options() -> ClusterOptions {
    ClusterOptions::new().database(DATABASE)
}

pub struct Cluster {
    pub client: ShardedClient,
    pub connector: MemoryConnector,
    pub topology: Topology,
}

impl Cluster {
    pub async fn start() -> Self {
        Self::start_with(options()).await
    }

    pub async fn start_with(options: ClusterOptions) -> Self {
        let topology = topology();
        let connector = MemoryConnector::for_topology(&topology);
        let client = ShardedClient::connect(topology.clone(), &connector, options)
            .await
            .unwrap();
        Self {
            client,
            connector,
            topology,
        }
    }

    pub async fn server(&self, alias: &str) -> MemoryServer {
        self.connector.node(&self.topology, alias).await.unwrap()
    }

    /// First `key:N` owned by `master`.
    pub fn key_on(&self, master: &str) -> String {
        self.key_on_with_prefix("key", master)
    }

    pub fn key_on_with_prefix(&self, prefix: &str, master: &str) -> String {
        (0..10_000)
            .map(|i| format!("{}:{}", prefix, i))
            .find(|k| self.client.node_for(k).unwrap().alias == master)
            .unwrap()
    }

    /// Runs a command straight against a node's store, in the test database.
    pub async fn raw(&self, alias: &str, command: &str, args: &[&str]) -> kvshard::Reply {
        self.server(alias).await.execute(DATABASE, command, args).await
    }
}
