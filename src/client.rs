use crate::commands::CommandTable;
use crate::connection::{ClusterOptions, NodeConnector};
use crate::core::{Arg, Reply, Result};
use crate::dispatch::Dispatcher;
use crate::registry::NodeRegistry;
use crate::routing::KeyRouter;
use crate::topology::{NodeAddress, Topology};
use std::sync::Arc;
use tracing::info;

/// Master owning a key, as reported by [`ShardedClient::node_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
    pub alias: String,
    pub address: NodeAddress,
    pub shard: usize,
}

/// One logical handle over a fixed set of single-node stores.
///
/// # Examples
///
/// ```
/// use kvshard::{ClusterOptions, MemoryConnector, ShardedClient, Topology};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> kvshard::Result<()> {
/// let topology = Topology::from_json(r#"{
///     "nodes": {"node_1": "127.0.0.1:7001", "node_2": "127.0.0.1:7002"},
///     "default_node": "node_1"
/// }"#)?;
/// let connector = MemoryConnector::for_topology(&topology);
/// let client = ShardedClient::connect(topology, &connector, ClusterOptions::new()).await?;
///
/// client.set("user:{42}:name", "ada").await?;
/// assert_eq!(client.get("user:{42}:name").await?, Some("ada".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct ShardedClient {
    dispatcher: Dispatcher,
}

impl ShardedClient {
    /// Connects to every node of `topology` with the standard command table.
    pub async fn connect(
        topology: Topology,
        connector: &dyn NodeConnector,
        options: ClusterOptions,
    ) -> Result<Self> {
        Self::connect_with_table(topology, connector, options, CommandTable::global()).await
    }

    /// Same as [`connect`](Self::connect) with a custom command table.
    pub async fn connect_with_table(
        topology: Topology,
        connector: &dyn NodeConnector,
        options: ClusterOptions,
        table: Arc<CommandTable>,
    ) -> Result<Self> {
        let topology = Arc::new(topology);
        let registry = NodeRegistry::connect(topology.clone(), connector, &options).await?;
        info!(
            nodes = registry.aliases().len(),
            shards = topology.shard_count(),
            database = options.database,
            "sharded client ready"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(registry, table, options),
        })
    }

    /// Runs any command.
    ///
    /// Key arguments are submitted without their `{tag}` unless the client
    /// preserves tags. A node that fails the call answers `Reply::Nil`, which
    /// cannot be told apart from a missing key. Untagged multi-key commands
    /// without an emulation fail with
    /// [`ClusterError::RoutingRejected`](crate::ClusterError::RoutingRejected).
    pub async fn execute(&self, command: &str, args: &[Arg]) -> Result<Reply> {
        self.dispatcher.execute(command, args).await
    }

    /// Master owning `key` (`getnodefor`).
    pub fn node_for(&self, key: &str) -> Option<NodeLocation> {
        let router = self.dispatcher.router();
        let alias = router.master_for(key).to_string();
        let address = self.dispatcher.registry().address(&alias)?.clone();
        Some(NodeLocation {
            shard: router.shard_for(key),
            alias,
            address,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.dispatcher.router().shard_count()
    }

    pub fn topology(&self) -> &Topology {
        self.dispatcher.registry().topology()
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.dispatcher.registry()
    }

    pub fn router(&self) -> &KeyRouter {
        self.dispatcher.router()
    }

    pub fn options(&self) -> &ClusterOptions {
        self.dispatcher.options()
    }

    // strings

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.execute("GET", &[key.into()]).await?.into_string())
    }

    pub async fn set(&self, key: &str, value: impl Into<Arg>) -> Result<bool> {
        Ok(self.execute("SET", &[key.into(), value.into()]).await?.is_ok())
    }

    pub async fn setex(&self, key: &str, seconds: i64, value: impl Into<Arg>) -> Result<bool> {
        let reply = self
            .execute("SETEX", &[key.into(), Arg::Int(seconds), value.into()])
            .await?;
        Ok(reply.is_ok())
    }

    pub async fn incr(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.execute("INCR", &[key.into()]).await?.as_i64())
    }

    pub async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let keys = Arg::Keys(keys.iter().map(|k| k.to_string()).collect());
        let reply = self.execute("MGET", &[keys]).await?;
        Ok(reply
            .into_array()
            .unwrap_or_default()
            .into_iter()
            .map(Reply::into_string)
            .collect())
    }

    pub async fn mset(&self, pairs: &[(&str, &str)]) -> Result<bool> {
        Ok(self.execute("MSET", &[to_pairs(pairs)]).await?.is_ok())
    }

    /// Sets every pair only if none of the keys exists.
    pub async fn msetnx(&self, pairs: &[(&str, &str)]) -> Result<bool> {
        Ok(truthy(self.execute("MSETNX", &[to_pairs(pairs)]).await?))
    }

    // keys

    pub async fn del(&self, key: &str) -> Result<i64> {
        Ok(self.execute("DEL", &[key.into()]).await?.as_i64().unwrap_or(0))
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(truthy(self.execute("EXISTS", &[key.into()]).await?))
    }

    /// Deletes keys wherever they live; answers how many existed.
    pub async fn del_many(&self, keys: &[&str]) -> Result<i64> {
        let keys = Arg::Keys(keys.iter().map(|k| k.to_string()).collect());
        Ok(self.execute("DEL", &[keys]).await?.as_i64().unwrap_or(0))
    }

    /// Number of the given keys that exist; repeated keys count every time.
    pub async fn exists_many(&self, keys: &[&str]) -> Result<i64> {
        let keys = Arg::Keys(keys.iter().map(|k| k.to_string()).collect());
        Ok(self.execute("EXISTS", &[keys]).await?.as_i64().unwrap_or(0))
    }

    pub async fn key_type(&self, key: &str) -> Result<String> {
        let reply = self.execute("TYPE", &[key.into()]).await?;
        Ok(reply.into_string().unwrap_or_else(|| "none".to_string()))
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool> {
        Ok(truthy(self.execute("EXPIRE", &[key.into(), Arg::Int(seconds)]).await?))
    }

    /// Seconds to live; `-1` without expiry, `-2` for a missing key.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        Ok(self.execute("TTL", &[key.into()]).await?.as_i64().unwrap_or(-2))
    }

    pub async fn rename(&self, source: &str, destination: &str) -> Result<bool> {
        let reply = self.execute("RENAME", &[source.into(), destination.into()]).await?;
        Ok(reply.is_ok())
    }

    pub async fn renamenx(&self, source: &str, destination: &str) -> Result<bool> {
        let reply = self
            .execute("RENAMENX", &[source.into(), destination.into()])
            .await?;
        Ok(truthy(reply))
    }

    // lists

    pub async fn lpush(&self, key: &str, values: &[&str]) -> Result<i64> {
        self.push("LPUSH", key, values).await
    }

    pub async fn rpush(&self, key: &str, values: &[&str]) -> Result<i64> {
        self.push("RPUSH", key, values).await
    }

    async fn push(&self, command: &str, key: &str, values: &[&str]) -> Result<i64> {
        let mut args = vec![Arg::from(key)];
        args.extend(values.iter().map(|v| Arg::from(*v)));
        Ok(self.execute(command, &args).await?.as_i64().unwrap_or(0))
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let reply = self
            .execute("LRANGE", &[key.into(), Arg::Int(start), Arg::Int(stop)])
            .await?;
        Ok(reply.into_strings().unwrap_or_default())
    }

    pub async fn rpoplpush(&self, source: &str, destination: &str) -> Result<Option<String>> {
        let reply = self
            .execute("RPOPLPUSH", &[source.into(), destination.into()])
            .await?;
        Ok(reply.into_string())
    }

    pub async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: i64,
    ) -> Result<Option<String>> {
        let reply = self
            .execute(
                "BRPOPLPUSH",
                &[source.into(), destination.into(), Arg::Int(timeout)],
            )
            .await?;
        Ok(reply.into_string())
    }

    // sets

    pub async fn sadd(&self, key: &str, members: &[&str]) -> Result<i64> {
        self.push("SADD", key, members).await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let reply = self.execute("SMEMBERS", &[key.into()]).await?;
        Ok(reply.into_strings().unwrap_or_default())
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(truthy(self.execute("SISMEMBER", &[key.into(), member.into()]).await?))
    }

    pub async fn smove(&self, source: &str, destination: &str, member: &str) -> Result<bool> {
        let reply = self
            .execute("SMOVE", &[source.into(), destination.into(), member.into()])
            .await?;
        Ok(truthy(reply))
    }

    pub async fn sdiff(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.set_algebra("SDIFF", keys).await
    }

    pub async fn sinter(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.set_algebra("SINTER", keys).await
    }

    pub async fn sunion(&self, keys: &[&str]) -> Result<Vec<String>> {
        self.set_algebra("SUNION", keys).await
    }

    async fn set_algebra(&self, command: &str, keys: &[&str]) -> Result<Vec<String>> {
        let args: Vec<Arg> = keys.iter().map(|k| Arg::from(*k)).collect();
        let reply = self.execute(command, &args).await?;
        Ok(reply.into_strings().unwrap_or_default())
    }

    pub async fn sdiffstore(&self, destination: &str, keys: &[&str]) -> Result<i64> {
        self.push("SDIFFSTORE", destination, keys).await
    }

    pub async fn sinterstore(&self, destination: &str, keys: &[&str]) -> Result<i64> {
        self.push("SINTERSTORE", destination, keys).await
    }

    pub async fn sunionstore(&self, destination: &str, keys: &[&str]) -> Result<i64> {
        self.push("SUNIONSTORE", destination, keys).await
    }

    // sorted sets

    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<i64> {
        let reply = self
            .execute("ZADD", &[key.into(), Arg::Float(score), member.into()])
            .await?;
        Ok(reply.as_i64().unwrap_or(0))
    }

    pub async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.execute("ZSCORE", &[key.into(), member.into()]).await?.as_f64())
    }

    pub async fn zinterstore(&self, destination: &str, keys: &[&str]) -> Result<i64> {
        let args = [
            Arg::from(destination),
            Arg::Int(keys.len() as i64),
            Arg::Keys(keys.iter().map(|k| k.to_string()).collect()),
        ];
        Ok(self.execute("ZINTERSTORE", &args).await?.as_i64().unwrap_or(0))
    }

    // hashes

    pub async fn hset(&self, key: &str, field: &str, value: impl Into<Arg>) -> Result<i64> {
        let reply = self
            .execute("HSET", &[key.into(), field.into(), value.into()])
            .await?;
        Ok(reply.as_i64().unwrap_or(0))
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self.execute("HGET", &[key.into(), field.into()]).await?.into_string())
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let reply = self.execute("HGETALL", &[key.into()]).await?;
        Ok(reply
            .into_map()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(field, value)| value.into_string().map(|v| (field, v)))
            .collect())
    }

    // server

    /// Number of keys over all masters.
    pub async fn dbsize(&self) -> Result<i64> {
        Ok(self.execute("DBSIZE", &[]).await?.as_i64().unwrap_or(0))
    }

    /// Keys matching `pattern` on any node, de-duplicated.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let reply = self.execute("KEYS", &[pattern.into()]).await?;
        Ok(reply.into_strings().unwrap_or_default())
    }

    /// `alias → reply` for every node.
    pub async fn ping(&self) -> Result<Vec<(String, Reply)>> {
        Ok(self.execute("PING", &[]).await?.into_map().unwrap_or_default())
    }

    pub async fn info(&self) -> Result<Vec<(String, Reply)>> {
        Ok(self.execute("INFO", &[]).await?.into_map().unwrap_or_default())
    }

    pub async fn flushdb(&self) -> Result<Reply> {
        self.execute("FLUSHDB", &[]).await
    }
}

fn to_pairs(pairs: &[(&str, &str)]) -> Arg {
    Arg::Pairs(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

fn truthy(reply: Reply) -> bool {
    reply.as_i64().is_some_and(|n| n > 0)
}
