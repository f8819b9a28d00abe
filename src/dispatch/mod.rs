//! Command dispatch.
//!
//! A call is classified, then follows one of four paths:
//!
//! - **single shard** (`Write`/`Read`): routed by its first key;
//! - **broadcast**: sent to every node and aggregated;
//! - **tag required**: native on one shard when the keys share a hash tag,
//!   emulated client-side or rejected otherwise;
//! - **no hash**: sent to the default node.
//!
//! Node failures never escape a dispatch: they are logged and answered with
//! [`Reply::Nil`]. A read whose replica connection is lost is retried once on
//! the master, and the replica is not used again.

use crate::commands::{Access, Aggregate, CommandCategory, CommandSpec, CommandTable};
use crate::connection::ClusterOptions;
use crate::core::{Arg, ClusterError, Reply, Result};
use crate::emulation::Emulator;
use crate::registry::NodeRegistry;
use crate::routing::{KeyRouter, Route, shares_hash_tag};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Executes commands against a connected [`NodeRegistry`].
pub struct Dispatcher {
    registry: NodeRegistry,
    router: KeyRouter,
    table: Arc<CommandTable>,
    options: ClusterOptions,
}

impl Dispatcher {
    pub fn new(registry: NodeRegistry, table: Arc<CommandTable>, options: ClusterOptions) -> Self {
        let router = KeyRouter::new(registry.topology(), &options);
        Self {
            registry,
            router,
            table,
            options,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn router(&self) -> &KeyRouter {
        &self.router
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Runs one command.
    ///
    /// Only [`ClusterError::RoutingRejected`] and
    /// [`ClusterError::InvalidArguments`] are returned as errors; a node that
    /// fails the call yields `Reply::Nil`.
    pub async fn execute(&self, command: &str, args: &[Arg]) -> Result<Reply> {
        let spec = self.table.classify(command);
        let span = info_span!(
            "kvshard.dispatch",
            command = %spec.name,
            category = ?spec.category
        );
        self.execute_spec(&spec, args).instrument(span).await
    }

    async fn execute_spec(&self, spec: &CommandSpec, args: &[Arg]) -> Result<Reply> {
        match spec.category {
            CommandCategory::Write | CommandCategory::Read => self.single_shard(spec, args).await,
            CommandCategory::Broadcast => Ok(self.broadcast(spec, args).await),
            CommandCategory::TagRequired => self.tag_required(spec, args).await,
            CommandCategory::NoHash => {
                if !self.table.contains(&spec.name) {
                    event!(
                        Level::WARN,
                        command = %spec.name,
                        "unknown command sent to the default node"
                    );
                }
                let default_node = &self.registry.topology().default_node;
                let result = self.invoke(default_node, &spec.name, args).await;
                recover(default_node, result)
            }
        }
    }

    async fn single_shard(&self, spec: &CommandSpec, args: &[Arg]) -> Result<Reply> {
        let route = self.route(spec, spec.access, args)?;
        let wire = self.router.rewrite_keys(&spec.keys, args);
        event!(Level::DEBUG, node = %route.node, shard = route.shard, "routed");
        let result = match self.invoke(&route.node, &spec.name, &wire).await {
            Err(err) if err.is_connection_lost() && route.is_replica() => {
                event!(
                    Level::WARN,
                    node = %route.node,
                    master = %route.master,
                    error = %err,
                    "replica lost, reading from its master"
                );
                self.registry.mark_unreachable(&route.node);
                self.invoke(&route.master, &spec.name, &wire).await
            }
            other => other,
        };
        recover(&route.node, result)
    }

    async fn tag_required(&self, spec: &CommandSpec, args: &[Arg]) -> Result<Reply> {
        let keys = spec.keys.keys(args);
        if keys.is_empty() {
            return Err(missing_key(spec));
        }
        if shares_hash_tag(&keys) {
            return self.single_shard(spec, args).await;
        }

        let Some(emulation) = spec.emulation else {
            return Err(ClusterError::RoutingRejected {
                command: spec.name.clone(),
            });
        };
        event!(Level::DEBUG, ?emulation, keys = keys.len(), "emulating across shards");
        let result = Emulator::new(self).run(emulation, spec, args).await;
        recover("emulation", result)
    }

    async fn broadcast(&self, spec: &CommandSpec, args: &[Arg]) -> Reply {
        let masters_only = spec.masters_only_broadcast();
        let targets: Vec<&str> = self
            .registry
            .aliases()
            .iter()
            .map(String::as_str)
            .filter(|alias| !(masters_only && self.registry.is_replica(alias)))
            .collect();

        let replies = if self.options.parallel_broadcast {
            join_all(targets.iter().map(|alias| self.broadcast_one(alias, spec, args))).await
        } else {
            let mut replies = Vec::with_capacity(targets.len());
            for alias in &targets {
                replies.push(self.broadcast_one(alias, spec, args).await);
            }
            replies
        };

        match spec.aggregate {
            Aggregate::PerNode => Reply::Map(
                targets
                    .into_iter()
                    .map(str::to_string)
                    .zip(replies)
                    .collect(),
            ),
            Aggregate::UnionKeys => {
                let union: BTreeSet<String> = replies
                    .into_iter()
                    .filter_map(Reply::into_strings)
                    .flatten()
                    .collect();
                Reply::bulk_array(union)
            }
            Aggregate::Sum => Reply::Int(replies.iter().filter_map(Reply::as_i64).sum()),
        }
    }

    async fn broadcast_one(&self, alias: &str, spec: &CommandSpec, args: &[Arg]) -> Reply {
        if !self.registry.is_reachable(alias) {
            return Reply::Nil;
        }
        match self.invoke(alias, &spec.name, args).await {
            Ok(reply) => reply,
            Err(err) => {
                event!(Level::WARN, node = %alias, error = %err, "broadcast call failed");
                Reply::Nil
            }
        }
    }

    /// Runs one single-key step of an emulation. Node failures are returned
    /// as errors so that the emulation can abort.
    ///
    /// Every step goes to the shard master, reads included: their replies
    /// decide the writes that follow.
    pub(crate) async fn step(&self, command: &str, args: &[Arg]) -> Result<Reply> {
        let spec = self.table.classify(command);
        let route = self.route(&spec, Access::Write, args)?;
        let wire = self.router.rewrite_keys(&spec.keys, args);
        self.invoke(&route.node, &spec.name, &wire).await
    }

    fn route(&self, spec: &CommandSpec, access: Access, args: &[Arg]) -> Result<Route> {
        let keys = spec.keys.keys(args);
        let subject = keys.first().ok_or_else(|| missing_key(spec))?;
        Ok(self
            .router
            .route(subject, access, |alias| self.registry.is_reachable(alias)))
    }

    async fn invoke(&self, alias: &str, command: &str, args: &[Arg]) -> Result<Reply> {
        let connection = self
            .registry
            .get(alias)
            .ok_or_else(|| ClusterError::lost(alias, "node unreachable"))?;

        match self.options.command_timeout {
            Some(limit) => tokio::time::timeout(limit, connection.call(command, args))
                .await
                .map_err(|_| ClusterError::lost(alias, format!("timed out after {:?}", limit)))?,
            None => connection.call(command, args).await,
        }
    }
}

fn missing_key(spec: &CommandSpec) -> ClusterError {
    ClusterError::InvalidArguments(format!("'{}' needs a key argument", spec.name))
}

/// Turns node failures into the `Nil` sentinel.
fn recover(node: &str, result: Result<Reply>) -> Result<Reply> {
    match result {
        Err(err) if err.is_node_failure() => {
            event!(Level::WARN, node = %node, error = %err, "node call failed, answering nil");
            Ok(Reply::Nil)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{MemoryConnector, MemoryServer};
    use crate::topology::Topology;

    fn topology() -> Arc<Topology> {
        Arc::new(
            Topology::from_json(
                r#"{
                    "nodes": {
                        "node_1": "127.0.0.1:7101",
                        "node_2": "127.0.0.1:7102",
                        "node_3": "127.0.0.1:7103"
                    },
                    "master_of": {"node_1": "node_3"},
                    "default_node": "node_2"
                }"#,
            )
            .unwrap(),
        )
    }

    async fn dispatcher(options: ClusterOptions) -> (Dispatcher, MemoryConnector, Arc<Topology>) {
        let topology = topology();
        let connector = MemoryConnector::for_topology(&topology);
        let registry = NodeRegistry::connect(topology.clone(), &connector, &options)
            .await
            .unwrap();
        (
            Dispatcher::new(registry, CommandTable::global(), options),
            connector,
            topology,
        )
    }

    async fn server(connector: &MemoryConnector, topology: &Topology, alias: &str) -> MemoryServer {
        connector.node(topology, alias).await.unwrap()
    }

    fn key_on(dispatcher: &Dispatcher, master: &str) -> String {
        (0..1000)
            .map(|i| format!("key:{}", i))
            .find(|k| dispatcher.router().master_for(k) == master)
            .unwrap()
    }

    #[tokio::test]
    async fn test_writes_hit_master_and_reads_hit_replica() {
        let (dispatcher, connector, topology) = dispatcher(ClusterOptions::new()).await;
        let key = key_on(&dispatcher, "node_1");
        let master = server(&connector, &topology, "node_1").await;
        let replica = server(&connector, &topology, "node_3").await;
        master.clear_log().await;
        replica.clear_log().await;

        dispatcher.execute("SET", &[key.as_str().into(), "v".into()]).await.unwrap();
        assert_eq!(master.commands().await, vec!["set"]);

        let value = dispatcher.execute("GET", &[key.as_str().into()]).await.unwrap();
        assert_eq!(value, Reply::Bulk("v".into()));
        assert_eq!(replica.commands().await, vec!["get"]);
        assert_eq!(master.call_count(), 1);
    }

    #[tokio::test]
    async fn test_masters_only_keeps_reads_on_master() {
        let (dispatcher, connector, topology) =
            dispatcher(ClusterOptions::new().masters_only(true)).await;
        let key = key_on(&dispatcher, "node_1");
        let replica = server(&connector, &topology, "node_3").await;
        replica.clear_log().await;

        dispatcher.execute("GET", &[key.as_str().into()]).await.unwrap();
        assert_eq!(replica.call_count(), 0);
    }

    #[tokio::test]
    async fn test_node_failure_answers_nil() {
        let (dispatcher, connector, topology) = dispatcher(ClusterOptions::new()).await;
        let key = key_on(&dispatcher, "node_2");
        dispatcher.execute("SET", &[key.as_str().into(), "v".into()]).await.unwrap();

        server(&connector, &topology, "node_2").await.shutdown();
        let reply = dispatcher.execute("GET", &[key.as_str().into()]).await.unwrap();
        assert_eq!(reply, Reply::Nil);
    }

    #[tokio::test]
    async fn test_store_errors_answer_nil() {
        let (dispatcher, _, _) = dispatcher(ClusterOptions::new()).await;
        dispatcher.execute("RPUSH", &["list".into(), "a".into()]).await.unwrap();
        let reply = dispatcher.execute("INCR", &["list".into()]).await.unwrap();
        assert_eq!(reply, Reply::Nil);
    }

    #[tokio::test]
    async fn test_missing_key_is_rejected() {
        let (dispatcher, _, _) = dispatcher(ClusterOptions::new()).await;
        let err = dispatcher.execute("GET", &[]).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_unemulated_multi_key_command_needs_a_tag() {
        let (dispatcher, _, _) = dispatcher(ClusterOptions::new()).await;
        let untagged = [
            "dst".into(),
            Arg::Int(2),
            Arg::Keys(vec!["a".into(), "b".into()]),
        ];
        let err = dispatcher.execute("ZINTERSTORE", &untagged).await.unwrap_err();
        assert_eq!(
            err,
            ClusterError::RoutingRejected {
                command: "zinterstore".into()
            }
        );

        for key in ["a{z}", "b{z}"] {
            dispatcher
                .execute("ZADD", &[key.into(), Arg::Float(1.0), "m".into()])
                .await
                .unwrap();
        }
        let tagged = [
            "dst{z}".into(),
            Arg::Int(2),
            Arg::Keys(vec!["a{z}".into(), "b{z}".into()]),
        ];
        let reply = dispatcher.execute("ZINTERSTORE", &tagged).await.unwrap();
        assert_eq!(reply, Reply::Int(1));
    }

    #[tokio::test]
    async fn test_unknown_command_goes_to_default_node() {
        let (dispatcher, connector, topology) = dispatcher(ClusterOptions::new()).await;
        let default_node = server(&connector, &topology, "node_2").await;
        default_node.clear_log().await;

        let reply = dispatcher.execute("FROBNICATE", &["x".into()]).await.unwrap();
        assert_eq!(reply, Reply::Nil);
        assert_eq!(default_node.commands().await, vec!["frobnicate"]);
    }

    #[tokio::test]
    async fn test_broadcast_aggregates() {
        for parallel in [false, true] {
            let options = ClusterOptions::new().parallel_broadcast(parallel);
            let (dispatcher, connector, topology) = dispatcher(options).await;
            for key in ["a", "b", "c", "d", "e"] {
                dispatcher.execute("SET", &[key.into(), "1".into()]).await.unwrap();
            }

            assert_eq!(dispatcher.execute("DBSIZE", &[]).await.unwrap(), Reply::Int(5));

            let keys = dispatcher.execute("KEYS", &["*".into()]).await.unwrap();
            assert_eq!(
                keys.into_strings().unwrap(),
                vec!["a", "b", "c", "d", "e"]
            );

            server(&connector, &topology, "node_2").await.shutdown();
            let pings = dispatcher.execute("PING", &[]).await.unwrap().into_map().unwrap();
            let aliases: Vec<&str> = pings.iter().map(|(alias, _)| alias.as_str()).collect();
            assert_eq!(aliases, vec!["node_1", "node_2", "node_3"]);
            assert_eq!(pings[0].1, Reply::Status("PONG".into()));
            assert_eq!(pings[1].1, Reply::Nil);
        }
    }

    #[tokio::test]
    async fn test_write_broadcast_skips_replicas() {
        let (dispatcher, connector, topology) = dispatcher(ClusterOptions::new()).await;
        let replica = server(&connector, &topology, "node_3").await;
        replica.clear_log().await;

        let reply = dispatcher.execute("FLUSHDB", &[]).await.unwrap().into_map().unwrap();
        assert_eq!(reply.len(), 2);
        assert!(reply.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(replica.call_count(), 0);
    }
}
