use super::{routing_key, shard_index, strip_hash_tag};
use crate::commands::{Access, KeySpec};
use crate::connection::ClusterOptions;
use crate::core::Arg;
use crate::topology::Topology;
use std::collections::HashMap;

/// Where one key-routed call goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub shard: usize,
    /// Master owning the shard.
    pub master: String,
    /// Node the call is sent to: the master, or one of its replicas for reads.
    pub node: String,
}

impl Route {
    pub fn is_replica(&self) -> bool {
        self.node != self.master
    }
}

/// Maps keys to shards and shards to nodes.
#[derive(Debug, Clone)]
pub struct KeyRouter {
    masters: Vec<String>,
    replicas: HashMap<String, Vec<String>>,
    masters_only: bool,
    preserve_hash_tags: bool,
}

impl KeyRouter {
    pub fn new(topology: &Topology, options: &ClusterOptions) -> Self {
        let masters = topology.masters();
        let replicas = masters
            .iter()
            .map(|m| (m.clone(), topology.replicas_of(m).to_vec()))
            .collect();
        Self {
            masters,
            replicas,
            masters_only: options.masters_only,
            preserve_hash_tags: options.preserve_hash_tags,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.masters.len()
    }

    pub fn masters(&self) -> &[String] {
        &self.masters
    }

    pub fn shard_for(&self, key: &str) -> usize {
        shard_index(routing_key(key), self.masters.len())
    }

    pub fn master_for(&self, key: &str) -> &str {
        &self.masters[self.shard_for(key)]
    }

    /// Resolves the node serving `key`.
    ///
    /// Reads go to the first reachable replica of the owning master unless
    /// the router is masters-only; everything else goes to the master.
    pub fn route(&self, key: &str, access: Access, reachable: impl Fn(&str) -> bool) -> Route {
        let shard = self.shard_for(key);
        let master = self.masters[shard].clone();
        let node = match access {
            Access::Read if !self.masters_only => self
                .replicas
                .get(&master)
                .and_then(|replicas| replicas.iter().find(|r| reachable(r.as_str())))
                .cloned()
                .unwrap_or_else(|| master.clone()),
            _ => master.clone(),
        };
        Route {
            shard,
            master,
            node,
        }
    }

    /// Key as submitted to the node.
    pub fn stored_key(&self, key: &str) -> String {
        if self.preserve_hash_tags {
            key.to_string()
        } else {
            strip_hash_tag(key)
        }
    }

    /// Rewrites the key arguments into their stored form; other arguments
    /// pass through untouched.
    pub fn rewrite_keys(&self, keys: &KeySpec, args: &[Arg]) -> Vec<Arg> {
        let mut rewritten = args.to_vec();
        for i in keys.positions(args) {
            rewritten[i] = args[i].map_keys(|k| self.stored_key(k));
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeAddress;

    fn four_shards() -> Topology {
        let mut topology = Topology::new("node_1");
        for i in 1..=4u16 {
            topology = topology.node(
                format!("node_{}", i),
                NodeAddress::new("127.0.0.1", 7000 + i).unwrap(),
            );
        }
        topology
            .node("node_5", NodeAddress::new("127.0.0.1", 7005).unwrap())
            .node("node_6", NodeAddress::new("127.0.0.1", 7006).unwrap())
            .replica("node_1", "node_5")
            .replica("node_1", "node_6")
    }

    fn key_on_node_1(router: &KeyRouter) -> String {
        (0..1000)
            .map(|i| format!("k{}", i))
            .find(|k| router.master_for(k) == "node_1")
            .unwrap()
    }

    #[test]
    fn test_tagged_keys_colocate() {
        let router = KeyRouter::new(&four_shards(), &ClusterOptions::new());
        assert_eq!(router.shard_count(), 4);
        assert_eq!(router.shard_for("foo{bar}"), router.shard_for("baz{bar}"));
        assert_eq!(router.shard_for("foo{bar}"), router.shard_for("bar"));
        assert_eq!(
            router.master_for("bar"),
            format!("node_{}", shard_index("bar", 4) + 1)
        );
    }

    #[test]
    fn test_reads_prefer_reachable_replicas() {
        let router = KeyRouter::new(&four_shards(), &ClusterOptions::new());
        let key = key_on_node_1(&router);

        let read = router.route(&key, Access::Read, |_| true);
        assert_eq!(read.node, "node_5");
        assert!(read.is_replica());

        let fallback = router.route(&key, Access::Read, |alias| alias != "node_5");
        assert_eq!(fallback.node, "node_6");

        let none = router.route(&key, Access::Read, |_| false);
        assert_eq!(none.node, "node_1");

        let write = router.route(&key, Access::Write, |_| true);
        assert_eq!(write.node, "node_1");
        assert!(!write.is_replica());
    }

    #[test]
    fn test_masters_only_ignores_replicas() {
        let options = ClusterOptions::new().masters_only(true);
        let router = KeyRouter::new(&four_shards(), &options);
        let key = key_on_node_1(&router);
        assert_eq!(router.route(&key, Access::Read, |_| true).node, "node_1");
    }

    #[test]
    fn test_rewrite_keys_strips_tags_at_key_positions() {
        let router = KeyRouter::new(&four_shards(), &ClusterOptions::new());
        let args = vec![Arg::from("a{t}"), Arg::from("v{x}")];
        assert_eq!(
            router.rewrite_keys(&KeySpec::FIRST, &args),
            vec![Arg::from("a"), Arg::from("v{x}")]
        );

        let preserving = KeyRouter::new(
            &four_shards(),
            &ClusterOptions::new().preserve_hash_tags(true),
        );
        assert_eq!(preserving.rewrite_keys(&KeySpec::FIRST, &args), args);
    }
}
