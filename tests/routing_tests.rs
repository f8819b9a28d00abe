/// Routing tests
///
/// Key placement, hash tags, replica reads and topology loading through the
/// public client.
/// Run with: cargo test --test routing_tests
mod common;

use common::{Cluster, TOPOLOGY};
use kvshard::{Arg, ClusterOptions, MemoryConnector, Reply, ShardedClient, Topology, shard_index};
use std::io::Write;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_tagged_keys_share_a_node() {
    let cluster = Cluster::start().await;
    let client = &cluster.client;

    assert_eq!(client.shard_count(), 4);
    let foo = client.node_for("foo{bar}").unwrap();
    let baz = client.node_for("baz{bar}").unwrap();
    assert_eq!(foo, baz);
    assert_eq!(foo.shard, shard_index("bar", 4));
    assert_eq!(foo.alias, format!("node_{}", foo.shard + 1));
}

#[tokio::test]
async fn test_placement_is_deterministic() {
    let first = Cluster::start().await;
    let second = Cluster::start().await;

    for i in 0..200 {
        let key = format!("session:{}", i);
        assert_eq!(
            first.client.node_for(&key),
            second.client.node_for(&key)
        );
    }
}

#[tokio::test]
async fn test_every_master_receives_keys() {
    let cluster = Cluster::start().await;
    let mut seen = std::collections::BTreeSet::new();
    for i in 0..500 {
        seen.insert(cluster.client.node_for(&format!("k{}", i)).unwrap().alias);
    }
    assert_eq!(
        seen.into_iter().collect::<Vec<_>>(),
        vec!["node_1", "node_2", "node_3", "node_4"]
    );
}

#[tokio::test]
async fn test_hash_tags_are_stripped_before_storage() {
    let cluster = Cluster::start().await;
    let client = &cluster.client;

    assert!(assert_ok!(client.set("user{42}", "ada").await));
    assert_eq!(client.get("user{42}").await.unwrap(), Some("ada".into()));

    let owner = client.node_for("user{42}").unwrap().alias;
    assert_eq!(cluster.raw(&owner, "GET", &["user"]).await, Reply::Bulk("ada".into()));
    assert_eq!(cluster.raw(&owner, "GET", &["user{42}"]).await, Reply::Nil);
}

#[tokio::test]
async fn test_preserved_hash_tags_reach_storage() {
    let cluster = Cluster::start_with(common::options().preserve_hash_tags(true)).await;
    let client = &cluster.client;

    client.set("user{42}", "ada").await.unwrap();
    let owner = client.node_for("user{42}").unwrap().alias;
    assert_eq!(
        cluster.raw(&owner, "GET", &["user{42}"]).await,
        Reply::Bulk("ada".into())
    );
}

#[tokio::test]
async fn test_unclosed_brace_hashes_whole_key() {
    let cluster = Cluster::start().await;
    let client = &cluster.client;

    let location = client.node_for("broken{tag").unwrap();
    assert_eq!(location.shard, shard_index("broken{tag", 4));

    client.set("broken{tag", "v").await.unwrap();
    assert_eq!(
        cluster.raw(&location.alias, "GET", &["broken{tag"]).await,
        Reply::Bulk("v".into())
    );
}

#[tokio::test]
async fn test_reads_use_replica_and_writes_use_master() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_2");
    let master = cluster.server("node_2").await;
    let replica = cluster.server("node_5").await;
    master.clear_log().await;
    replica.clear_log().await;

    cluster.client.set(&key, "1").await.unwrap();
    assert_eq!(master.call_count(), 1);
    assert_eq!(replica.call_count(), 0);

    assert_eq!(cluster.client.get(&key).await.unwrap(), Some("1".into()));
    assert_eq!(replica.commands().await, vec!["get"]);
    assert_eq!(master.call_count(), 1);
}

#[tokio::test]
async fn test_masters_without_replicas_serve_reads() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_3");
    let master = cluster.server("node_3").await;

    cluster.client.set(&key, "x").await.unwrap();
    master.clear_log().await;
    cluster.client.get(&key).await.unwrap();
    assert_eq!(master.commands().await, vec!["get"]);
}

#[tokio::test]
async fn test_database_is_selected_on_every_node() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_4");

    cluster.client.set(&key, "v").await.unwrap();
    assert_eq!(cluster.raw("node_4", "GET", &[key.as_str()]).await, Reply::Bulk("v".into()));
    assert_eq!(
        cluster.server("node_4").await.execute(0, "GET", &[key.as_str()]).await,
        Reply::Nil
    );
}

#[tokio::test]
async fn test_topology_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(TOPOLOGY.as_bytes()).unwrap();

    let topology = Topology::load(file.path()).unwrap();
    assert_eq!(topology.masters(), vec!["node_1", "node_2", "node_3", "node_4"]);
    assert_eq!(topology.replicas_of("node_1"), ["node_6"]);

    let connector = MemoryConnector::for_topology(&topology);
    let client = ShardedClient::connect(topology, &connector, ClusterOptions::new())
        .await
        .unwrap();
    assert_eq!(client.shard_count(), 4);
}

#[tokio::test]
async fn test_explicit_shard_order_changes_placement() {
    let natural = Topology::from_json(TOPOLOGY).unwrap();
    let reordered = natural.clone().shard_order(vec![
        "node_4".into(),
        "node_3".into(),
        "node_2".into(),
        "node_1".into(),
    ]);

    let connector = MemoryConnector::for_topology(&natural);
    let a = ShardedClient::connect(natural, &connector, ClusterOptions::new())
        .await
        .unwrap();
    let b = ShardedClient::connect(reordered, &connector, ClusterOptions::new())
        .await
        .unwrap();

    let key = "order-check";
    let shard = shard_index(key, 4);
    assert_eq!(a.node_for(key).unwrap().alias, format!("node_{}", shard + 1));
    assert_eq!(b.node_for(key).unwrap().alias, format!("node_{}", 4 - shard));
}

#[tokio::test]
async fn test_typed_helpers() {
    let cluster = Cluster::start().await;
    let client = &cluster.client;

    assert_eq!(client.incr("counter").await.unwrap(), Some(1));
    assert!(client.exists("counter").await.unwrap());
    assert!(client.expire("counter", 100).await.unwrap());
    assert!((99..=100).contains(&client.ttl("counter").await.unwrap()));
    assert_eq!(client.ttl("missing").await.unwrap(), -2);
    assert_eq!(client.del("counter").await.unwrap(), 1);
    assert!(!client.exists("counter").await.unwrap());

    client.hset("profile", "name", "ada").await.unwrap();
    client.hset("profile", "lang", "rust").await.unwrap();
    assert_eq!(client.hget("profile", "lang").await.unwrap(), Some("rust".into()));
    assert_eq!(client.hgetall("profile").await.unwrap().len(), 2);
    assert_eq!(client.key_type("profile").await.unwrap(), "hash");

    client.zadd("board", 2.5, "ada").await.unwrap();
    assert_eq!(client.zscore("board", "ada").await.unwrap(), Some(2.5));

    let raw = client
        .execute("APPEND", &[Arg::from("greeting"), Arg::from("hi")])
        .await
        .unwrap();
    assert_eq!(raw, Reply::Int(2));
}
