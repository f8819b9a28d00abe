/// Failover and broadcast tests
///
/// Startup failures, replica fallback, unreachable nodes and aggregated
/// broadcasts.
/// Run with: cargo test --test failover_tests
mod common;

use common::{Cluster, options, topology};
use kvshard::{ClusterError, MemoryConnector, MemoryServer, NodeRole, Reply, ShardedClient};
use std::time::Duration;

#[tokio::test]
async fn test_unreachable_replica_falls_back_to_master() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    connector.node(&topology, "node_5").await.unwrap().shutdown();

    let client = ShardedClient::connect(topology.clone(), &connector, options())
        .await
        .unwrap();
    assert!(!client.registry().is_reachable("node_5"));

    let key = (0..10_000)
        .map(|i| format!("fallback:{}", i))
        .find(|k| client.node_for(k).unwrap().alias == "node_2")
        .unwrap();
    client.set(&key, "v").await.unwrap();

    let master = connector.node(&topology, "node_2").await.unwrap();
    master.clear_log().await;
    assert_eq!(client.get(&key).await.unwrap(), Some("v".into()));
    assert_eq!(master.commands().await, vec!["get"]);
}

#[tokio::test]
async fn test_unreachable_master_is_fatal() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    connector.node(&topology, "node_3").await.unwrap().shutdown();

    let err = ShardedClient::connect(topology, &connector, options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClusterError::NodeUnreachable { ref alias, .. } if alias == "node_3"));
}

#[tokio::test]
async fn test_transient_connect_failure_is_retried() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    connector.node(&topology, "node_4").await.unwrap().refuse_connections(1);

    let client = ShardedClient::connect(topology, &connector, options()).await;
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_role_mismatch_fails_startup() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    let address = topology.address("node_6").unwrap().clone();
    connector.register(&address, MemoryServer::master()).await;

    let err = ShardedClient::connect(topology.clone(), &connector, options())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClusterError::Configuration(_)));

    let lenient = options().verify_roles(false);
    assert!(ShardedClient::connect(topology, &connector, lenient).await.is_ok());
}

#[tokio::test]
async fn test_master_reporting_replica_role_fails_startup() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    let address = topology.address("node_1").unwrap().clone();
    connector
        .register(&address, MemoryServer::master().reporting(NodeRole::Replica))
        .await;

    let result = ShardedClient::connect(topology, &connector, options()).await;
    assert!(matches!(result, Err(ClusterError::Configuration(_))));
}

#[tokio::test]
async fn test_invalid_options_are_rejected() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    let options = options().connect_timeout(Duration::ZERO);

    let result = ShardedClient::connect(topology, &connector, options).await;
    assert!(matches!(result, Err(ClusterError::Configuration(_))));
}

#[tokio::test]
async fn test_node_lost_after_startup_answers_nil() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_4");
    cluster.client.set(&key, "v").await.unwrap();

    cluster.server("node_4").await.shutdown();
    assert_eq!(cluster.client.get(&key).await.unwrap(), None);
    assert!(!cluster.client.set(&key, "w").await.unwrap());

    cluster.server("node_4").await.restart();
    assert_eq!(cluster.client.get(&key).await.unwrap(), Some("v".into()));
}

#[tokio::test]
async fn test_replica_lost_after_startup_reads_from_master() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_1");
    cluster.client.set(&key, "v").await.unwrap();

    cluster.server("node_6").await.shutdown();
    let master = cluster.server("node_1").await;
    master.clear_log().await;

    assert_eq!(cluster.client.get(&key).await.unwrap(), Some("v".into()));
    assert!(!cluster.client.registry().is_reachable("node_6"));
    assert_eq!(master.commands().await, vec!["get"]);

    // later reads skip the replica
    assert_eq!(cluster.client.get(&key).await.unwrap(), Some("v".into()));
    assert_eq!(master.commands().await, vec!["get", "get"]);
}

#[tokio::test]
async fn test_replica_errors_do_not_abandon_it() {
    let cluster = Cluster::start().await;
    let key = cluster.key_on("node_1");
    cluster.client.rpush(&key, &["a"]).await.unwrap();

    let reply = cluster.client.execute("GET", &[key.as_str().into()]).await.unwrap();
    assert_eq!(reply, Reply::Nil);
    assert!(cluster.client.registry().is_reachable("node_6"));
}

#[tokio::test]
async fn test_wrong_type_answers_nil() {
    let cluster = Cluster::start().await;
    cluster.client.rpush("mylist", &["a"]).await.unwrap();

    let reply = cluster.client.execute("GET", &["mylist".into()]).await.unwrap();
    assert_eq!(reply, Reply::Nil);
}

#[tokio::test]
async fn test_broadcast_reports_unreachable_nodes_as_nil() {
    let cluster = Cluster::start().await;
    cluster.server("node_3").await.shutdown();

    let pings = cluster.client.ping().await.unwrap();
    assert_eq!(pings.len(), 6);
    for (alias, reply) in &pings {
        if alias == "node_3" {
            assert_eq!(*reply, Reply::Nil);
        } else {
            assert_eq!(*reply, Reply::Status("PONG".into()));
        }
    }
}

#[tokio::test]
async fn test_unreachable_replica_is_nil_in_broadcasts() {
    let topology = topology();
    let connector = MemoryConnector::for_topology(&topology);
    connector.node(&topology, "node_6").await.unwrap().shutdown();
    let client = ShardedClient::connect(topology, &connector, options())
        .await
        .unwrap();

    let info = client.info().await.unwrap();
    let node_6 = info.iter().find(|(alias, _)| alias == "node_6").unwrap();
    assert_eq!(node_6.1, Reply::Nil);
    let node_1 = info.iter().find(|(alias, _)| alias == "node_1").unwrap();
    let role = node_1.1.clone().into_map().unwrap();
    assert_eq!(role[0], ("role".to_string(), Reply::Bulk("master".into())));
}

#[tokio::test]
async fn test_dbsize_sums_masters_and_keys_are_unioned() {
    let cluster = Cluster::start().await;
    let client = &cluster.client;
    for i in 0..20 {
        client.set(&format!("item:{}", i), "x").await.unwrap();
    }

    assert_eq!(client.dbsize().await.unwrap(), 20);

    let mut expected: Vec<String> = (0..20).map(|i| format!("item:{}", i)).collect();
    expected.sort();
    assert_eq!(client.keys("item:*").await.unwrap(), expected);

    let flushed = client.flushdb().await.unwrap().into_map().unwrap();
    let aliases: Vec<&str> = flushed.iter().map(|(alias, _)| alias.as_str()).collect();
    assert_eq!(aliases, vec!["node_1", "node_2", "node_3", "node_4"]);
    assert_eq!(client.dbsize().await.unwrap(), 0);
}

#[tokio::test]
async fn test_parallel_broadcast_matches_sequential() {
    let sequential = Cluster::start().await;
    let parallel = Cluster::start_with(options().parallel_broadcast(true)).await;
    for cluster in [&sequential, &parallel] {
        for i in 0..10 {
            cluster.client.set(&format!("p:{}", i), "x").await.unwrap();
        }
    }

    assert_eq!(
        sequential.client.keys("*").await.unwrap(),
        parallel.client.keys("*").await.unwrap()
    );
    let aliases = |pings: Vec<(String, Reply)>| -> Vec<String> {
        pings.into_iter().map(|(alias, _)| alias).collect()
    };
    assert_eq!(
        aliases(sequential.client.ping().await.unwrap()),
        aliases(parallel.client.ping().await.unwrap())
    );
}
