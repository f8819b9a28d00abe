// ============================================================================
// kvshard Library
// ============================================================================

pub mod core;
pub mod topology;
pub mod connection;
pub mod storage;
pub mod registry;
pub mod commands;
pub mod routing;
pub mod dispatch;
pub mod emulation;
pub mod client;

// Re-export main types for convenience
pub use core::{Arg, ClusterError, Reply, Result};
pub use topology::{NodeAddress, NodeRole, Topology};
pub use client::{NodeLocation, ShardedClient};

// Re-export connection API
pub use connection::{
    ClusterOptions, MemoryConnection, MemoryConnector, MemoryServer, NodeConnection,
    NodeConnector,
};

// Re-export routing API
pub use commands::{Access, CommandCategory, CommandSpec, CommandTable, KeySpec};
pub use dispatch::Dispatcher;
pub use registry::NodeRegistry;
pub use routing::{KeyRouter, Route, hash_tag, shard_index, strip_hash_tag};
