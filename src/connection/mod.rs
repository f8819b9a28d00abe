//! Connections to single-node stores.
//!
//! The routing engine never speaks a wire protocol itself. It talks to nodes
//! through [`NodeConnection`] handles produced by a [`NodeConnector`], so any
//! driver can be plugged in. [`MemoryConnector`] backs them with in-process
//! [`MemoryStore`](crate::storage::MemoryStore) servers.

pub mod config;
pub mod memory;

pub use config::ClusterOptions;
pub use memory::{MemoryConnection, MemoryConnector, MemoryServer};

use crate::core::{Arg, ClusterError, Reply, Result};
use crate::topology::{NodeAddress, NodeRole};
use async_trait::async_trait;

/// A live connection to one node.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    /// Alias of the node this connection talks to.
    fn alias(&self) -> &str;

    /// Submits one command and waits for its reply.
    ///
    /// Errors reported by the node come back as
    /// [`ClusterError::NodeInvocation`]; a connection that is gone as
    /// [`ClusterError::ConnectionLost`].
    async fn call(&self, command: &str, args: &[Arg]) -> Result<Reply>;

    /// Asks the node which role it currently plays.
    async fn role(&self) -> Result<NodeRole> {
        let reply = self.call("ROLE", &[]).await?;
        let reported = match &reply {
            Reply::Array(items) => items.first().and_then(Reply::as_str),
            other => other.as_str(),
        };
        match reported {
            Some(role) => role.parse(),
            None => Err(ClusterError::invocation(
                self.alias(),
                format!("unexpected ROLE reply {}", reply),
            )),
        }
    }
}

/// Opens connections to nodes.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Connects to the node at `address`.
    ///
    /// A node that cannot be reached fails with
    /// [`ClusterError::NodeUnreachable`].
    async fn connect(
        &self,
        alias: &str,
        address: &NodeAddress,
        options: &ClusterOptions,
    ) -> Result<Box<dyn NodeConnection>>;
}
