use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Node '{alias}' is unreachable: {reason}")]
    NodeUnreachable { alias: String, reason: String },

    #[error("Command '{command}' is not supported without a shared hash tag")]
    RoutingRejected { command: String },

    #[error("Node '{alias}' failed: {message}")]
    NodeInvocation { alias: String, message: String },

    #[error("Connection to node '{alias}' lost: {reason}")]
    ConnectionLost { alias: String, reason: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl ClusterError {
    /// Node-level failures are recovered into the "no result" sentinel;
    /// everything else reaches the caller.
    pub fn is_node_failure(&self) -> bool {
        matches!(self, Self::NodeInvocation { .. } | Self::ConnectionLost { .. })
    }

    /// The node itself is gone, as opposed to refusing this one call.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    pub(crate) fn lost(alias: &str, reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invocation(alias: &str, message: impl Into<String>) -> Self {
        Self::NodeInvocation {
            alias: alias.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl From<std::io::Error> for ClusterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(format!("invalid topology document: {}", err))
    }
}
