use crate::core::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network address of one physical store instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AddressRepr")]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

/// Accepts both `{"host": .., "port": ..}` and `"host:port"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Text(String),
    Parts { host: String, port: u16 },
}

impl TryFrom<AddressRepr> for NodeAddress {
    type Error = ClusterError;

    fn try_from(repr: AddressRepr) -> Result<Self> {
        match repr {
            AddressRepr::Text(text) => text.parse(),
            AddressRepr::Parts { host, port } => Self::new(host, port),
        }
    }
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ClusterError::Configuration(
                "node host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(ClusterError::Configuration(format!(
                "node port for host '{}' must be > 0",
                host
            )));
        }
        Ok(Self { host, port })
    }
}

impl FromStr for NodeAddress {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ClusterError::Configuration(format!("address '{}' must be host:port", s))
        })?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ClusterError::Configuration(format!("invalid port in address '{}'", s)))?;
        Self::new(host, port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
