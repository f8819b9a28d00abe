use std::time::Duration;

/// Client behaviour switches.
///
/// Built with the same chained style as a driver's connection options:
///
/// ```
/// use kvshard::ClusterOptions;
/// use std::time::Duration;
///
/// let options = ClusterOptions::new()
///     .database(4)
///     .masters_only(true)
///     .command_timeout(Duration::from_secs(2));
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterOptions {
    /// Logical database selected on every node connection
    pub database: u32,

    /// Send reads to masters instead of replicas
    pub masters_only: bool,

    /// Submit keys with their `{tag}` intact instead of stripping it
    pub preserve_hash_tags: bool,

    /// Check each node's reported role against the topology at startup
    pub verify_roles: bool,

    /// Connection establishment timeout, per attempt
    pub connect_timeout: Duration,

    /// Per node call timeout
    pub command_timeout: Option<Duration>,

    /// Issue broadcast calls to all nodes concurrently
    pub parallel_broadcast: bool,
}

impl ClusterOptions {
    pub fn new() -> Self {
        Self {
            database: 0,
            masters_only: false,
            preserve_hash_tags: false,
            verify_roles: true,
            connect_timeout: Duration::from_secs(5),
            command_timeout: None,
            parallel_broadcast: false,
        }
    }

    pub fn database(mut self, database: u32) -> Self {
        self.database = database;
        self
    }

    pub fn masters_only(mut self, masters_only: bool) -> Self {
        self.masters_only = masters_only;
        self
    }

    pub fn preserve_hash_tags(mut self, preserve: bool) -> Self {
        self.preserve_hash_tags = preserve;
        self
    }

    pub fn verify_roles(mut self, verify: bool) -> Self {
        self.verify_roles = verify;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn parallel_broadcast(mut self, parallel: bool) -> Self {
        self.parallel_broadcast = parallel;
        self
    }

    /// Parse from an options string
    ///
    /// Format: "kvshard://?db=4&masters_only=true&command_timeout_ms=500"
    ///
    /// Unknown parameters are rejected so that typos do not silently fall
    /// back to defaults.
    pub fn from_url(url: &str) -> Result<Self, String> {
        if !url.starts_with("kvshard://") {
            return Err("URL must start with 'kvshard://'".to_string());
        }

        let rest = &url["kvshard://".len()..];
        let query = match rest.split_once('?') {
            Some((_, query)) => query,
            None if rest.is_empty() || rest == "/" => "",
            None => return Err("Options must follow '?'".to_string()),
        };

        let mut options = Self::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Option '{}' has no value", pair))?;
            match name {
                "db" | "database" => {
                    options.database = value
                        .parse()
                        .map_err(|_| format!("Invalid database '{}'", value))?;
                }
                "masters_only" => options.masters_only = parse_flag(name, value)?,
                "preserve_hash_tags" => options.preserve_hash_tags = parse_flag(name, value)?,
                "verify_roles" => options.verify_roles = parse_flag(name, value)?,
                "parallel_broadcast" => options.parallel_broadcast = parse_flag(name, value)?,
                "connect_timeout_ms" => {
                    options.connect_timeout = Duration::from_millis(parse_millis(name, value)?);
                }
                "command_timeout_ms" => {
                    options.command_timeout =
                        Some(Duration::from_millis(parse_millis(name, value)?));
                }
                other => return Err(format!("Unknown option '{}'", other)),
            }
        }

        Ok(options)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be > 0".to_string());
        }

        if self.command_timeout.is_some_and(|t| t.is_zero()) {
            return Err("command_timeout must be > 0 when set".to_string());
        }

        Ok(())
    }
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, String> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(format!("Invalid boolean '{}' for '{}'", value, name)),
    }
}

fn parse_millis(name: &str, value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid milliseconds '{}' for '{}'", value, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ClusterOptions::default();
        assert_eq!(options.database, 0);
        assert!(!options.masters_only);
        assert!(options.verify_roles);
        assert!(options.command_timeout.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let options = ClusterOptions::new()
            .database(4)
            .masters_only(true)
            .preserve_hash_tags(true)
            .parallel_broadcast(true);

        assert_eq!(options.database, 4);
        assert!(options.masters_only);
        assert!(options.preserve_hash_tags);
        assert!(options.parallel_broadcast);
    }

    #[test]
    fn test_from_url() {
        let options =
            ClusterOptions::from_url("kvshard://?db=4&masters_only=true&command_timeout_ms=250")
                .unwrap();

        assert_eq!(options.database, 4);
        assert!(options.masters_only);
        assert_eq!(options.command_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_from_url_without_options() {
        assert_eq!(ClusterOptions::from_url("kvshard://").unwrap(), ClusterOptions::new());
    }

    #[test]
    fn test_invalid_url() {
        assert!(ClusterOptions::from_url("redis://localhost").is_err());
        assert!(ClusterOptions::from_url("kvshard://?db=x").is_err());
        assert!(ClusterOptions::from_url("kvshard://?mystery=1").is_err());
        assert!(ClusterOptions::from_url("kvshard://?masters_only=maybe").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ClusterOptions::new().validate().is_ok());

        let zero_connect = ClusterOptions::new().connect_timeout(Duration::ZERO);
        assert!(zero_connect.validate().is_err());

        let zero_command = ClusterOptions::new().command_timeout(Duration::ZERO);
        assert!(zero_command.validate().is_err());
    }
}
