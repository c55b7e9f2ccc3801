//! Database and server configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to flush the WAL before a commit is acknowledged.
    pub sync_on_commit: bool,

    /// WAL size that triggers an automatic checkpoint after a commit
    /// (0 = never checkpoint automatically).
    pub checkpoint_wal_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            checkpoint_wal_bytes: 8 * 1024 * 1024, // 8 MB
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to flush the WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_wal_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_wal_bytes = bytes;
        self
    }
}

/// Where the client talks to its backend.
///
/// The core never opens connections; it only hands these values to the
/// network collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// URL scheme, `https` in production.
    pub protocol: String,
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Whether this is a production build.
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: "https".to_string(),
            host: "localhost".to_string(),
            port: 443,
            production: false,
        }
    }
}

impl ServerConfig {
    /// Creates a server configuration for the given host and port.
    ///
    /// Non-production builds talking to a non-443 port use plain `http`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, production: bool) -> Self {
        let protocol = if production || port == 443 {
            "https"
        } else {
            "http"
        };
        Self {
            protocol: protocol.to_string(),
            host: host.into(),
            port,
            production,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert!(config.checkpoint_wal_bytes > 0);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .checkpoint_wal_bytes(0);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.checkpoint_wal_bytes, 0);
    }

    #[test]
    fn server_protocol_follows_port() {
        assert_eq!(ServerConfig::new("example.com", 443, true).protocol, "https");
        assert_eq!(ServerConfig::new("localhost", 8443, false).protocol, "http");
        assert_eq!(ServerConfig::new("example.com", 8443, true).protocol, "https");
    }
}
