//! Connection configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TSQUERY_CONFIG or `from_file`)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tsquery_protocol::{DEFAULT_BANNER_LINES, DEFAULT_RAW_PORT, DEFAULT_SSH_PORT};

/// Which transport carries the query connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryProtocol {
    /// Plain TCP socket.
    #[default]
    Raw,
    /// Shell channel of an SSH session.
    Ssh,
}

impl QueryProtocol {
    /// Returns the server's default query port for this protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            QueryProtocol::Raw => DEFAULT_RAW_PORT,
            QueryProtocol::Ssh => DEFAULT_SSH_PORT,
        }
    }
}

impl fmt::Display for QueryProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryProtocol::Raw => write!(f, "raw"),
            QueryProtocol::Ssh => write!(f, "ssh"),
        }
    }
}

impl FromStr for QueryProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(QueryProtocol::Raw),
            "ssh" => Ok(QueryProtocol::Ssh),
            other => Err(format!("invalid protocol {:?} (expected \"raw\" or \"ssh\")", other)),
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host name or address.
    pub host: String,
    /// Transport protocol.
    pub protocol: QueryProtocol,
    /// Query port (defaults to the protocol's port).
    pub query_port: Option<u16>,
    /// Query login name (SSH user name for the SSH protocol).
    pub username: Option<String>,
    /// Query login password.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Virtual server to select after connecting, by voice port.
    pub server_port: Option<u16>,
    /// Nickname to use once a virtual server is selected.
    pub nickname: Option<String>,
    /// Upper bound for connecting and consuming the greeting, in seconds.
    pub connect_timeout_secs: u64,
    /// Send keep-alive frames while idle.
    pub keep_alive: bool,
    /// Idle time before a keep-alive frame is sent, in seconds.
    pub keep_alive_interval_secs: u64,
    /// Greeting lines to discard after connect.
    pub banner_lines: usize,
    /// Drop back-to-back identical client view/move notifications.
    pub suppress_duplicate_events: bool,
    /// File transfer inactivity timeout, in seconds.
    pub file_transfer_timeout_secs: u64,
    /// Expected SSH host key fingerprint. If None, any key is accepted.
    pub ssh_host_key_fingerprint: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            protocol: QueryProtocol::Raw,
            query_port: None,
            username: None,
            password: None,
            server_port: None,
            nickname: None,
            connect_timeout_secs: 10,
            keep_alive: true,
            keep_alive_interval_secs: 250,
            banner_lines: DEFAULT_BANNER_LINES,
            suppress_duplicate_events: true,
            file_transfer_timeout_secs: 8,
            ssh_host_key_fingerprint: None,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TSQUERY_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ConnectionConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TSQUERY_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(protocol) = std::env::var("TSQUERY_PROTOCOL") {
            if let Ok(parsed) = protocol.parse() {
                self.protocol = parsed;
            }
        }

        if let Ok(port) = std::env::var("TSQUERY_PORT") {
            if let Ok(parsed) = port.parse() {
                self.query_port = Some(parsed);
            }
        }

        if let Ok(username) = std::env::var("TSQUERY_USERNAME") {
            self.username = Some(username);
        }

        if let Ok(password) = std::env::var("TSQUERY_PASSWORD") {
            self.password = Some(password);
        }

        if let Ok(port) = std::env::var("TSQUERY_SERVER_PORT") {
            if let Ok(parsed) = port.parse() {
                self.server_port = Some(parsed);
            }
        }

        if let Ok(nickname) = std::env::var("TSQUERY_NICKNAME") {
            self.nickname = Some(nickname);
        }

        if let Ok(keep_alive) = std::env::var("TSQUERY_KEEP_ALIVE") {
            self.keep_alive = keep_alive == "1" || keep_alive.to_lowercase() == "true";
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("host not set".to_string()));
        }
        if self.protocol == QueryProtocol::Ssh
            && (self.username.is_none() || self.password.is_none())
        {
            return Err(ConfigError::ValidationError(
                "ssh protocol requires username and password".to_string(),
            ));
        }
        if self.keep_alive && self.keep_alive_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "keep_alive_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_protocol(mut self, protocol: QueryProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_query_port(mut self, port: u16) -> Self {
        self.query_port = Some(port);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = Some(port);
        self
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    pub fn with_banner_lines(mut self, lines: usize) -> Self {
        self.banner_lines = lines;
        self
    }

    pub fn with_duplicate_suppression(mut self, enabled: bool) -> Self {
        self.suppress_duplicate_events = enabled;
        self
    }

    pub fn with_ssh_host_key_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.ssh_host_key_fingerprint = Some(fingerprint.into());
        self
    }

    /// Returns the effective query port.
    pub fn port(&self) -> u16 {
        self.query_port.unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs)
    }

    pub fn file_transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.file_transfer_timeout_secs)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
