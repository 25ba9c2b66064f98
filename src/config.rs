//! Configuration for the server and the client handle

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::Codec;
use crate::signal::DEFAULT_RETENTION;
use crate::{Error, Result};

/// Default listening port of the server.
pub const DEFAULT_PORT: u16 = 8081;

/// Default cap on a request body (64 MiB).
pub const DEFAULT_MAX_BODY: usize = 64 * 1024 * 1024;

/// Environment variable naming the client's log directory.
pub const ROOT_ENV: &str = "ML_LOGGER_ROOT";

/// Environment variable naming the client's prefix.
pub const PREFIX_ENV: &str = "ML_LOGGER_PREFIX";

/// Server configuration
///
/// Usually loaded from a TOML file with [`Self::load`]. [`Default`] gives a
/// config suitable for local development.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory of all record logs
    pub root: PathBuf,
    /// Address to bind to (0.0.0.0 if unset)
    pub bind_addr: Option<IpAddr>,
    /// Port to bind to; 0 picks a free port
    pub port: u16,
    /// Idle time after which a signal mailbox is evicted
    #[serde(with = "humantime_serde")]
    pub mailbox_retention: Duration,
    /// How often idle mailboxes are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// fsync every append and overwrite
    pub sync_writes: bool,
    /// Compression for newly written frames; existing frames keep theirs
    pub codec: Codec,
    /// Largest accepted request body in bytes
    pub max_body: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("ml-logger"),
            bind_addr: None,
            port: DEFAULT_PORT,
            mailbox_retention: DEFAULT_RETENTION,
            sweep_interval: Duration::from_secs(60),
            sync_writes: false,
            codec: Codec::Plain,
            max_body: DEFAULT_MAX_BODY,
        }
    }
}

impl ServerConfig {
    /// Config serving `root` on an ephemeral localhost port (tests, embedding).
    #[must_use]
    pub fn ephemeral(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bind_addr: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: 0,
            ..Self::default()
        }
    }

    /// Load the config from a TOML file.
    ///
    /// # Errors
    /// Returns [`Error::Unavailable`] if the file cannot be read and
    /// [`Error::Serialization`] if it is not valid TOML for this struct.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::unavailable(format!("failed to read {}", path.display()), e))?;
        toml::from_str(&s).map_err(|e| {
            Error::Serialization(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Socket address to listen on.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.bind_addr.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            self.port,
        )
    }
}

/// Where a client sends its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDirectory {
    /// Write directly below a local directory
    Local(PathBuf),
    /// Talk to a logging server
    Remote(Url),
}

impl LogDirectory {
    /// Whether records go over the network.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl FromStr for LogDirectory {
    type Err = Error;

    /// `http://` and `https://` locations are remote; anything else is a
    /// local path.
    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with("http://") || s.starts_with("https://") {
            let url = Url::parse(s)
                .map_err(|e| Error::InvalidKey(format!("invalid server url {s:?}: {e}")))?;
            Ok(Self::Remote(url))
        } else if s.is_empty() {
            Err(Error::InvalidKey("empty log directory".to_string()))
        } else {
            Ok(Self::Local(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for LogDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Client handle configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Local directory or server URL
    pub log_directory: LogDirectory,
    /// Experiment prefix all operations default to
    pub prefix: String,
    /// Per-request timeout in remote mode
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a config with the default 30 second timeout.
    #[must_use]
    pub fn new(log_directory: LogDirectory, prefix: impl Into<String>) -> Self {
        Self {
            log_directory,
            prefix: prefix.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a config from `ML_LOGGER_ROOT` and `ML_LOGGER_PREFIX`.
    ///
    /// The root defaults to the server's default directory and the prefix
    /// to empty.
    ///
    /// # Errors
    /// Returns [`Error::InvalidKey`] if `ML_LOGGER_ROOT` is not a valid
    /// location.
    pub fn from_env() -> Result<Self> {
        let log_directory = match std::env::var(ROOT_ENV) {
            Ok(root) => root.parse()?,
            Err(_) => LogDirectory::Local(ServerConfig::default().root),
        };
        let prefix = std::env::var(PREFIX_ENV).unwrap_or_default();
        Ok(Self::new(log_directory, prefix))
    }
}
