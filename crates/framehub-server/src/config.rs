//! TOML-based server configuration.
//!
//! The server reads a single config file (by default `framehub.toml` in the
//! working directory, overridable as the first CLI argument). Every field has
//! a default, so an absent file or an empty one yields a fully working
//! configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [listen]
//! bind_address = "0.0.0.0"
//! port = 8899
//!
//! [limits]
//! max_frame_size = 65536
//! idle_timeout_secs = 300
//!
//! [router]
//! mode = "echo"
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` fall back to the
//! return value of `some_fn()` when absent from the TOML file, so a partial
//! file only has to name what it overrides.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use framehub_core::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::router::RouterMode;

/// File name tried when no config path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "framehub.toml";

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configured bind address is not a plain IP address.
    #[error("invalid bind address {addr:?}: {source}")]
    InvalidBindAddress {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// The configured frame size limit cannot be enforced on the wire.
    #[error("max_frame_size must be nonzero and fit the 4-byte length prefix, got {configured}")]
    InvalidMaxFrameSize { configured: usize },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// The `RUST_LOG` environment variable takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub limits: LimitConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

/// Listening socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port to accept connections on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Per-connection resource limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitConfig {
    /// Largest accepted frame payload in bytes.  A peer declaring a longer
    /// frame is disconnected before the body is buffered.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Seconds of inactivity after which a connection is closed.  `0`
    /// disables the idle check entirely.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Frame routing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouterConfig {
    /// Routing behavior: `"echo"` or `"broadcast"`.
    #[serde(default)]
    pub mode: RouterMode,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8899
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_idle_timeout_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen: ListenConfig::default(),
            limits: LimitConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

// ── Loading and validation ────────────────────────────────────────────────────

impl ServerConfig {
    /// Loads the configuration from `path`, returning `ServerConfig::default()`
    /// if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: ServerConfig = toml::from_str(&content)?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxFrameSize`] when the frame size limit
    /// is zero or exceeds what the 4-byte length prefix can declare.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let configured = self.limits.max_frame_size;
        if configured == 0 || configured > u32::MAX as usize {
            return Err(ConfigError::InvalidMaxFrameSize { configured });
        }
        Ok(())
    }
}

impl ListenConfig {
    /// Resolves the configured address and port into a bindable `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBindAddress`] when `bind_address` is not
    /// a plain IPv4/IPv6 address (hostnames are not resolved).
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr =
            self.bind_address
                .parse()
                .map_err(|source| ConfigError::InvalidBindAddress {
                    addr: self.bind_address.clone(),
                    source,
                })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl LimitConfig {
    /// The idle window as a `Duration`, or `None` when the check is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
