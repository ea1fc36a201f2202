//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `MD5FIC_LISTEN`, `MD5FIC_SERVER`,
//!    `MD5FIC_RECEIVE_DIR`, `MD5FIC_DIGEST_DIR`
//! 2. **Config file**: path via `--config <path>`, or `md5fic.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8888"
//! receive_dir = "./receive_files"
//! digest_dir = "./receive_md5"
//! max_file_size = 0            # bytes, 0 = unlimited
//! shutdown_grace_secs = 5
//!
//! [client]
//! server = "127.0.0.1:8888"
//! response_timeout_secs = 5
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::util::resolve_dir;

const DEFAULT_CONFIG_FILE: &str = "md5fic.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Receiver settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8888`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory for verified payloads (default `./receive_files`).
    #[serde(default = "default_receive_dir")]
    pub receive_dir: String,
    /// Directory for digest sidecar files (default `./receive_md5`).
    #[serde(default = "default_digest_dir")]
    pub digest_dir: String,
    /// Largest accepted payload in bytes. `0` (the default) means unlimited.
    #[serde(default)]
    pub max_file_size: u64,
    /// Seconds to let in-flight transfers finish on shutdown (default 5).
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Sender settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Receiver address (default `127.0.0.1:8888`).
    #[serde(default = "default_server")]
    pub server: String,
    /// Seconds to wait for the verdict line (default 5).
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8888".to_string()
}
fn default_receive_dir() -> String {
    "./receive_files".to_string()
}
fn default_digest_dir() -> String {
    "./receive_md5".to_string()
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_server() -> String {
    "127.0.0.1:8888".to_string()
}
fn default_response_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            receive_dir: default_receive_dir(),
            digest_dir: default_digest_dir(),
            max_file_size: 0,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `md5fic.toml` in the
    /// current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = var("MD5FIC_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(dir) = var("MD5FIC_RECEIVE_DIR") {
            self.server.receive_dir = dir;
        }
        if let Some(dir) = var("MD5FIC_DIGEST_DIR") {
            self.server.digest_dir = dir;
        }
        if let Some(server) = var("MD5FIC_SERVER") {
            self.client.server = server;
        }
    }
}

impl ServerConfig {
    pub fn receive_dir(&self) -> PathBuf {
        resolve_dir(&self.receive_dir)
    }

    pub fn digest_dir(&self) -> PathBuf {
        resolve_dir(&self.digest_dir)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl ClientConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}
