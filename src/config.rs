use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::http::connection::DEFAULT_READ_BUFFER_SIZE;

/// Environment variable naming an optional YAML file of tunables.
pub const CONFIG_ENV: &str = "FILAMENT_CONFIG";
/// Environment variable holding the TLS private key password.
pub const KEY_PASSWORD_ENV: &str = "FILAMENT_TLS_KEY_PASSWORD";

pub const USAGE: &str = "\
Usage: filament <address> <http_port> <https_port> <threads> <doc_root> <cert_dir> [<compression_dir>]
  For IPv4, try:
    filament 0.0.0.0 80 443 1 . .
  For IPv6, try:
    filament 0::0 80 443 1 . .";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("expected 6 or 7 arguments, got {0}")]
    Usage(usize),

    #[error("invalid {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("thread count must be at least 1")]
    NoThreads,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings that rarely change, read from the optional YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Per-connection read buffer, in bytes
    pub read_buffer_size: usize,
    pub compression: CompressionConfig,
    pub tls: TlsConfig,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            compression: CompressionConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Static files smaller than this are never compressed
    pub min_size: u64,
    /// gzip level, 0 to 9
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_size: 1024,
            level: 6,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub key_password: Option<String>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("key_password", &self.key_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub http_port: u16,
    pub https_port: u16,
    /// Number of reactor threads
    pub threads: usize,
    pub doc_root: PathBuf,
    /// Holds server.crt, server.key and dh2048.pem. HTTPS is off without it.
    pub cert_dir: Option<PathBuf>,
    /// Where gzip artifacts go. Static compression is off without it.
    pub compression_dir: Option<PathBuf>,
    pub tuning: Tuning,
}

impl Config {
    /// A plain-HTTP configuration serving `doc_root` on an ephemeral
    /// loopback port.
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: 0,
            https_port: 0,
            threads: 1,
            doc_root: doc_root.into(),
            cert_dir: None,
            compression_dir: None,
            tuning: Tuning::default(),
        }
    }

    /// Builds the configuration from command-line arguments (without the
    /// program name) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Self::from_args(std::env::args().skip(1))?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Parses the positional arguments.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if !(6..=7).contains(&args.len()) {
            return Err(ConfigError::Usage(args.len()));
        }

        let threads: usize = parse(&args[3], "thread count")?;
        if threads == 0 {
            return Err(ConfigError::NoThreads);
        }

        Ok(Self {
            bind_address: args[0].clone(),
            http_port: parse(&args[1], "http port")?,
            https_port: parse(&args[2], "https port")?,
            threads,
            doc_root: PathBuf::from(&args[4]),
            cert_dir: Some(PathBuf::from(&args[5])),
            compression_dir: args.get(6).map(PathBuf::from),
            tuning: Tuning::default(),
        })
    }

    /// Applies the YAML file named by `FILAMENT_CONFIG` and the key password
    /// from `FILAMENT_TLS_KEY_PASSWORD`, the latter taking precedence.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            self.load_tuning(Path::new(&path))?;
        }
        if let Ok(password) = std::env::var(KEY_PASSWORD_ENV) {
            self.tuning.tls.key_password = Some(password);
        }
        Ok(())
    }

    /// Replaces the tunables with those in a YAML file.
    pub fn load_tuning(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.tuning = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn key_password(&self) -> Option<&str> {
        self.tuning.tls.key_password.as_deref()
    }
}

fn parse<T: std::str::FromStr>(value: &str, name: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
