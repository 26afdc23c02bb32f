//! TOML-based configuration for Currens nodes.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Currens\config.toml`
//! - Linux:    `~/.config/currens/config.toml`
//! - macOS:    `~/Library/Application Support/Currens/config.toml`
//!
//! A different file can be passed explicitly (the node binary's `--config`).
//!
//! ```toml
//! [node]
//! log_level = "info"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! port = 7777
//! connect_timeout_ms = 5000
//! max_clients = 32
//!
//! [transport]
//! max_frame_len = 1048576
//! outbound_capacity = 1024
//! ```
//!
//! Every field has a default, so a missing file, a missing section, or a
//! missing key all fall back to working values.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::config::{ClientConfig, ServerConfig, TransportConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but cannot be used.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub transport: TransportSection,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// `tracing` filter, e.g. `"info"` or `"currens_net=debug,info"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where to listen or connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSection {
    /// Address a server listens on, and the host a client connects to when
    /// none is given on the command line.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<usize>,
}

/// Framing and queueing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportSection {
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7777
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_len() -> usize {
    1024 * 1024
}
fn default_event_capacity() -> usize {
    128
}
fn default_inbound_capacity() -> usize {
    256
}
fn default_outbound_capacity() -> usize {
    1024
}
fn default_sweep_interval_ms() -> u64 {
    250
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_clients: None,
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
            event_capacity: default_event_capacity(),
            inbound_capacity: default_inbound_capacity(),
            outbound_capacity: default_outbound_capacity(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

// ── Conversion to runtime settings ────────────────────────────────────────────

impl TransportSection {
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_frame_len: self.max_frame_len,
            event_capacity: self.event_capacity,
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

impl AppConfig {
    /// Builds the settings for a server or host.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] when `bind_address` is not an IP address.
    /// Range checks happen later, in [`ServerConfig::validate`].
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let bind_address: IpAddr =
            self.network
                .bind_address
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                    field: "network.bind_address",
                    reason: e.to_string(),
                })?;
        Ok(ServerConfig {
            bind_address,
            port: self.network.port,
            max_clients: self.network.max_clients,
            transport: self.transport.to_transport_config(),
        })
    }

    /// Builds the settings for a client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            transport: self.transport.to_transport_config(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads [`AppConfig`] from `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `currens`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Currens"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("currens"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Currens")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("currens_test_{tag}_{}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn test_app_config_default_values() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.node.log_level, "info");
        assert_eq!(cfg.network.port, 7777);
        assert_eq!(cfg.network.max_clients, None);
        assert_eq!(cfg.transport.max_frame_len, 1024 * 1024);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[network]
port = 9000
max_clients = 4
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.port, 9000);
        assert_eq!(cfg.network.max_clients, Some(4));
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.transport.inbound_capacity, 256);
        assert_eq!(cfg.transport.outbound_capacity, 1024);
    }

    #[test]
    fn test_round_trip_omits_unset_max_clients() {
        let cfg = AppConfig::default();

        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&toml_str).expect("deserialize");

        assert!(!toml_str.contains("max_clients"));
        assert_eq!(cfg, restored);
    }

    #[test]
    fn test_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_server_config_conversion() {
        let mut cfg = AppConfig::default();
        cfg.network.bind_address = "127.0.0.1".to_string();
        cfg.network.max_clients = Some(8);
        cfg.transport.sweep_interval_ms = 100;

        let server = cfg.server_config().unwrap();

        assert!(server.bind_address.is_loopback());
        assert_eq!(server.max_clients, Some(8));
        assert_eq!(server.transport.sweep_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_bad_bind_address_is_invalid_value() {
        let mut cfg = AppConfig::default();
        cfg.network.bind_address = "not-an-ip".to_string();
        assert!(matches!(
            cfg.server_config(),
            Err(ConfigError::InvalidValue {
                field: "network.bind_address",
                ..
            })
        ));
    }

    #[test]
    fn test_client_config_conversion_uses_timeout() {
        let mut cfg = AppConfig::default();
        cfg.network.connect_timeout_ms = 1500;
        assert_eq!(cfg.client_config().connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        // Arrange
        let path = temp_path("roundtrip");
        let mut cfg = AppConfig::default();
        cfg.network.port = 12345;
        cfg.node.log_level = "debug".to_string();

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
        // NoPlatformConfigDir (e.g. a stripped CI env) is also acceptable.
    }
}
