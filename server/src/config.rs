//! Runtime configuration.
//!
//! Values come from three layers: built in defaults, an optional TOML file, and command line
//! flags.  Each layer overrides the one before it.

use crate::fanout::DiscardThresholds;
use clap::Parser;
use ingest_rtmp::sessions::ServerSessionConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Command line flags
#[derive(Debug, Parser)]
#[command(name = "ingest-server", about = "Live RTMP ingest and distribution server")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to accept RTMP connections on, overriding the config file
    #[arg(long)]
    pub listen: Option<SocketAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: SocketAddr,

    /// Seconds a client has to complete the handshake
    pub handshake_timeout_secs: u64,

    /// Backlog a subscriber may build up before interframes start getting dropped
    pub discard: DiscardThresholds,

    pub gop_cache_enabled: bool,

    /// Upper bound on tags kept for fast join.  Longer GOPs are not cached.
    pub gop_cache_max_tags: usize,

    pub buffer_pool_max_buffers: usize,
    pub buffer_pool_max_buffer_size: usize,

    /// Inbound bytes per second a single connection may send, unlimited when absent
    pub max_ingress_bytes_per_sec: Option<u64>,
    pub bitrate_window_secs: u64,

    /// Packets waiting to be written to one socket before producers wait
    pub writer_queue_depth: usize,

    /// Stream keys allowed to publish.  Empty allows every key.
    pub publish_keys: Vec<String>,

    pub session: SessionSettings,
}

/// Protocol values negotiated with every client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub fms_version: String,
    pub chunk_size: u32,
    pub max_inbound_chunk_size: u32,
    pub peer_bandwidth: u32,
    pub window_ack_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 1935)),
            handshake_timeout_secs: 10,
            discard: DiscardThresholds::default(),
            gop_cache_enabled: true,
            gop_cache_max_tags: 1024,
            buffer_pool_max_buffers: 4096,
            buffer_pool_max_buffer_size: 1024 * 1024,
            max_ingress_bytes_per_sec: None,
            bitrate_window_secs: 5,
            writer_queue_depth: 64,
            publish_keys: Vec::new(),
            session: SessionSettings::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = ServerSessionConfig::new();
        SessionSettings {
            fms_version: defaults.fms_version,
            chunk_size: defaults.chunk_size,
            max_inbound_chunk_size: defaults.max_inbound_chunk_size,
            peer_bandwidth: defaults.peer_bandwidth,
            window_ack_size: defaults.window_ack_size,
        }
    }
}

impl ServerConfig {
    /// Builds the effective configuration from the command line and the file it points at
    pub fn load(cli: &Cli) -> Result<ServerConfig, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = cli.listen {
            config.listen_address = listen;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &PathBuf) -> Result<ServerConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        ServerConfig::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<ServerConfig, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.chunk_size == 0 || self.session.chunk_size > 0x7FFF_FFFF {
            return Err(ConfigError::Invalid(format!(
                "chunk_size must be between 1 and 2147483647, got {}",
                self.session.chunk_size
            )));
        }

        if self.session.max_inbound_chunk_size == 0 {
            return Err(ConfigError::Invalid("max_inbound_chunk_size must be positive".to_string()));
        }

        if self.writer_queue_depth == 0 {
            return Err(ConfigError::Invalid("writer_queue_depth must be positive".to_string()));
        }

        if self.bitrate_window_secs == 0 {
            return Err(ConfigError::Invalid("bitrate_window_secs must be positive".to_string()));
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn bitrate_window(&self) -> Duration {
        Duration::from_secs(self.bitrate_window_secs)
    }

    pub fn discard_thresholds(&self) -> DiscardThresholds {
        self.discard
    }

    pub fn session_config(&self) -> ServerSessionConfig {
        ServerSessionConfig {
            fms_version: self.session.fms_version.clone(),
            chunk_size: self.session.chunk_size,
            max_inbound_chunk_size: self.session.max_inbound_chunk_size,
            peer_bandwidth: self.session.peer_bandwidth,
            window_ack_size: self.session.window_ack_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();

        assert_eq!(config.listen_address, SocketAddr::from(([0, 0, 0, 0], 1935)));
        assert_eq!(config.session.chunk_size, 4096);
        assert!(config.gop_cache_enabled);
        assert_eq!(config.max_ingress_bytes_per_sec, None);
    }

    #[test]
    fn file_values_override_defaults() {
        let contents = r#"
            listen_address = "127.0.0.1:19350"
            max_ingress_bytes_per_sec = 500000
            publish_keys = ["abc"]

            [discard]
            max_packets = 10

            [session]
            chunk_size = 60000
        "#;

        let config = ServerConfig::from_toml(contents).unwrap();

        assert_eq!(config.listen_address, SocketAddr::from(([127, 0, 0, 1], 19350)));
        assert_eq!(config.discard_thresholds().max_packets, 10);
        assert_eq!(config.discard_thresholds().max_bytes, DiscardThresholds::default().max_bytes);
        assert_eq!(config.max_ingress_bytes_per_sec, Some(500_000));
        assert_eq!(config.publish_keys, vec!["abc".to_string()]);
        assert_eq!(config.session.chunk_size, 60000);
        assert_eq!(config.session.window_ack_size, ServerSessionConfig::new().window_ack_size);
    }

    #[test]
    fn command_line_overrides_listen_address() {
        let cli = Cli::parse_from(["ingest-server", "--listen", "127.0.0.1:2000"]);
        let config = ServerConfig::load(&cli).unwrap();

        assert_eq!(config.listen_address, SocketAddr::from(([127, 0, 0, 1], 2000)));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut config = ServerConfig::default();
        config.session.chunk_size = 0;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
