//! Runtime configuration for both processes.
//!
//! Each binary loads an optional TOML file and then applies command-line
//! overrides. Defaults match the historical deployment: RPC on 9000,
//! exception list on 8080, 65535-byte snapshot length.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error_handling::types::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Address both listeners bind to.
    pub bind_address: String,
    /// Port of the registration/capture service.
    pub rpc_port: u16,
    /// Port of the auxiliary HTTP service.
    pub http_port: u16,
    /// Directory trace files are written into.
    pub output_dir: PathBuf,
    /// Directory holding `exceptions.list`.
    pub public_dir: PathBuf,
    /// Snapshot length declared in every trace-file header. Explicit on
    /// purpose; nothing infers it.
    pub snapshot_length: u32,
    /// Link-layer type declared in every trace-file header.
    pub link_type: u32,
    /// How long a freshly accepted connection may take to send its first
    /// control frame.
    pub handshake_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            bind_address: "0.0.0.0".to_string(),
            rpc_port: 9000,
            http_port: 8080,
            output_dir: PathBuf::from("."),
            public_dir: PathBuf::from("./public"),
            snapshot_length: 65535,
            link_type: crate::session::pcap::LINKTYPE_ETHERNET,
            handshake_timeout_secs: 60,
        }
    }
}

impl CollectorConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: CollectorConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_port == 0 || self.http_port == 0 {
            return Err(ConfigError::BadPortsRange(
                "ports must be non-zero".to_string(),
            ));
        }
        if self.rpc_port == self.http_port {
            return Err(ConfigError::BadPortsRange(format!(
                "RPC and HTTP ports collide on {}",
                self.rpc_port
            )));
        }
        if self.snapshot_length == 0 {
            return Err(ConfigError::BadSnapshotLength(
                "snapshot_length must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the output directory and checks the public one exists.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_dir)?;
        if !self.public_dir.is_dir() {
            return Err(ConfigError::DirectoryDoesNotExist(format!(
                "public directory {} not found",
                self.public_dir.display()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector address the agent connects to.
    pub collector_address: String,
    pub rpc_port: u16,
    pub http_port: u16,
    /// Fetch the published exception list and fold it into the filter.
    pub use_exception_list: bool,
    /// Resolve domain entries of the exception list via DNS.
    pub resolve_domains: bool,
    /// User-supplied capture filter fragment, appended verbatim.
    pub capture_filter: String,
    /// Bounded timeout on the registration exchange.
    pub register_timeout_secs: u64,
    /// Log progress every N packets.
    pub stats_every: u64,
    /// Stop streaming after this many packets.
    pub max_packets: Option<u64>,
    /// Stop streaming after this many frame bytes.
    pub max_bytes: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            collector_address: "127.0.0.1".to_string(),
            rpc_port: 9000,
            http_port: 8080,
            use_exception_list: false,
            resolve_domains: false,
            capture_filter: String::new(),
            register_timeout_secs: 60,
            stats_every: 1000,
            max_packets: None,
            max_bytes: None,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: AgentConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_port == 0 || self.http_port == 0 {
            return Err(ConfigError::BadPortsRange(
                "ports must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rpc_endpoint(&self) -> String {
        format!("{}:{}", self.collector_address, self.rpc_port)
    }
}
