//! Vigil Server Configuration
//!
//! Binding, persistence and subsystem settings for the server. Loaded from an
//! optional TOML file; command line flags are applied on top through the
//! `with_*` builders.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use vigil_common::{IngestConfig, QueryConfig, Result, StoreConfig, VigilError};

// =============================================================================
// Server Configuration
// =============================================================================

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
    pub enable_cors: bool,
    /// Snapshot directory. Without one the server runs in memory only.
    pub data_dir: Option<String>,
    pub snapshot_interval_secs: u64,
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub ingest: IngestConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            body_limit_bytes: 10 * 1024 * 1024, // 10MB
            enable_cors: true,
            data_dir: None,
            snapshot_interval_secs: 30,
            store: StoreConfig::default(),
            query: QueryConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with the specified host and port.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Read a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VigilError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| VigilError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the subsystems cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.store.chunk_interval_secs == 0 {
            return Err(VigilError::Configuration("store.chunk_interval_secs must be positive".into()));
        }
        if self.store.space_partitions == 0 {
            return Err(VigilError::Configuration("store.space_partitions must be positive".into()));
        }
        if self.query.max_page_size == 0 {
            return Err(VigilError::Configuration("query.max_page_size must be positive".into()));
        }
        if self.ingest.topic_namespace.is_empty() || self.ingest.topic_namespace.contains(&['/', '+', '#'][..]) {
            return Err(VigilError::Configuration(format!(
                "invalid ingest.topic_namespace: {:?}",
                self.ingest.topic_namespace
            )));
        }
        if self.ingest.max_insert_attempts == 0 {
            return Err(VigilError::Configuration("ingest.max_insert_attempts must be positive".into()));
        }
        Ok(())
    }

    /// Get the socket address for binding.
    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], self.port)))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Set the data directory for persistence.
    pub fn with_data_dir(mut self, data_dir: Option<String>) -> Self {
        if data_dir.is_some() {
            self.data_dir = data_dir;
        }
        self
    }

    pub fn with_ingest_enabled(mut self, enabled: bool) -> Self {
        self.ingest.enabled = enabled;
        self
    }

    pub fn with_topic_namespace(mut self, namespace: Option<String>) -> Self {
        if let Some(namespace) = namespace {
            self.ingest.topic_namespace = namespace;
        }
        self
    }

    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.query.max_page_size = max;
        self.query.default_page_size = self.query.default_page_size.min(max);
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
