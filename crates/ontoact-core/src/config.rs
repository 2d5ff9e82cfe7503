use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OntoactError, Result};

/// Environment variable overriding the per-execution object ceiling.
pub const ENV_MAX_EXECUTION_OBJECTS: &str = "ACTION_EXECUTION_MAX_OBJECTS";

/// Top-level configuration for an ontoact process.
///
/// Loaded from `~/.ontoact/config.toml` by default. Built once at process
/// start and handed to the scheduler and backend clients by value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntoactConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub backends: BackendConfig,
}

impl OntoactConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OntoactConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| OntoactError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply process environment overrides.
    ///
    /// Call once at start-up, before the config is shared.
    pub fn apply_env_overrides(&mut self) {
        let raw = std::env::var(ENV_MAX_EXECUTION_OBJECTS).ok();
        self.execution.apply_max_objects_override(raw.as_deref());
    }
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the execution log database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.ontoact/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Action execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum number of target objects in one execution.
    pub max_execution_objects: usize,
    /// Objects processed between cancellation checks and progress snapshots.
    pub batch_size: usize,
    /// Maximum results returned when reading an execution back.
    pub results_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_execution_objects: 10_000,
            batch_size: 100,
            results_limit: 10_000,
        }
    }
}

impl ExecutionConfig {
    /// Override `max_execution_objects` from a raw environment value.
    ///
    /// Only positive integers are accepted; anything else keeps the
    /// current ceiling.
    pub fn apply_max_objects_override(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else {
            return;
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => {
                self.max_execution_objects = n;
                info!(limit = n, "Action execution max objects limit set");
            }
            _ => {
                warn!(
                    value = %raw,
                    "Ignoring invalid {} value",
                    ENV_MAX_EXECUTION_OBJECTS
                );
            }
        }
    }
}

/// Backend proxy endpoints and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the tool-box proxy service.
    pub toolbox_base_url: String,
    /// Base URL of the MCP proxy service.
    pub mcp_proxy_base_url: String,
    /// Timeout stamped on every tool call.
    pub tool_timeout_secs: u64,
    /// Timeout stamped on every MCP tool call.
    pub mcp_timeout_secs: u64,
    /// TCP connect timeout for both clients.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            toolbox_base_url: "http://127.0.0.1:9000/api/agent-operator-integration/internal-v1"
                .to_string(),
            mcp_proxy_base_url: "http://127.0.0.1:9000/api/agent-operator-integration/internal-v1"
                .to_string(),
            tool_timeout_secs: 300,
            mcp_timeout_secs: 60,
            connect_timeout_secs: 3,
        }
    }
}
