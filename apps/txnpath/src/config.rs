//! # Driver Configuration
//!
//! Optional TOML file holding the model tunables and the driver's own
//! limits. Every key is optional; a missing file is the default config.
//!
//! ```toml
//! threads = 4
//! max_file_bytes = 104857600
//!
//! [model]
//! use_past_partitions = true
//! time_normalization = "committed_and_aborted"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use txnpath_core::{ModelConfig, TxnPathError};

/// Default cap on any input file (100 MB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

/// Settings of one driver run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    /// Tunables handed to every graph.
    pub model: ModelConfig,
    /// Learner threads per procedure. With more than one, vertex and edge
    /// ids depend on scheduling; counts and probabilities do not.
    pub threads: usize,
    /// Largest catalog or workload file accepted.
    pub max_file_bytes: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            threads: 1,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

impl DriverConfig {
    /// Read the config at `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, TxnPathError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            TxnPathError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), threads = config.threads, "loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, TxnPathError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| TxnPathError::SerializationError(format!("Invalid config: {}", e)))?;
        if config.threads == 0 {
            return Err(TxnPathError::SerializationError(
                "Invalid config: threads must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}
