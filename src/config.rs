//! Process-wide engine configuration.

use crate::error::{CubeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Configuration shared by every cube in the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Largest window a single paging operation may materialize, in megabytes.
    pub memory_ceiling_mb: usize,

    /// Directory for temporary backing stores.
    pub temp_dir: PathBuf,

    /// Largest hole, in elements, bridged when coalescing a sparse selection into one read.
    pub column_run_gap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_mb: 256,
            temp_dir: std::env::temp_dir(),
            column_run_gap: 64,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RASTERCUBE_MEMORY_CEILING_MB") {
            if let Ok(size) = val.parse() {
                config.memory_ceiling_mb = size;
            }
        }

        if let Ok(val) = std::env::var("RASTERCUBE_TEMP_DIR") {
            if !val.is_empty() {
                config.temp_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("RASTERCUBE_COLUMN_RUN_GAP") {
            if let Ok(gap) = val.parse() {
                config.column_run_gap = gap;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.memory_ceiling_mb == 0 {
            return Err(CubeError::invalid("memory_ceiling_mb must be > 0"));
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err(CubeError::invalid("temp_dir must not be empty"));
        }

        Ok(())
    }

    /// Get the memory ceiling in bytes.
    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_mb as u64 * 1024 * 1024
    }
}

fn cell() -> &'static RwLock<EngineConfig> {
    static GLOBAL: OnceLock<RwLock<EngineConfig>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(EngineConfig::from_env()))
}

/// Snapshot of the process-wide configuration
pub fn global() -> EngineConfig {
    cell().read().clone()
}

/// Install a new process-wide configuration.
pub fn set_global(config: EngineConfig) -> Result<()> {
    config.validate()?;
    tracing::info!(
        ceiling_mb = config.memory_ceiling_mb,
        temp_dir = %config.temp_dir.display(),
        "engine configuration updated"
    );
    *cell().write() = config;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.memory_ceiling_mb, 256);
        assert_eq!(config.column_run_gap, 64);
        assert_eq!(config.memory_ceiling_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.memory_ceiling_mb = 0;
        assert!(config.validate().is_err());

        config = EngineConfig::default();
        config.temp_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejected_global_leaves_previous() {
        let before = global();
        let bad = EngineConfig {
            memory_ceiling_mb: 0,
            ..EngineConfig::default()
        };
        assert!(set_global(bad).is_err());
        assert_eq!(global(), before);
    }
}
