//! Recording and replay configuration (rewind.toml)

use crate::error::{TtdError, TtdResult};
use crate::serialize::{Format, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for one time-travel session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtdConfig {
    /// Wall-clock execution time between snapshots, in milliseconds
    pub snap_interval_ms: u64,

    /// Maximum number of snapshots retained before pruning
    pub snap_history_length: u32,

    /// Serialization buffer size in bytes
    pub buffer_size: usize,

    /// Encoding for logs and snapshots
    pub format: Format,

    /// Directory persisted logs are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_uri: Option<PathBuf>,

    /// Take ready-to-run snapshots at root calls while debugging
    pub record_ready_to_run: bool,

    /// Write internal-diagnostics fields
    pub diagnostics: bool,
}

impl Default for TtdConfig {
    fn default() -> Self {
        Self {
            snap_interval_ms: 2000,
            snap_history_length: 2,
            buffer_size: DEFAULT_BUFFER_SIZE,
            format: Format::Text,
            log_uri: None,
            record_ready_to_run: true,
            diagnostics: false,
        }
    }
}

impl TtdConfig {
    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> TtdResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> TtdResult<Self> {
        let config: TtdConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> TtdResult<()> {
        if self.snap_history_length == 0 {
            return Err(TtdError::Config(
                "snap_history_length must be at least 1".to_string(),
            ));
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(TtdError::Config(format!(
                "buffer_size {} is below the minimum of {}",
                self.buffer_size, MIN_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Save the configuration as TOML
    pub fn to_file(&self, path: &Path) -> TtdResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Snapshot interval in microseconds, the unit of elapsed-time accounting
    pub fn snap_interval_us(&self) -> u64 {
        self.snap_interval_ms.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TtdConfig::default();
        assert_eq!(config.snap_interval_ms, 2000);
        assert_eq!(config.snap_history_length, 2);
        assert_eq!(config.buffer_size, 262_144);
        assert_eq!(config.format, Format::Text);
        assert!(config.record_ready_to_run);
        assert!(!config.diagnostics);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config = TtdConfig::from_str(
            r#"
snap_interval_ms = 50
format = "binary"
"#,
        )
        .unwrap();
        assert_eq!(config.snap_interval_ms, 50);
        assert_eq!(config.format, Format::Binary);
        assert_eq!(config.snap_history_length, 2);
    }

    #[test]
    fn test_validation_rejects_zero_history() {
        let err = TtdConfig::from_str("snap_history_length = 0").unwrap_err();
        assert!(matches!(err, TtdError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_small_buffer() {
        let err = TtdConfig::from_str("buffer_size = 8").unwrap_err();
        assert!(err.to_string().contains("buffer_size"));
    }

    #[test]
    fn test_bad_toml() {
        let err = TtdConfig::from_str("snap_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, TtdError::ConfigParse(_)));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewind.toml");
        let config = TtdConfig {
            snap_interval_ms: 10,
            log_uri: Some(PathBuf::from("/tmp/log")),
            ..TtdConfig::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(TtdConfig::from_file(&path).unwrap(), config);
    }
}
