//! Store configuration.

use basalt_core::{Error, IsolationLevel, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Caller-provided store configuration.
///
/// Plain data; nothing here touches the filesystem until `init`. The
/// serde surface uses kebab-case field names so configs read naturally
/// from JSON files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Persist to `data_dir`; false = memory-only.
    pub persist: bool,
    /// Directory containing the persistence files.
    pub data_dir: Option<PathBuf>,
    /// 0 = write through on commit; > 0 = coalesce commits and write that
    /// many milliseconds after the last one; < 0 = write only at shutdown.
    pub sync_delay_ms: i64,
    /// Isolation levels offered to callers.
    pub supported_isolation_levels: Vec<IsolationLevel>,
    /// Level used when the caller does not specify one.
    pub default_isolation: IsolationLevel,
    /// Hint passed through to external query evaluators; opaque to the
    /// storage layer.
    pub iteration_cache_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persist: false,
            data_dir: None,
            sync_delay_ms: 0,
            supported_isolation_levels: IsolationLevel::ALL.to_vec(),
            default_isolation: IsolationLevel::SnapshotRead,
            iteration_cache_threshold: 10_000,
        }
    }
}

impl StoreConfig {
    /// A memory-only store with defaults.
    pub fn memory() -> Self {
        Self::default()
    }

    /// A persistent store rooted at `data_dir` with defaults.
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            persist: true,
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid_config(format!("bad config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject contradictory configurations.
    pub fn validate(&self) -> Result<()> {
        if self.persist && self.data_dir.is_none() {
            return Err(Error::invalid_config(
                "persist = true requires a data directory",
            ));
        }
        if self.supported_isolation_levels.is_empty() {
            return Err(Error::invalid_config(
                "at least one isolation level must be supported",
            ));
        }
        if !self
            .supported_isolation_levels
            .contains(&self.default_isolation)
        {
            return Err(Error::invalid_config(format!(
                "default isolation {} is not in the supported set",
                self.default_isolation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_isolation, IsolationLevel::SnapshotRead);
        assert_eq!(config.supported_isolation_levels.len(), 5);
        assert_eq!(config.sync_delay_ms, 0);
    }

    #[test]
    fn test_persist_requires_data_dir() {
        let config = StoreConfig {
            persist: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_isolation_must_be_supported() {
        let config = StoreConfig {
            supported_isolation_levels: vec![IsolationLevel::None],
            default_isolation: IsolationLevel::Serializable,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));

        let config = StoreConfig {
            supported_isolation_levels: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = StoreConfig::from_json_str(
            r#"{
                "persist": true,
                "data-dir": "/tmp/basalt-data",
                "sync-delay-ms": 250,
                "default-isolation": "SNAPSHOT"
            }"#,
        )
        .unwrap();
        assert!(config.persist);
        assert_eq!(config.sync_delay_ms, 250);
        assert_eq!(config.default_isolation, IsolationLevel::Snapshot);
        // Unspecified fields keep their defaults.
        assert_eq!(config.supported_isolation_levels.len(), 5);

        assert!(StoreConfig::from_json_str("{ nope }").is_err());
    }
}
