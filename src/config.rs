use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Thresholds for the duplicate verdict. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub name_threshold: u8,
    pub distance_threshold_meters: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            name_threshold: 85,
            distance_threshold_meters: 50.0,
        }
    }
}

impl DetectionConfig {
    pub fn new(name_threshold: u8, distance_threshold_meters: f64) -> Result<Self, ConfigError> {
        let config = Self {
            name_threshold,
            distance_threshold_meters,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_threshold > 100 {
            return Err(ConfigError::Invalid(format!(
                "name_threshold must be within 0..=100, got {}",
                self.name_threshold
            )));
        }
        if !self.distance_threshold_meters.is_finite() || self.distance_threshold_meters < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "distance_threshold_meters must be a finite non-negative number, got {}",
                self.distance_threshold_meters
            )));
        }
        Ok(())
    }
}

/// Where cleaned records and audit entries go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// SQLite database acting as the durable store.
    pub database_path: PathBuf,
    /// Directory for the CSV/JSONL fallback files.
    pub fallback_dir: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        let app_dir = default_app_dir();
        Self {
            database_path: app_dir.join("locations.db"),
            fallback_dir: PathBuf::from("."),
            busy_timeout_ms: 5_000,
        }
    }
}

impl SinkConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub sink: SinkConfig,
}

impl AppConfig {
    /// Load from `path`, or from the user config file when it exists, or
    /// fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.detection.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

fn default_app_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("locdedup"))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("locdedup").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detection_defaults() {
        let config = DetectionConfig::default();
        assert_eq!(config.name_threshold, 85);
        assert_eq!(config.distance_threshold_meters, 50.0);
    }

    #[test]
    fn test_detection_validation() {
        assert!(DetectionConfig::new(100, 0.0).is_ok());
        assert!(DetectionConfig::new(101, 50.0).is_err());
        assert!(DetectionConfig::new(85, -1.0).is_err());
        assert!(DetectionConfig::new(85, f64::INFINITY).is_err());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "detection": { "distance_threshold_meters": 25.0 }, "sink": { "busy_timeout_ms": 250 } }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.detection.name_threshold, 85);
        assert_eq!(config.detection.distance_threshold_meters, 25.0);
        assert_eq!(config.sink.busy_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_rejects_invalid_thresholds() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "detection": { "name_threshold": 150 } }"#).unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
