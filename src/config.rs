//! Application Configuration Module
//!
//! One JSON document holds everything the diagnostic engine needs at startup:
//! artifact paths, the CNN hyperparameters the weights were trained with,
//! worker pool size, severity thresholds, the crop profile table and the
//! treatment advisor settings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorConfig;
use crate::economics::CropProfileTable;
use crate::model::cnn::LeafClassifierConfig;
use crate::model::{DEFAULT_BASE_FILTERS, DEFAULT_DROPOUT};
use crate::preprocess::{CHANNELS, INPUT_SIZE, MAX_INPUT_SIZE};
use crate::severity::SeverityThresholds;
use crate::utils::error::{DiagnosisError, Result, ResultExt};

/// CNN hyperparameters; the class count always comes from the label map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Square input resolution
    pub input_size: usize,
    pub in_channels: usize,
    pub base_filters: usize,
    pub dropout_rate: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            input_size: INPUT_SIZE as usize,
            in_channels: CHANNELS,
            base_filters: DEFAULT_BASE_FILTERS,
            dropout_rate: DEFAULT_DROPOUT,
        }
    }
}

impl ModelSettings {
    /// Architecture config for a model with `num_classes` outputs
    pub fn to_classifier_config(&self, num_classes: usize) -> LeafClassifierConfig {
        LeafClassifierConfig::new()
            .with_num_classes(num_classes)
            .with_input_size(self.input_size)
            .with_in_channels(self.in_channels)
            .with_base_filters(self.base_filters)
            .with_dropout_rate(self.dropout_rate)
    }

    pub fn validate(&self) -> Result<()> {
        // four 2x2 pools must leave at least one pixel
        if self.input_size < 16 || self.input_size > MAX_INPUT_SIZE as usize {
            return Err(DiagnosisError::Configuration(format!(
                "model.input_size must be in range [16, {}]",
                MAX_INPUT_SIZE
            )));
        }
        if self.in_channels != CHANNELS {
            return Err(DiagnosisError::Configuration(format!(
                "model.in_channels must be {} (RGB)",
                CHANNELS
            )));
        }
        if self.base_filters == 0 {
            return Err(DiagnosisError::Configuration(
                "model.base_filters must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DiagnosisError::Configuration(
                "model.dropout_rate must be in range [0.0, 1.0)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded blocking pool for inference and segmentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub max_blocking_tasks: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_blocking_tasks: num_cpus::get(),
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Trained model record (`.mpk` extension optional)
    pub model_path: PathBuf,
    /// Class-index JSON document
    pub label_map_path: PathBuf,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub severity: SeverityThresholds,
    #[serde(default)]
    pub economics: CropProfileTable,
    #[serde(default)]
    pub advisor: AdvisorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/leaf_classifier.mpk"),
            label_map_path: PathBuf::from("models/class_indices.json"),
            model: ModelSettings::default(),
            workers: WorkerSettings::default(),
            severity: SeverityThresholds::default(),
            economics: CropProfileTable::default(),
            advisor: AdvisorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default settings pointing at the given artifacts
    pub fn new(model_path: impl Into<PathBuf>, label_map_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            label_map_path: label_map_path.into(),
            ..Default::default()
        }
    }

    /// Check every section; the first problem found is returned
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(DiagnosisError::Configuration(
                "model_path must be set".to_string(),
            ));
        }
        if self.label_map_path.as_os_str().is_empty() {
            return Err(DiagnosisError::Configuration(
                "label_map_path must be set".to_string(),
            ));
        }
        if self.workers.max_blocking_tasks == 0 {
            return Err(DiagnosisError::Configuration(
                "workers.max_blocking_tasks must be greater than 0".to_string(),
            ));
        }
        self.model.validate()?;
        self.severity.validate()?;
        self.economics.validate()?;
        self.advisor.validate()
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DiagnosisError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economics::MatchPolicy;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.workers.max_blocking_tasks >= 1);
        assert_eq!(config.model.input_size, 224);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agrodoctor.json");

        let mut config = AppConfig::new("weights/model", "weights/labels.json");
        config.economics = config.economics.with_policy(MatchPolicy::LongestMatch);
        config.workers.max_blocking_tasks = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.model_path, PathBuf::from("weights/model"));
        assert_eq!(loaded.workers.max_blocking_tasks, 3);
        assert_eq!(loaded.economics.policy, MatchPolicy::LongestMatch);
        assert_eq!(loaded.economics, config.economics);
    }

    #[test]
    fn test_minimal_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.json");
        std::fs::write(
            &path,
            r#"{"model_path": "m.mpk", "label_map_path": "labels.json", "advisor": {"api_key": "k"}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.severity, SeverityThresholds::default());
        assert_eq!(config.economics, CropProfileTable::default());
        assert_eq!(config.advisor.model, "gemini-2.5-flash");
        assert!(config.advisor.is_configured());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(DiagnosisError::PathNotFound(_))));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(DiagnosisError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.workers.max_blocking_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.economics.default.max_loss_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.dropout_rate = 1.0;
        assert!(config.validate().is_err());

        // a side this large would overflow the pixel count
        let mut config = AppConfig::default();
        config.model.input_size = 70_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.input_size = MAX_INPUT_SIZE as usize;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.severity.healthy.lower[1] = 255;
        config.severity.healthy.upper[1] = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_classifier_config_takes_class_count() {
        let settings = ModelSettings {
            input_size: 64,
            base_filters: 8,
            ..Default::default()
        };
        let config = settings.to_classifier_config(15);
        assert_eq!(config.num_classes, 15);
        assert_eq!(config.input_size, 64);
        assert_eq!(config.base_filters, 8);
    }
}
