//! Burn-backed inference model
//!
//! Loads a `CompactRecorder` record into the [`LeafClassifier`] skeleton and
//! serves softmax probabilities through the [`InferenceModel`] trait.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor, TensorData},
};
use tracing::info;

use super::classifier::InferenceModel;
use crate::model::cnn::{LeafClassifier, LeafClassifierConfig};
use crate::preprocess::ImageTensor;
use crate::utils::error::{DiagnosisError, Result};

/// Extension `CompactRecorder` appends to saved records
pub const RECORD_EXTENSION: &str = "mpk";

/// Resolve a record path given with or without its `.mpk` extension
pub fn resolve_record_path(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let with_extension = path.with_extension(RECORD_EXTENSION);
    with_extension.is_file().then_some(with_extension)
}

/// Frozen [`LeafClassifier`] on backend `B`.
///
/// Burn modules are `Send` but not guaranteed `Sync`, so the forward pass
/// takes a short lock around the module.
pub struct BurnModel<B: Backend> {
    model: Mutex<LeafClassifier<B>>,
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> BurnModel<B> {
    /// Wrap an in-memory module
    pub fn from_module(model: LeafClassifier<B>, device: B::Device) -> Self {
        let num_classes = model.num_classes();
        Self {
            model: Mutex::new(model),
            device,
            num_classes,
        }
    }

    /// Build the skeleton from `config` and load trained weights from `path`
    pub fn load(path: &Path, config: &LeafClassifierConfig, device: &B::Device) -> Result<Self> {
        let record_path =
            resolve_record_path(path).ok_or_else(|| DiagnosisError::PathNotFound(path.to_path_buf()))?;

        let recorder = CompactRecorder::new();
        let model = LeafClassifier::<B>::new(config, device)
            .load_file(record_path.clone(), &recorder, device)
            .map_err(|e| DiagnosisError::Model(format!("Failed to load model: {:?}", e)))?;

        info!(
            "Loaded model from {:?} ({} classes, {}x{} input)",
            record_path, config.num_classes, config.input_size, config.input_size
        );

        Ok(Self::from_module(model, device.clone()))
    }
}

impl<B: Backend> InferenceModel for BurnModel<B> {
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let data = TensorData::new(input.as_slice().to_vec(), input.shape());
        let tensor = Tensor::<B, 4>::from_data(data, &self.device);

        let probabilities = {
            let model = self
                .model
                .lock()
                .map_err(|_| DiagnosisError::Inference("model lock poisoned".to_string()))?;
            model.forward_softmax(tensor)
        };

        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| DiagnosisError::Inference(format!("unreadable model output: {:?}", e)))
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn describe(&self) -> String {
        format!("burn LeafClassifier ({} classes)", self.num_classes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> LeafClassifierConfig {
        LeafClassifierConfig::new()
            .with_num_classes(3)
            .with_input_size(32)
            .with_base_filters(4)
    }

    #[test]
    fn test_predict_returns_distribution() {
        let device = Default::default();
        let model = BurnModel::from_module(
            LeafClassifier::<TestBackend>::new(&small_config(), &device),
            device,
        );

        let probs = model.predict(&ImageTensor::zeros(32)).unwrap();
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_save_and_load_record() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("leaf_model");
        let device = Default::default();

        LeafClassifier::<TestBackend>::new(&small_config(), &device)
            .save_file(base.clone(), &CompactRecorder::new())
            .unwrap();

        // both spellings resolve to the saved record
        assert!(resolve_record_path(&base).is_some());
        assert!(resolve_record_path(&base.with_extension("mpk")).is_some());

        let loaded = BurnModel::<TestBackend>::load(&base, &small_config(), &device).unwrap();
        assert_eq!(loaded.num_classes(), 3);
        assert_eq!(loaded.predict(&ImageTensor::zeros(32)).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_record_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = BurnModel::<TestBackend>::load(
            &dir.path().join("nope"),
            &small_config(),
            &Default::default(),
        );
        assert!(matches!(result, Err(DiagnosisError::PathNotFound(_))));
    }

    #[test]
    fn test_corrupt_record_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mpk");
        std::fs::write(&path, b"not a record").unwrap();

        let result = BurnModel::<TestBackend>::load(&path, &small_config(), &Default::default());
        assert!(matches!(result, Err(DiagnosisError::Model(_))));
    }
}
