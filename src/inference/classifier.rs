//! Classifier
//!
//! Runs the frozen model on a preprocessed tensor and maps the arg-max class
//! index to a disease name through the label map.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::labels::LabelMap;
use crate::preprocess::ImageTensor;
use crate::utils::error::{DiagnosisError, Result};

/// A loaded, immutable model producing class probabilities.
///
/// Implementations are shared by reference across concurrent requests.
pub trait InferenceModel: Send + Sync {
    /// Probability vector (one entry per output class) for a single image
    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>>;

    /// Number of output classes the model was built with
    fn num_classes(&self) -> usize;

    /// Short description for startup logs
    fn describe(&self) -> String {
        format!("model with {} classes", self.num_classes())
    }
}

/// Top-1 prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Disease name, `"Unknown Disease"` when the index has no label
    pub label: String,
    /// Highest class probability, reported as is
    pub confidence: f32,
    /// Arg-max class index
    pub class_index: usize,
}

/// Index and value of the largest probability; the earliest index wins ties.
///
/// NaN entries never win. Returns `None` for an empty or all-NaN vector.
pub fn arg_max(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| !p.is_nan())
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

/// Frozen model plus the label map it was trained against
pub struct Classifier {
    model: Box<dyn InferenceModel>,
    labels: Arc<LabelMap>,
}

impl Classifier {
    pub fn new(model: Box<dyn InferenceModel>, labels: Arc<LabelMap>) -> Self {
        if model.num_classes() != labels.len() {
            warn!(
                "Model reports {} classes but the label map has {}; unmatched indices resolve to Unknown Disease",
                model.num_classes(),
                labels.len()
            );
        }
        Self { model, labels }
    }

    pub fn label_map(&self) -> &LabelMap {
        &self.labels
    }

    /// Forward pass, arg-max, label lookup
    pub fn classify(&self, tensor: &ImageTensor) -> Result<ClassificationResult> {
        let probabilities = self.model.predict(tensor)?;
        let (class_index, confidence) = arg_max(&probabilities).ok_or_else(|| {
            DiagnosisError::Inference("model returned no usable probabilities".to_string())
        })?;

        let label = self.labels.name_or_unknown(class_index).to_string();
        debug!(class_index, confidence, label = %label, "classified");

        Ok(ClassificationResult {
            label,
            confidence,
            class_index,
        })
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("model", &self.model.describe())
            .field("classes", &self.labels.len())
            .finish()
    }
}
