//! Inference module for disease classification
//!
//! This module provides:
//! - The `InferenceModel` seam a frozen model is served through
//! - Arg-max classification against the label map
//! - The burn adapter that loads trained weights from disk

pub mod burn_model;
pub mod classifier;

// Re-export main types for convenience
pub use burn_model::{resolve_record_path, BurnModel, RECORD_EXTENSION};
pub use classifier::{arg_max, ClassificationResult, Classifier, InferenceModel};
