//! # AgroDoctor
//!
//! Plant leaf disease diagnosis built on the Burn framework.
//!
//! ## Features
//!
//! - **Classification** of leaf photos with a frozen CNN, mapped to disease names
//!   through a label map in either of its two JSON layouts
//! - **Severity estimation** from HSV color segmentation of healthy and lesion tissue
//! - **Economic impact** from a configurable, ordered table of crop profiles
//! - **Treatment plans** from a hosted language model, with a non-fatal fallback
//!
//! ## Modules
//!
//! - `labels`: Label map parsing, normalization and the process-wide cache
//! - `preprocess`: Image decoding and model input tensors
//! - `model`: CNN architecture the trained weights load into
//! - `inference`: Model seam, burn adapter and arg-max classification
//! - `severity`: HSV segmentation severity estimator
//! - `economics`: Crop profiles and the loss model
//! - `advisor`: Treatment advisor gateway
//! - `pipeline`: The startup-built engine and its async service front
//! - `config`: JSON application configuration
//! - `utils`: Logging, errors and display helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agrodoctor::{AppConfig, DiagnosticEngine};
//!
//! let config = AppConfig::load("agrodoctor.json".as_ref())?;
//! let engine = DiagnosticEngine::initialize(&config)?;
//! let report = engine.diagnose(&std::fs::read("leaf.jpg")?)?;
//! println!("{} ({})", report.analysis.disease_name, report.analysis.confidence_display());
//! ```

pub mod advisor;
pub mod backend;
pub mod config;
pub mod economics;
pub mod inference;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod severity;
pub mod utils;

// Re-export commonly used items for convenience
pub use advisor::{
    advise, advisor_from_config, AdvisorConfig, GeminiAdvisor, PlaceholderAdvisor, PlanSource,
    TreatmentAdvisor, TreatmentPlan, TreatmentRequest,
};
pub use config::AppConfig;
pub use economics::{
    estimate_economic_impact, CropProfile, CropProfileTable, EconomicImpactEstimate, MatchPolicy,
};
pub use inference::{BurnModel, ClassificationResult, Classifier, InferenceModel};
pub use labels::{LabelMap, LabelMapFormat, UNKNOWN_DISEASE};
pub use model::cnn::{LeafClassifier, LeafClassifierConfig};
pub use pipeline::{AnalysisView, DiagnosisReport, DiagnosisService, DiagnosticEngine, PlantAnalysis};
pub use preprocess::{ImagePreprocessor, ImageTensor};
pub use severity::{SeverityEstimator, SeverityReport, SeverityThresholds};
pub use utils::error::{DiagnosisError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
