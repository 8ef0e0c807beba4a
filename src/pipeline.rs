//! Diagnostic pipeline
//!
//! [`DiagnosticEngine`] is the immutable handle built once at startup: label
//! map, frozen model, severity thresholds and crop profiles. Every operation
//! on it is synchronous and CPU-bound.
//!
//! [`DiagnosisService`] is the async front. It runs the CPU stages on a
//! bounded blocking pool and adds the treatment plan from the advisor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::advisor::{advise, advisor_from_config, TreatmentAdvisor, TreatmentPlan, TreatmentRequest};
use crate::backend::{backend_name, default_device, DefaultBackend};
use crate::config::AppConfig;
use crate::economics::{estimate_economic_impact, CropProfileTable, EconomicImpactEstimate};
use crate::inference::{BurnModel, ClassificationResult, Classifier, InferenceModel};
use crate::labels::{process_label_map, LabelMap};
use crate::preprocess::{decode_image, ImagePreprocessor, ImageTensor};
use crate::severity::{SeverityEstimator, SeverityReport};
use crate::utils::error::{DiagnosisError, Result};
use crate::utils::{format_fraction_percent, format_percent, StageTimer};

/// Disease, confidence and severity for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantAnalysis {
    pub disease_name: String,
    /// Top-1 probability in `[0, 1]`
    pub confidence: f32,
    /// Diseased share of the leaf in `[0, 100]`
    pub severity_percentage: f32,
}

/// [`PlantAnalysis`] with percentages rendered for display, e.g. `"97.31%"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisView {
    pub disease_name: String,
    pub confidence: String,
    pub severity_percentage: String,
}

impl PlantAnalysis {
    pub fn new(classification: ClassificationResult, severity: SeverityReport) -> Self {
        Self {
            disease_name: classification.label,
            confidence: classification.confidence,
            severity_percentage: severity.severity_percentage,
        }
    }

    pub fn confidence_display(&self) -> String {
        format_fraction_percent(self.confidence)
    }

    pub fn severity_display(&self) -> String {
        format_percent(self.severity_percentage)
    }

    pub fn to_view(&self) -> AnalysisView {
        AnalysisView {
            disease_name: self.disease_name.clone(),
            confidence: self.confidence_display(),
            severity_percentage: self.severity_display(),
        }
    }
}

/// Full diagnosis: analysis, economic impact and, from the service, a treatment plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub analysis: PlantAnalysis,
    pub economic_impact: EconomicImpactEstimate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<TreatmentPlan>,
}

/// Immutable, shareable diagnostic engine
pub struct DiagnosticEngine {
    preprocessor: ImagePreprocessor,
    classifier: Classifier,
    severity: SeverityEstimator,
    economics: CropProfileTable,
}

impl DiagnosticEngine {
    /// Load the process-wide label map and the trained model.
    ///
    /// Any missing or corrupt artifact, or a model whose output width differs
    /// from the label map, aborts startup.
    pub fn initialize(config: &AppConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let labels = process_label_map(&config.label_map_path)?;
        Self::initialize_with_labels(config, labels)
    }

    /// Like [`initialize`](Self::initialize) with an already loaded label map
    pub fn initialize_with_labels(config: &AppConfig, labels: Arc<LabelMap>) -> Result<Arc<Self>> {
        info!(
            "Label map: {} classes ({} format)",
            labels.len(),
            labels.source_format()
        );

        let model_config = config.model.to_classifier_config(labels.len());
        let model = BurnModel::<DefaultBackend>::load(
            &config.model_path,
            &model_config,
            &default_device(),
        )?;
        info!("Using backend: {}", backend_name());

        Self::from_parts(Box::new(model), labels, config).map(Arc::new)
    }

    /// Assemble an engine around any model, probing its output width first
    pub fn from_parts(
        model: Box<dyn InferenceModel>,
        labels: Arc<LabelMap>,
        config: &AppConfig,
    ) -> Result<Self> {
        let preprocessor = ImagePreprocessor::new(config.model.input_size as u32);

        let output = model.predict(&ImageTensor::zeros(config.model.input_size))?;
        if output.len() != labels.len() {
            return Err(DiagnosisError::Model(format!(
                "model produces {} outputs but the label map has {} classes",
                output.len(),
                labels.len()
            )));
        }
        info!("Model ready: {}", model.describe());

        Ok(Self {
            preprocessor,
            classifier: Classifier::new(model, labels),
            severity: SeverityEstimator::new(config.severity),
            economics: config.economics.clone(),
        })
    }

    pub fn label_map(&self) -> &LabelMap {
        self.classifier.label_map()
    }

    /// Disease name and confidence for an image
    pub fn classify_and_score(&self, image_bytes: &[u8]) -> Result<ClassificationResult> {
        let timer = StageTimer::start("preprocess");
        let tensor = self.preprocessor.preprocess_bytes(image_bytes)?;
        timer.finish();

        let timer = StageTimer::start("classify");
        let result = self.classifier.classify(&tensor)?;
        timer.finish();
        Ok(result)
    }

    /// Diseased share of the leaf-colored pixels
    pub fn estimate_severity(&self, image_bytes: &[u8]) -> Result<SeverityReport> {
        let timer = StageTimer::start("severity");
        let report = self.severity.estimate_bytes(image_bytes)?;
        timer.finish();
        Ok(report)
    }

    /// Loss estimate for a disease at a given severity
    pub fn estimate_economic_impact(&self, disease_name: &str, severity: f64) -> EconomicImpactEstimate {
        estimate_economic_impact(&self.economics, disease_name, severity)
    }

    /// Disease name for a class index, `"Unknown Disease"` when absent
    pub fn label_map_lookup(&self, index: usize) -> &str {
        self.label_map().name_or_unknown(index)
    }

    /// Classification and severity from a single decode of the image
    pub fn analyze(&self, image_bytes: &[u8]) -> Result<PlantAnalysis> {
        let timer = StageTimer::start("decode");
        let image = decode_image(image_bytes)?;
        timer.finish();

        let timer = StageTimer::start("classify");
        let classification = self.classifier.classify(&self.preprocessor.preprocess(&image))?;
        timer.finish();

        let timer = StageTimer::start("severity");
        let severity = self.severity.estimate_image(&image.to_rgb8());
        timer.finish();

        Ok(PlantAnalysis::new(classification, severity))
    }

    /// Analysis plus economic impact
    pub fn diagnose(&self, image_bytes: &[u8]) -> Result<DiagnosisReport> {
        let analysis = self.analyze(image_bytes)?;
        Ok(self.report_for(analysis))
    }

    fn report_for(&self, analysis: PlantAnalysis) -> DiagnosisReport {
        let economic_impact =
            self.estimate_economic_impact(&analysis.disease_name, analysis.severity_percentage as f64);
        DiagnosisReport {
            analysis,
            economic_impact,
            treatment: None,
        }
    }
}

impl std::fmt::Debug for DiagnosticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticEngine")
            .field("classifier", &self.classifier)
            .field("input_size", &self.preprocessor.image_size)
            .field("crop_profiles", &self.economics.entries.len())
            .finish()
    }
}

/// Async front over a shared engine and a treatment advisor
#[derive(Clone)]
pub struct DiagnosisService {
    engine: Arc<DiagnosticEngine>,
    advisor: Arc<dyn TreatmentAdvisor>,
    permits: Arc<Semaphore>,
}

impl DiagnosisService {
    pub fn new(
        engine: Arc<DiagnosticEngine>,
        advisor: Arc<dyn TreatmentAdvisor>,
        max_blocking_tasks: usize,
    ) -> Self {
        Self {
            engine,
            advisor,
            permits: Arc::new(Semaphore::new(max_blocking_tasks.max(1))),
        }
    }

    /// Initialize the engine and advisor described by `config`
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let engine = DiagnosticEngine::initialize(config)?;
        let advisor = advisor_from_config(&config.advisor)?;
        Ok(Self::new(engine, advisor, config.workers.max_blocking_tasks))
    }

    /// Run a CPU-bound engine call on the blocking pool, bounded by the semaphore
    async fn run_blocking<T, F>(&self, stage: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&DiagnosticEngine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DiagnosisError::Inference("worker pool is closed".to_string()))?;
        let engine = Arc::clone(&self.engine);

        debug!(stage, "dispatching to blocking pool");
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f(&engine)
        })
        .await
        .map_err(|e| DiagnosisError::Inference(format!("{} worker failed: {}", stage, e)))?
    }

    pub async fn classify(&self, image_bytes: Arc<[u8]>) -> Result<ClassificationResult> {
        self.run_blocking("classify", move |engine| engine.classify_and_score(&image_bytes))
            .await
    }

    pub async fn severity(&self, image_bytes: Arc<[u8]>) -> Result<SeverityReport> {
        self.run_blocking("severity", move |engine| engine.estimate_severity(&image_bytes))
            .await
    }

    /// Classification and severity run concurrently; either failure fails the request
    pub async fn analyze(&self, image_bytes: Vec<u8>) -> Result<PlantAnalysis> {
        let bytes: Arc<[u8]> = image_bytes.into();
        let (classification, severity) =
            tokio::try_join!(self.classify(Arc::clone(&bytes)), self.severity(bytes))?;
        Ok(PlantAnalysis::new(classification, severity))
    }

    /// Treatment plan; never fails
    pub async fn treatment(&self, request: &TreatmentRequest) -> TreatmentPlan {
        advise(self.advisor.as_ref(), request).await
    }

    /// Analysis, economic impact and treatment plan in `language`
    pub async fn diagnose(&self, image_bytes: Vec<u8>, language: &str) -> Result<DiagnosisReport> {
        let analysis = self.analyze(image_bytes).await?;
        let request = TreatmentRequest::new(analysis.disease_name.clone(), analysis.severity_percentage)
            .with_language(language);

        let mut report = self.engine.report_for(analysis);
        report.treatment = Some(self.treatment(&request).await);
        Ok(report)
    }
}

impl std::fmt::Debug for DiagnosisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosisService")
            .field("engine", &self.engine)
            .field("advisor", &self.advisor.name())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}
