//! End-to-end diagnosis against a freshly saved burn model

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use burn::module::Module;
use burn::record::CompactRecorder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use agrodoctor::backend::{default_device, DefaultBackend};
use agrodoctor::{
    AppConfig, DiagnosisError, DiagnosisService, DiagnosticEngine, LabelMap, LeafClassifier,
    PlaceholderAdvisor, PlanSource, UNKNOWN_DISEASE,
};

const LABELS: &str = r#"{
    "0": "Apple___Apple_scab",
    "1": "Apple___healthy",
    "2": "Potato___Late_blight",
    "3": "Tomato___Late_blight"
}"#;

fn leaf_png(diseased_columns: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(40, 40, |x, _| {
        if x < diseased_columns {
            Rgb([200, 150, 0])
        } else {
            Rgb([30, 180, 40])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Save an untrained classifier sized for `labels` and return a config pointing at it
fn write_artifacts(dir: &Path, num_classes: usize) -> AppConfig {
    let label_path = dir.join("class_indices.json");
    std::fs::write(&label_path, LABELS).unwrap();

    let mut config = AppConfig::new(dir.join("leaf_model"), label_path);
    config.model.input_size = 32;
    config.model.base_filters = 4;
    config.workers.max_blocking_tasks = 2;

    let model_config = config.model.to_classifier_config(num_classes);
    LeafClassifier::<DefaultBackend>::new(&model_config, &default_device())
        .save_file(config.model_path.clone(), &CompactRecorder::new())
        .unwrap();

    config
}

#[tokio::test]
async fn diagnose_with_saved_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), 4);

    let engine = DiagnosticEngine::initialize(&config).unwrap();
    assert_eq!(engine.label_map().len(), 4);
    assert_eq!(engine.label_map_lookup(2), "Potato___Late_blight");
    assert_eq!(engine.label_map_lookup(4), UNKNOWN_DISEASE);

    let classification = engine.classify_and_score(&leaf_png(10)).unwrap();
    assert!(classification.class_index < 4);
    assert!((0.0..=1.0).contains(&classification.confidence));

    let service = DiagnosisService::new(Arc::clone(&engine), Arc::new(PlaceholderAdvisor), 2);
    let report = service.diagnose(leaf_png(10), "English").await.unwrap();

    assert!((report.analysis.severity_percentage - 25.0).abs() < 1e-3);
    assert_eq!(report.analysis.disease_name, classification.label);
    assert!(report.economic_impact.loss_min <= report.economic_impact.loss_max);
    assert_eq!(report.treatment.unwrap().source, PlanSource::Fallback);

    let json = serde_json::to_value(&report.economic_impact).unwrap();
    assert!(json.get("potential_financial_loss_min").is_some());
    assert!(json.get("potential_financial_loss_max").is_some());
}

#[test]
fn model_width_must_match_label_map() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), 3);
    let labels = Arc::new(LabelMap::from_json_str(LABELS).unwrap());

    let err = DiagnosticEngine::initialize_with_labels(&config, labels).unwrap_err();
    assert!(matches!(err, DiagnosisError::Model(_)));
}

#[test]
fn missing_model_is_startup_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::new(dir.path().join("absent.mpk"), dir.path().join("labels.json"));
    let labels = Arc::new(LabelMap::from_json_str(LABELS).unwrap());

    let err = DiagnosticEngine::initialize_with_labels(&config, labels).unwrap_err();
    assert!(matches!(err, DiagnosisError::PathNotFound(_)));
}

#[tokio::test]
async fn concurrent_requests_share_one_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_artifacts(dir.path(), 4);
    let labels = Arc::new(LabelMap::from_json_str(LABELS).unwrap());
    let engine = DiagnosticEngine::initialize_with_labels(&config, labels).unwrap();
    let service = DiagnosisService::new(engine, Arc::new(PlaceholderAdvisor), 2);

    let mut handles = Vec::new();
    for columns in [0u32, 10, 20, 40] {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            (columns, service.analyze(leaf_png(columns)).await.unwrap())
        }));
    }

    for handle in handles {
        let (columns, analysis) = handle.await.unwrap();
        let expected = columns as f32 / 40.0 * 100.0;
        assert!((analysis.severity_percentage - expected).abs() < 1e-3);
    }
}
