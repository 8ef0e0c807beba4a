//! AgroDoctor CLI
//!
//! Command-line entry point for leaf disease diagnosis: classification,
//! severity, economic impact and treatment plans.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, info};

use agrodoctor::advisor::{advisor_from_config, TreatmentRequest};
use agrodoctor::backend::backend_name;
use agrodoctor::economics::EconomicImpactEstimate;
use agrodoctor::labels::process_label_map;
use agrodoctor::severity::SeverityEstimator;
use agrodoctor::utils::logging::{init_logging, LogConfig};
use agrodoctor::utils::{format_fraction_percent, format_number, format_percent};
use agrodoctor::{AppConfig, DiagnosisReport, DiagnosisService, DiagnosticEngine, TreatmentPlan};

/// AgroDoctor plant disease diagnosis
///
/// Classifies leaf photos, estimates how much of the leaf is affected, prices
/// the potential loss and asks an advisor for a treatment plan.
#[derive(Parser, Debug)]
#[command(name = "agrodoctor")]
#[command(version)]
#[command(about = "Plant leaf disease diagnosis with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Print machine-readable JSON instead of formatted text
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    plain: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AGRODOCTOR_LOG")]
    log_level: Option<String>,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "AGRODOCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Trained model record (overrides the config file)
    #[arg(long, global = true, env = "AGRODOCTOR_MODEL")]
    model: Option<PathBuf>,

    /// Label map JSON (overrides the config file)
    #[arg(long, global = true, env = "AGRODOCTOR_LABELS")]
    labels: Option<PathBuf>,

    /// Treatment advisor API key
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the disease shown in a leaf photo
    Classify {
        /// Path to the image
        image: PathBuf,
    },

    /// Disease, confidence and severity in one pass
    Analyze {
        /// Path to the image
        image: PathBuf,
    },

    /// Estimate the diseased share of a leaf photo
    Severity {
        /// Path to the image
        image: PathBuf,
    },

    /// Estimate the economic impact of a disease at a given severity
    Impact {
        /// Disease name, e.g. Apple___Apple_scab
        disease: String,

        /// Severity percentage (0-100)
        severity: f64,
    },

    /// Look up the disease name for a class index, or list all classes
    Label {
        /// Class index; omit to list the whole label map
        index: Option<usize>,
    },

    /// Generate a treatment plan
    Treatment {
        /// Disease name
        disease: String,

        /// Severity percentage (0-100)
        severity: f32,

        /// Response language
        #[arg(short, long, default_value = "English")]
        language: String,
    },

    /// Full diagnosis: disease, severity, economic impact and treatment plan
    Diagnose {
        /// Path to the image
        image: PathBuf,

        /// Treatment plan language
        #[arg(short, long, default_value = "English")]
        language: String,
    },

    /// Write the effective configuration to a JSON file
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "agrodoctor.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(cli.verbose, cli.json, cli.plain, cli.log_level.as_deref());
    if cli.plain {
        colored::control::set_override(false);
    }

    let _ = init_logging(&log_config);
    debug!("Log level: {}", log_config.level);

    if !cli.json {
        print_banner();
    }

    let config = build_config(&cli)?;

    match &cli.command {
        Commands::Classify { image } => cmd_classify(&config, image, cli.json)?,
        Commands::Analyze { image } => cmd_analyze(&config, image, cli.json).await?,
        Commands::Severity { image } => cmd_severity(&config, image, cli.json)?,
        Commands::Impact { disease, severity } => {
            let impact = agrodoctor::estimate_economic_impact(&config.economics, disease, *severity);
            print_impact(&impact, cli.json)?;
        }
        Commands::Label { index } => cmd_label(&config, *index, cli.json)?,
        Commands::Treatment {
            disease,
            severity,
            language,
        } => {
            let advisor = advisor_from_config(&config.advisor)?;
            let request = TreatmentRequest::new(disease.clone(), *severity).with_language(language.clone());
            let plan = agrodoctor::advise(advisor.as_ref(), &request).await;
            print_plan(&plan, cli.json)?;
        }
        Commands::Diagnose { image, language } => {
            cmd_diagnose(&config, image, language, cli.json).await?;
        }
        Commands::InitConfig { output } => {
            config.save(output)?;
            println!("{} {}", "Configuration written to".green(), output.display());
        }
    }

    Ok(())
}

/// Config file (or defaults) with command-line overrides applied
fn build_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };

    if let Some(model) = &cli.model {
        config.model_path = model.clone();
    }
    if let Some(labels) = &cli.labels {
        config.label_map_path = labels.clone();
    }
    if let Some(key) = &cli.api_key {
        config.advisor.api_key = Some(key.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   🌿 AgroDoctor                                              ║
 ║   Plant Leaf Disease Diagnosis with Burn + Rust              ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_classify(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    info!("Classifying {}", image.display());
    let engine = DiagnosticEngine::initialize(config)?;
    let result = engine.classify_and_score(&read_image(image)?)?;

    if json {
        return print_json(&result);
    }

    println!("{}", "Classification:".cyan().bold());
    println!("  🖥️  Backend:    {}", backend_name());
    println!("  🦠 Disease:    {}", result.label.yellow().bold());
    println!("  🎯 Confidence: {}", format_fraction_percent(result.confidence));
    println!("  #  Class:      {}", result.class_index);
    Ok(())
}

fn cmd_severity(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    let report = SeverityEstimator::new(config.severity).estimate_bytes(&read_image(image)?)?;

    if json {
        return print_json(&report);
    }

    println!("{}", "Severity:".cyan().bold());
    println!("  🍂 Severity:        {}", format_percent(report.severity_percentage).yellow().bold());
    println!("  🌱 Healthy pixels:  {}", format_number(report.healthy_pixels));
    println!("  🟤 Diseased pixels: {}", format_number(report.diseased_pixels));
    if report.no_leaf_detected() {
        println!("{} No leaf-colored pixels found", "Note:".yellow());
    }
    Ok(())
}

fn cmd_label(config: &AppConfig, index: Option<usize>, json: bool) -> Result<()> {
    let labels = process_label_map(&config.label_map_path)?;

    let Some(index) = index else {
        if json {
            return print_json(&labels.to_table());
        }
        println!(
            "{} ({} classes, {} format)",
            "Label Map:".cyan().bold(),
            labels.len(),
            labels.source_format()
        );
        for (index, name) in labels.iter() {
            println!("  {:>3} -> {}", index, name);
        }
        return Ok(());
    };

    let name = labels.name_or_unknown(index);
    if json {
        return print_json(&serde_json::json!({ "index": index, "disease_name": name }));
    }
    println!("  {} -> {}", index, name.yellow());
    Ok(())
}

async fn cmd_analyze(config: &AppConfig, image: &Path, json: bool) -> Result<()> {
    info!("Analyzing {}", image.display());
    let service = DiagnosisService::from_config(config)?;
    let analysis = service.analyze(read_image(image)?).await?;

    // percentages rendered as strings, e.g. "97.31%"
    let view = analysis.to_view();
    if json {
        return print_json(&view);
    }

    println!("{}", "Analysis:".cyan().bold());
    println!("  🦠 Disease:    {}", view.disease_name.yellow().bold());
    println!("  🎯 Confidence: {}", view.confidence);
    println!("  🍂 Severity:   {}", view.severity_percentage);
    Ok(())
}

async fn cmd_diagnose(config: &AppConfig, image: &Path, language: &str, json: bool) -> Result<()> {
    info!("Diagnosing {}", image.display());
    let service = DiagnosisService::from_config(config)?;
    let report = service.diagnose(read_image(image)?, language).await?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_impact(impact: &EconomicImpactEstimate, json: bool) -> Result<()> {
    if json {
        return print_json(impact);
    }

    println!("{}", "Economic Impact:".cyan().bold());
    println!("  🌾 Crop:        {}", impact.crop_name);
    println!(
        "  💰 Loss range:  {} - {}",
        format_number(impact.loss_min),
        format_number(impact.loss_max)
    );
    println!("  📉 Yield loss:  {}%", impact.yield_loss_percentage);
    Ok(())
}

fn print_plan(plan: &TreatmentPlan, json: bool) -> Result<()> {
    if json {
        return print_json(plan);
    }

    println!("{}", "Treatment Plan:".cyan().bold());
    if plan.is_fallback() {
        println!("{} {}", "Note:".yellow(), plan.text);
    } else {
        println!("{}", plan.text);
    }
    Ok(())
}

fn print_report(report: &DiagnosisReport) {
    let analysis = &report.analysis;

    println!("{}", "Diagnosis:".cyan().bold());
    println!("  🦠 Disease:    {}", analysis.disease_name.yellow().bold());
    println!("  🎯 Confidence: {}", analysis.confidence_display());
    println!("  🍂 Severity:   {}", analysis.severity_display());
    println!();

    let _ = print_impact(&report.economic_impact, false);

    if let Some(plan) = &report.treatment {
        println!();
        let _ = print_plan(plan, false);
    }
}
