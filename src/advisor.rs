//! Treatment advisor gateway
//!
//! Asks a hosted language model for a farmer-facing treatment plan. The
//! gateway is the only network component of the service and it never fails a
//! diagnosis: missing configuration yields a placeholder plan and any request
//! error yields a marked fallback text.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::utils::error::{DiagnosisError, Result};

/// Default response language
pub const DEFAULT_LANGUAGE: &str = "English";

/// Default hosted model
pub const DEFAULT_ADVISOR_MODEL: &str = "gemini-2.5-flash";

/// Default API endpoint root
pub const DEFAULT_ADVISOR_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default request timeout
pub const DEFAULT_ADVISOR_TIMEOUT_SECS: u64 = 30;

/// Header carrying the API key; the key never appears in a URL
pub const API_KEY_HEADER: &str = "x-goog-api-key";

const ADVISOR_REGION: &str = "Andhra Pradesh, India";
const ADVISOR_MARKET: &str = "India";
const ADVISOR_CURRENCY: &str = "Indian Rupees (INR, ₹)";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_model() -> String {
    DEFAULT_ADVISOR_MODEL.to_string()
}

fn default_base_url() -> String {
    DEFAULT_ADVISOR_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_ADVISOR_TIMEOUT_SECS
}

/// Advisor connection settings.
///
/// The API key is never written back when a config is saved.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl fmt::Debug for AdvisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AdvisorConfig {
    /// True when a non-blank API key is present
    pub fn is_configured(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(DiagnosisError::Configuration(
                "advisor.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(DiagnosisError::Configuration(
                "advisor.model must not be blank".to_string(),
            ));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(DiagnosisError::Configuration(format!(
                "advisor.base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Input for one treatment plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRequest {
    pub disease_name: String,
    /// Severity percentage in `[0, 100]`
    pub severity: f32,
    #[serde(default = "default_language")]
    pub language: String,
}

impl TreatmentRequest {
    pub fn new(disease_name: impl Into<String>, severity: f32) -> Self {
        Self {
            disease_name: disease_name.into(),
            severity,
            language: default_language(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

/// Where a plan's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    /// Written by the language model
    Generated,
    /// Placeholder or error text produced locally
    Fallback,
}

/// Treatment plan text plus its provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub text: String,
    pub source: PlanSource,
}

impl TreatmentPlan {
    pub fn generated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: PlanSource::Generated,
        }
    }

    pub fn fallback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: PlanSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == PlanSource::Fallback
    }
}

/// Prompt sent to the language model for one request
pub fn build_prompt(request: &TreatmentRequest) -> String {
    format!(
        "You are an expert agricultural advisor for farmers in {region}. \
         Provide a detailed and practical medication and treatment plan for the plant disease '{disease}' \
         with a severity of {severity:.1}%, written in the {language} language. \
         The plan must be tailored to local standards and be easy for a farmer to understand.\n\n\
         Follow these rules:\n\
         1. Format the entire response using simple Markdown. Use `##` for main headings and `*` for bullet points.\n\
         2. Do not create tables. List product details using bullet points under a heading.\n\
         3. All suggested chemical pesticides or commercial products must be brands commonly available in {market}.\n\
         4. Provide an estimated cost for these products in {currency}.\n\
         5. Include sections for organic or home remedies and for preventive measures suitable for local conditions.\n\
         6. The response must not contain any comments.\n\
         7. Finish with a simple '7-Day Action Plan' checklist sized to the severity, for example: \
         Day 1: Apply [Pesticide A]. Day 3: Monitor leaves. Day 5: Apply [Organic Remedy B].",
        region = ADVISOR_REGION,
        disease = request.disease_name,
        severity = request.severity,
        language = request.language,
        market = ADVISOR_MARKET,
        currency = ADVISOR_CURRENCY,
    )
}

/// Source of treatment plans
#[async_trait]
pub trait TreatmentAdvisor: Send + Sync {
    /// Produce a plan, or an error the caller turns into fallback text
    async fn plan(&self, request: &TreatmentRequest) -> Result<TreatmentPlan>;

    /// Name for logs
    fn name(&self) -> &str;
}

/// Advisor used when no API key is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderAdvisor;

#[async_trait]
impl TreatmentAdvisor for PlaceholderAdvisor {
    async fn plan(&self, request: &TreatmentRequest) -> Result<TreatmentPlan> {
        Ok(TreatmentPlan::fallback(format!(
            "Treatment advisor not configured. Placeholder plan for {} in {}.",
            request.disease_name, request.language
        )))
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate
    fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Gemini `generateContent` client
#[derive(Clone)]
pub struct GeminiAdvisor {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAdvisor {
    pub fn new(config: &AdvisorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DiagnosisError::Configuration("advisor API key is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

impl fmt::Debug for GeminiAdvisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiAdvisor")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl TreatmentAdvisor for GeminiAdvisor {
    async fn plan(&self, request: &TreatmentRequest) -> Result<TreatmentPlan> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(request) }] }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DiagnosisError::Advisor(format!("HTTP {status}: {body}")));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let text = parsed
            .first_text()
            .ok_or_else(|| DiagnosisError::Advisor("response contained no text".to_string()))?;

        debug!(model = %self.model, chars = text.len(), "treatment plan generated");
        Ok(TreatmentPlan::generated(text))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Gemini when a key is configured, otherwise the placeholder advisor
pub fn advisor_from_config(config: &AdvisorConfig) -> Result<Arc<dyn TreatmentAdvisor>> {
    if config.is_configured() {
        info!("Treatment advisor: {} at {}", config.model, config.base_url);
        Ok(Arc::new(GeminiAdvisor::new(config)?))
    } else {
        warn!("No advisor API key configured; treatment plans will be placeholders");
        Ok(Arc::new(PlaceholderAdvisor))
    }
}

/// Ask `advisor` for a plan; failures become a marked fallback plan
pub async fn advise(advisor: &dyn TreatmentAdvisor, request: &TreatmentRequest) -> TreatmentPlan {
    match advisor.plan(request).await {
        Ok(plan) => plan,
        Err(e) => {
            warn!(advisor = advisor.name(), error = %e, "treatment plan request failed");
            TreatmentPlan::fallback(format!(
                "Treatment plan unavailable for {} in {}: {}",
                request.disease_name, request.language, e
            ))
        }
    }
}
