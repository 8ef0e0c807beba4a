//! Economic Impact Estimation
//!
//! Maps a disease label to a crop profile and scales a linear loss model by
//! the visual severity:
//!
//! ```text
//! total_value      = yield_per_area * price_per_unit
//! severity_decimal = severity / 100
//! potential_loss   = total_value * max_loss_factor * severity_decimal
//! loss_min         = floor(potential_loss * 0.75)
//! loss_max         = floor(potential_loss)
//! yield_loss_pct   = floor(max_loss_factor * severity_decimal * 100)
//! ```
//!
//! Profile resolution scans an ordered list of `(pattern, profile)` entries;
//! a pattern matches when it is a case-insensitive substring of the disease
//! name. Under [`MatchPolicy::FirstMatch`] the earliest entry in the list
//! wins; under [`MatchPolicy::LongestMatch`] the longest matching pattern
//! wins, earliest entry breaking ties. No match resolves to the default
//! profile, so estimation never fails.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{DiagnosisError, Result};

/// Share of the potential loss reported as the lower end of the range
pub const LOSS_MIN_RATIO: f64 = 0.75;

/// Static economic parameters of one crop/disease category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropProfile {
    pub crop_name: String,
    /// Average yield per acre (kg)
    pub yield_per_area: f64,
    /// Average market price per kg
    pub price_per_unit: f64,
    /// Largest share of the yield the disease can destroy, in `[0, 1]`
    pub max_loss_factor: f64,
}

impl CropProfile {
    pub fn new(
        crop_name: impl Into<String>,
        yield_per_area: f64,
        price_per_unit: f64,
        max_loss_factor: f64,
    ) -> Self {
        Self {
            crop_name: crop_name.into(),
            yield_per_area,
            price_per_unit,
            max_loss_factor,
        }
    }

    /// Market value of a full, undamaged harvest
    pub fn total_value(&self) -> f64 {
        self.yield_per_area * self.price_per_unit
    }

    fn validate(&self, key: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_loss_factor) {
            return Err(DiagnosisError::Configuration(format!(
                "crop profile '{}' has max_loss_factor {} outside [0, 1]",
                key, self.max_loss_factor
            )));
        }
        if !(self.yield_per_area >= 0.0 && self.yield_per_area.is_finite())
            || !(self.price_per_unit >= 0.0 && self.price_per_unit.is_finite())
        {
            return Err(DiagnosisError::Configuration(format!(
                "crop profile '{}' needs finite, non-negative yield and price",
                key
            )));
        }
        Ok(())
    }
}

/// One pattern -> profile entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropProfileEntry {
    pub pattern: String,
    pub profile: CropProfile,
}

/// Rule for choosing among several matching patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Earliest matching entry in table order
    #[default]
    FirstMatch,
    /// Longest matching pattern; table order breaks ties
    LongestMatch,
}

/// Ordered profile table with a mandatory default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropProfileTable {
    #[serde(default)]
    pub policy: MatchPolicy,
    pub entries: Vec<CropProfileEntry>,
    pub default: CropProfile,
}

impl Default for CropProfileTable {
    fn default() -> Self {
        let entry = |pattern: &str, profile: CropProfile| CropProfileEntry {
            pattern: pattern.to_string(),
            profile,
        };

        Self {
            policy: MatchPolicy::FirstMatch,
            entries: vec![
                entry(
                    "Apple___Apple_scab",
                    CropProfile::new("Apple", 8000.0, 135.0, 0.70),
                ),
                entry(
                    "Tomato___Late_blight",
                    CropProfile::new("Tomato", 20000.0, 18.0, 0.80),
                ),
                entry(
                    "Potato___Late_blight",
                    CropProfile::new("Potato", 12000.0, 15.0, 0.75),
                ),
            ],
            default: CropProfile::new("General Crop", 15000.0, 20.0, 0.30),
        }
    }
}

impl CropProfileTable {
    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject out-of-range factors, bad prices and blank patterns
    pub fn validate(&self) -> Result<()> {
        self.default.validate("default")?;
        for entry in &self.entries {
            if entry.pattern.trim().is_empty() {
                return Err(DiagnosisError::Configuration(
                    "crop profile pattern must not be blank".to_string(),
                ));
            }
            entry.profile.validate(&entry.pattern)?;
        }
        Ok(())
    }

    /// Matching entry for a disease name, `None` when the default applies
    pub fn find(&self, disease_name: &str) -> Option<&CropProfileEntry> {
        let needle = disease_name.to_lowercase();
        let mut matches = self
            .entries
            .iter()
            .filter(|e| needle.contains(&e.pattern.to_lowercase()));

        match self.policy {
            MatchPolicy::FirstMatch => matches.next(),
            MatchPolicy::LongestMatch => matches.fold(None, |best: Option<&CropProfileEntry>, e| {
                match best {
                    Some(b) if b.pattern.len() >= e.pattern.len() => Some(b),
                    _ => Some(e),
                }
            }),
        }
    }

    /// Profile for a disease name, falling back to the default profile
    pub fn resolve(&self, disease_name: &str) -> &CropProfile {
        self.find(disease_name)
            .map(|e| &e.profile)
            .unwrap_or(&self.default)
    }
}

/// Estimated loss for one diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomicImpactEstimate {
    pub crop_name: String,
    #[serde(rename = "potential_financial_loss_min")]
    pub loss_min: u64,
    #[serde(rename = "potential_financial_loss_max")]
    pub loss_max: u64,
    pub yield_loss_percentage: u64,
}

/// Clamp a severity into `[0, 100]`; NaN counts as no damage
pub fn clamp_severity(severity: f64) -> f64 {
    if severity.is_nan() {
        0.0
    } else {
        severity.clamp(0.0, 100.0)
    }
}

/// Apply the linear loss model to a resolved profile
pub fn impact_for_profile(profile: &CropProfile, severity: f64) -> EconomicImpactEstimate {
    let severity_decimal = clamp_severity(severity) / 100.0;
    let potential_loss = profile.total_value() * profile.max_loss_factor * severity_decimal;

    EconomicImpactEstimate {
        crop_name: profile.crop_name.clone(),
        loss_min: (potential_loss * LOSS_MIN_RATIO).floor() as u64,
        loss_max: potential_loss.floor() as u64,
        yield_loss_percentage: (profile.max_loss_factor * severity_decimal * 100.0).floor() as u64,
    }
}

/// Resolve the profile for `disease_name` and estimate the loss
pub fn estimate_economic_impact(
    table: &CropProfileTable,
    disease_name: &str,
    severity: f64,
) -> EconomicImpactEstimate {
    let matched = table.find(disease_name);
    let profile = matched.map(|e| &e.profile).unwrap_or(&table.default);
    debug!(
        disease = disease_name,
        pattern = matched.map(|e| e.pattern.as_str()).unwrap_or("default"),
        severity,
        "crop profile resolved"
    );
    impact_for_profile(profile, severity)
}
