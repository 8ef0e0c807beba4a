//! Utilities module for logging, errors and display helpers

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{DiagnosisError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel, StageTimer};

/// Format a number with thousands separator
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Format a fraction in `[0, 1]` as a percentage with two decimals, e.g. `"97.31%"`
pub fn format_fraction_percent(fraction: f32) -> String {
    format!("{:.2}%", fraction * 100.0)
}

/// Format a value already expressed in percent with two decimals, e.g. `"12.50%"`
pub fn format_percent(percent: f32) -> String {
    format!("{:.2}%", percent)
}
