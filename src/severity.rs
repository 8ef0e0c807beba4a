//! Severity Estimation
//!
//! Color-threshold segmentation of a leaf photo into healthy and diseased
//! pixel populations. Works on its own decode of the image bytes and needs
//! no trained model.
//!
//! Pixels are converted to 8-bit HSV (hue in `[0, 180)`, saturation and
//! value in `[0, 255]`) and tested against two inclusive ranges. The masks
//! are counted independently, so a pixel inside both ranges is counted in
//! both populations.
//!
//! This is a heuristic. The default ranges overlap on hue 25..=30 and do not
//! cover every disease coloration; retune them in the configuration for the
//! crops and lighting of a deployment.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::preprocess::decode_rgb;
use crate::utils::error::{DiagnosisError, Result};

/// Largest representable hue in the 8-bit HSV convention
pub const MAX_HUE: u8 = 179;

/// Lower bound of the healthy (green) range
pub const HEALTHY_LOWER: [u8; 3] = [25, 50, 50];
/// Upper bound of the healthy (green) range
pub const HEALTHY_UPPER: [u8; 3] = [85, 255, 255];
/// Lower bound of the diseased (brown/yellow) range
pub const DISEASED_LOWER: [u8; 3] = [10, 80, 80];
/// Upper bound of the diseased (brown/yellow) range
pub const DISEASED_UPPER: [u8; 3] = [30, 255, 255];

/// Convert an RGB pixel to 8-bit HSV: `[h / 2, s * 255, v * 255]`
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf.max(bf));
    let min = rf.min(gf.min(bf));
    let chroma = max - min;

    let saturation = if max > 0.0 { 255.0 * chroma / max } else { 0.0 };

    let hue_degrees = if chroma <= 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / chroma
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / chroma
    } else {
        240.0 + 60.0 * (rf - gf) / chroma
    };
    let hue_degrees = if hue_degrees < 0.0 {
        hue_degrees + 360.0
    } else {
        hue_degrees
    };

    let mut hue = (hue_degrees / 2.0).round() as u16;
    if hue > MAX_HUE as u16 {
        hue = 0;
    }

    [hue as u8, saturation.round() as u8, max as u8]
}

/// Inclusive HSV box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    /// Whether an HSV triple falls inside the box, bounds included
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }

    fn validate(&self, name: &str) -> Result<()> {
        if (0..3).any(|c| self.lower[c] > self.upper[c]) {
            return Err(DiagnosisError::Configuration(format!(
                "{} range has a lower bound above its upper bound: {:?} > {:?}",
                name, self.lower, self.upper
            )));
        }
        if self.lower[0] > MAX_HUE {
            return Err(DiagnosisError::Configuration(format!(
                "{} range hue starts at {}, hue never exceeds {}",
                name, self.lower[0], MAX_HUE
            )));
        }
        Ok(())
    }
}

/// The two pixel-classification ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub healthy: HsvRange,
    pub diseased: HsvRange,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            healthy: HsvRange::new(HEALTHY_LOWER, HEALTHY_UPPER),
            diseased: HsvRange::new(DISEASED_LOWER, DISEASED_UPPER),
        }
    }
}

impl SeverityThresholds {
    pub fn validate(&self) -> Result<()> {
        self.healthy.validate("healthy")?;
        self.diseased.validate("diseased")
    }
}

/// Outcome of one severity estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityReport {
    /// Diseased share of the leaf-colored pixels, in `[0, 100]`
    pub severity_percentage: f32,
    pub healthy_pixels: u64,
    pub diseased_pixels: u64,
}

impl SeverityReport {
    fn from_counts(healthy_pixels: u64, diseased_pixels: u64) -> Self {
        let total = healthy_pixels + diseased_pixels;
        let severity_percentage = if total == 0 {
            0.0
        } else {
            (diseased_pixels as f64 / total as f64 * 100.0) as f32
        };
        Self {
            severity_percentage,
            healthy_pixels,
            diseased_pixels,
        }
    }

    /// True when no pixel fell in either range
    pub fn no_leaf_detected(&self) -> bool {
        self.healthy_pixels == 0 && self.diseased_pixels == 0
    }
}

/// Pixel-counting severity estimator
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityEstimator {
    thresholds: SeverityThresholds,
}

impl SeverityEstimator {
    pub fn new(thresholds: SeverityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Decode raw bytes and estimate severity
    pub fn estimate_bytes(&self, bytes: &[u8]) -> Result<SeverityReport> {
        let image = decode_rgb(bytes)?;
        Ok(self.estimate_image(&image))
    }

    /// Estimate severity of an already decoded image
    pub fn estimate_image(&self, image: &RgbImage) -> SeverityReport {
        let mut healthy = 0u64;
        let mut diseased = 0u64;

        for pixel in image.pixels() {
            let hsv = rgb_to_hsv(pixel[0], pixel[1], pixel[2]);
            if self.thresholds.healthy.contains(hsv) {
                healthy += 1;
            }
            if self.thresholds.diseased.contains(hsv) {
                diseased += 1;
            }
        }

        let report = SeverityReport::from_counts(healthy, diseased);
        debug!(
            healthy_pixels = healthy,
            diseased_pixels = diseased,
            severity = report.severity_percentage,
            "severity estimated"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    const GREEN: Rgb<u8> = Rgb([30, 180, 40]);
    const BROWN: Rgb<u8> = Rgb([200, 150, 0]);

    fn split_image(width: u32, height: u32, diseased_columns: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            if x < diseased_columns {
                BROWN
            } else {
                GREEN
            }
        })
    }

    #[test]
    fn test_rgb_to_hsv_reference_points() {
        assert_eq!(rgb_to_hsv(0, 0, 0), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(255, 255, 255), [0, 0, 255]);
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(255, 255, 0), [30, 255, 255]);
    }

    #[test]
    fn test_reference_colors_fall_in_expected_ranges() {
        let t = SeverityThresholds::default();
        let green = rgb_to_hsv(GREEN[0], GREEN[1], GREEN[2]);
        let brown = rgb_to_hsv(BROWN[0], BROWN[1], BROWN[2]);

        assert!(t.healthy.contains(green));
        assert!(!t.diseased.contains(green));
        assert!(t.diseased.contains(brown));
        assert!(!t.healthy.contains(brown));
    }

    #[test]
    fn test_no_leaf_pixels_gives_zero() {
        let gray = RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]));
        let report = SeverityEstimator::default().estimate_image(&gray);
        assert_eq!(report.severity_percentage, 0.0);
        assert!(report.no_leaf_detected());
    }

    #[test]
    fn test_fully_healthy_and_fully_diseased() {
        let est = SeverityEstimator::default();
        let healthy = est.estimate_image(&RgbImage::from_pixel(10, 10, GREEN));
        let diseased = est.estimate_image(&RgbImage::from_pixel(10, 10, BROWN));

        assert_eq!(healthy.severity_percentage, 0.0);
        assert_eq!(healthy.healthy_pixels, 100);
        assert_eq!(diseased.severity_percentage, 100.0);
    }

    #[test]
    fn test_mixed_leaf() {
        let report = SeverityEstimator::default().estimate_image(&split_image(40, 10, 10));
        assert_eq!(report.diseased_pixels, 100);
        assert_eq!(report.healthy_pixels, 300);
        assert!((report.severity_percentage - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_background_pixels_are_ignored() {
        let mut img = split_image(20, 10, 10);
        for x in 0..20 {
            img.put_pixel(x, 0, Rgb([255, 255, 255]));
        }
        let report = SeverityEstimator::default().estimate_image(&img);
        assert!((report.severity_percentage - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_overlapping_hue_counts_in_both_masks() {
        // hue 30 lies in both default ranges
        let yellow = RgbImage::from_pixel(4, 4, Rgb([220, 220, 0]));
        let report = SeverityEstimator::default().estimate_image(&yellow);
        assert_eq!(report.healthy_pixels, 16);
        assert_eq!(report.diseased_pixels, 16);
        assert!((report.severity_percentage - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_severity_stays_in_bounds() {
        let est = SeverityEstimator::default();
        for columns in 0..=16 {
            let report = est.estimate_image(&split_image(16, 4, columns));
            assert!((0.0..=100.0).contains(&report.severity_percentage));
        }
    }

    #[test]
    fn test_estimate_bytes_rejects_garbage() {
        let err = SeverityEstimator::default()
            .estimate_bytes(&[0xde, 0xad, 0xbe, 0xef])
            .unwrap_err();
        assert!(matches!(err, DiagnosisError::InvalidImage(_)));
    }

    #[test]
    fn test_estimate_bytes_png() {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(split_image(8, 8, 4))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        let report = SeverityEstimator::default()
            .estimate_bytes(&buf.into_inner())
            .unwrap();
        assert!((report.severity_percentage - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(SeverityThresholds::default().validate().is_ok());

        let inverted = SeverityThresholds {
            healthy: HsvRange::new([85, 50, 50], [25, 255, 255]),
            ..SeverityThresholds::default()
        };
        assert!(inverted.validate().is_err());

        let out_of_hue = SeverityThresholds {
            diseased: HsvRange::new([200, 0, 0], [255, 255, 255]),
            ..SeverityThresholds::default()
        };
        assert!(out_of_hue.validate().is_err());
    }
}
