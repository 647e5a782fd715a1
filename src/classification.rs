// 🩺 Threshold Classifier - Age-banded PSA reference ranges
// Bands as data: one ordered table instead of scattered branches
//
// Six age bands, each with its own normal upper bound. Three of them
// (10-39, 60-69, 80-100) carry an intermediate Elevated tier between
// Normal and High.

use crate::records::FieldValue;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Normal upper bound applied when the patient's age is unknown or falls
/// outside every band (< 10 or > 100).
pub const DEFAULT_NORMAL_UPPER: f64 = 4.0;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsaStatus {
    Low,
    Normal,
    Elevated,
    High,
}

impl PsaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PsaStatus::Low => "Low",
            PsaStatus::Normal => "Normal",
            PsaStatus::Elevated => "Elevated",
            PsaStatus::High => "High",
        }
    }
}

impl std::fmt::Display for PsaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AGE BAND
// ============================================================================

/// One row of the reference-range table.
///
/// `high_threshold` is the only cutoff that flips the reported determination
/// to High. Where `elevated_upper` is set, values in
/// (normal_upper, elevated_upper] are reported as Elevated; the two tiers
/// overlap in messaging but High stays governed by `high_threshold` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgeBand {
    pub min_age: u32,
    pub max_age: u32,
    pub normal_upper: f64,
    #[serde(default)]
    pub elevated_upper: Option<f64>,
    pub high_threshold: f64,
}

impl AgeBand {
    pub fn contains(&self, age: u32) -> bool {
        age >= self.min_age && age <= self.max_age
    }

    fn label(&self) -> String {
        format!("ages {}-{}", self.min_age, self.max_age)
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

/// Immutable classification output.
///
/// `threshold` is the boundary that determined the status: the band's high
/// threshold for High, its normal upper bound otherwise, and None when the
/// value could not be read as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub status: PsaStatus,
    pub threshold: Option<f64>,
    pub rationale: String,
}

// ============================================================================
// THRESHOLD CLASSIFIER
// ============================================================================

pub struct ThresholdClassifier {
    /// Ordered band table, scanned first-match
    bands: Vec<AgeBand>,

    /// Fallback normal upper bound for the age-unknown path
    pub default_threshold: f64,
}

impl ThresholdClassifier {
    /// Create classifier with the standard six-band PSA table
    pub fn new() -> Self {
        ThresholdClassifier::from_bands(standard_bands())
    }

    /// Create classifier from a custom band table (scan order preserved)
    pub fn from_bands(bands: Vec<AgeBand>) -> Self {
        ThresholdClassifier {
            bands,
            default_threshold: DEFAULT_NORMAL_UPPER,
        }
    }

    /// Load a band table from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read band table: {:?}", path.as_ref()))?;

        let bands: Vec<AgeBand> =
            serde_json::from_str(&content).context("Failed to parse band table JSON")?;

        Ok(ThresholdClassifier::from_bands(bands))
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Classify a lab value against the patient's age band.
    ///
    /// Never fails: a value that cannot be read as a finite number classifies
    /// as Normal with no threshold, and an age outside every band (unknown,
    /// under 10, over 100) uses the default fallback range.
    pub fn classify(&self, value: Option<&FieldValue>, age: Option<u32>) -> Classification {
        let v = match value.and_then(FieldValue::as_f64) {
            Some(v) => v,
            None => {
                return Classification {
                    status: PsaStatus::Normal,
                    threshold: None,
                    rationale: "invalid value".to_string(),
                }
            }
        };

        match age.and_then(|a| self.band_for(a)) {
            Some(band) => self.classify_banded(v, band),
            None => self.classify_unbanded(v),
        }
    }

    /// Normal upper bound for the band containing `age`, without
    /// classification. Feeds the displayed reference range.
    pub fn threshold(&self, age: Option<u32>) -> f64 {
        age.and_then(|a| self.band_for(a))
            .map(|band| band.normal_upper)
            .unwrap_or(self.default_threshold)
    }

    fn band_for(&self, age: u32) -> Option<&AgeBand> {
        self.bands.iter().find(|band| band.contains(age))
    }

    /// Decision order: High first, then Elevated (bands that have the tier),
    /// then Low, else Normal. Cutoffs are inclusive on the lower tier:
    /// v == high_threshold is not High.
    fn classify_banded(&self, v: f64, band: &AgeBand) -> Classification {
        if v > band.high_threshold {
            return Classification {
                status: PsaStatus::High,
                threshold: Some(band.high_threshold),
                rationale: format!(
                    "PSA {:.1} ng/mL exceeds the {:.1} ng/mL limit for {}; clinically high",
                    v,
                    band.high_threshold,
                    band.label()
                ),
            };
        }

        if let Some(elevated_upper) = band.elevated_upper {
            if v > band.normal_upper {
                return Classification {
                    status: PsaStatus::Elevated,
                    threshold: Some(band.normal_upper),
                    rationale: format!(
                        "PSA {:.1} ng/mL is above the {:.1} ng/mL normal bound but within \
                         the {:.1} ng/mL borderline band for {}; clinically elevated",
                        v,
                        band.normal_upper,
                        elevated_upper,
                        band.label()
                    ),
                };
            }
        }

        if v < 0.0 {
            return Classification {
                status: PsaStatus::Low,
                threshold: Some(band.normal_upper),
                rationale: format!(
                    "PSA {:.1} ng/mL is below the measurable range for {}",
                    v,
                    band.label()
                ),
            };
        }

        Classification {
            status: PsaStatus::Normal,
            threshold: Some(band.normal_upper),
            rationale: format!(
                "PSA {:.1} ng/mL is within the reference range for {}",
                v,
                band.label()
            ),
        }
    }

    fn classify_unbanded(&self, v: f64) -> Classification {
        let status = if v > self.default_threshold {
            PsaStatus::High
        } else if v < 0.0 {
            PsaStatus::Low
        } else {
            PsaStatus::Normal
        };

        let meaning = match status {
            PsaStatus::High => "clinically high",
            PsaStatus::Low => "below the measurable range",
            _ => "within the reference range",
        };

        Classification {
            status,
            threshold: Some(self.default_threshold),
            rationale: format!(
                "PSA {:.1} ng/mL is {} against the default {:.1} ng/mL limit (age unknown \
                 or outside banded ranges)",
                v, meaning, self.default_threshold
            ),
        }
    }
}

impl Default for ThresholdClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The standard six-band PSA reference table
fn standard_bands() -> Vec<AgeBand> {
    vec![
        AgeBand {
            min_age: 10,
            max_age: 39,
            normal_upper: 1.5,
            elevated_upper: Some(2.0),
            high_threshold: 2.0,
        },
        AgeBand {
            min_age: 40,
            max_age: 49,
            normal_upper: 2.0,
            elevated_upper: None,
            high_threshold: 2.0,
        },
        AgeBand {
            min_age: 50,
            max_age: 59,
            normal_upper: 3.0,
            elevated_upper: None,
            high_threshold: 3.0,
        },
        AgeBand {
            min_age: 60,
            max_age: 69,
            normal_upper: 3.0,
            elevated_upper: Some(4.0),
            high_threshold: 4.0,
        },
        AgeBand {
            min_age: 70,
            max_age: 79,
            normal_upper: 5.5,
            elevated_upper: None,
            high_threshold: 5.5,
        },
        AgeBand {
            min_age: 80,
            max_age: 100,
            normal_upper: 6.5,
            elevated_upper: Some(10.0),
            high_threshold: 10.0,
        },
    ]
}

// ============================================================================
// TESTS
// ============================================================================
