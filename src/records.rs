// 🗂️ Record Model - Shared data types for the PSA result engine
// Baseline snapshot, follow-up rows, and the merged timeline entry

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Test type handled by baseline reconciliation
pub const PSA_TEST_TYPE: &str = "psa";

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A submitted field as it arrives from the client layer.
///
/// Lab values reach us as numbers, numeric strings, or checkbox booleans
/// depending on the form that produced them. Presence is an explicit
/// enumeration of sentinel values, NOT a truthiness check - the number 0
/// is a real measurement and must count as present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    /// Present unless empty string or boolean false.
    /// `Number(0.0)` is present.
    pub fn is_present(&self) -> bool {
        match self {
            FieldValue::Number(_) => true,
            FieldValue::Flag(flag) => *flag,
            FieldValue::Text(text) => !text.is_empty(),
        }
    }

    /// Coerce to a finite number. Numeric strings are parsed after trimming;
    /// booleans and non-numeric text yield None.
    pub fn as_f64(&self) -> Option<f64> {
        let number = match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(text) => text.trim().parse::<f64>().ok(),
            FieldValue::Flag(_) => None,
        };
        number.filter(|n| n.is_finite())
    }
}

// ============================================================================
// BASELINE RECORD
// ============================================================================

/// The single PSA measurement captured at patient intake.
///
/// Set once at patient creation/import and immutable from this engine's
/// perspective. Either field can be absent on partially filled intakes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub value: Option<FieldValue>,
    pub date: Option<NaiveDate>,
}

impl BaselineRecord {
    pub fn new(value: Option<FieldValue>, date: Option<NaiveDate>) -> Self {
        BaselineRecord { value, date }
    }

    /// A baseline can only be materialized into the timeline when both
    /// fields are present and the value is numeric.
    pub fn is_complete(&self) -> bool {
        self.date.is_some() && self.value.as_ref().and_then(FieldValue::as_f64).is_some()
    }
}

// ============================================================================
// FOLLOW-UP RECORD
// ============================================================================

/// One lab-result row from the append-only result history.
///
/// Core fields are what the engine derives and compares on; everything the
/// clinic attaches beyond that (author, notes, attachment, ad-hoc metadata)
/// passes through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRecord {
    /// Stable identity (UUID) - survives amendments
    #[serde(default = "default_uuid")]
    pub id: String,

    pub test_type: String,

    pub value: FieldValue,

    pub test_date: Option<NaiveDate>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub reference_range: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub attachment_path: Option<String>,

    /// Opaque extras - never inspected, never rewritten
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl FollowUpRecord {
    pub fn new(test_type: &str, value: FieldValue, test_date: Option<NaiveDate>) -> Self {
        FollowUpRecord {
            id: default_uuid(),
            test_type: test_type.to_string(),
            value,
            test_date,
            status: None,
            reference_range: None,
            notes: None,
            author: None,
            attachment_path: None,
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// RECONCILED ENTRY
// ============================================================================

/// One row of the merged display timeline.
///
/// `is_baseline` is display metadata only: a synthetic baseline entry is not
/// a distinct storage type, just a follow-up-shaped row materialized from the
/// intake snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEntry {
    pub record: FollowUpRecord,
    pub is_baseline: bool,
}

impl ReconciledEntry {
    pub fn from_record(record: FollowUpRecord) -> Self {
        ReconciledEntry {
            record,
            is_baseline: false,
        }
    }
}

// ============================================================================
// PATIENT SNAPSHOT
// ============================================================================

/// What the record store hands us about a patient before any result logic
/// runs: their birth date and intake baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub birth_date: Option<NaiveDate>,
    pub baseline: BaselineRecord,
}

// ============================================================================
// TESTS
// ============================================================================
