// 📥 Result Ingestion Rules - Validation and field derivation on write
// Applied whenever a lab result is created or amended
//
// Presence is the only thing that can fail here. Every derivation after a
// successful validate is total and falls back to a safe default.

use crate::classification::ThresholdClassifier;
use crate::records::{FieldValue, FollowUpRecord, PatientSnapshot};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// ============================================================================
// INGESTION ERROR
// ============================================================================

/// The only client-correctable failure in the core. Raised before any
/// mutation is attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionError {
    MissingRequiredField { field: String },
}

impl std::fmt::Display for IngestionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestionError::MissingRequiredField { field } => {
                write!(f, "Required field is missing: {}", field)
            }
        }
    }
}

impl std::error::Error for IngestionError {}

// ============================================================================
// ATTACHMENT PLAN
// ============================================================================

/// Outcome of attachment precedence: which path the record keeps and which
/// superseded object (if any) should be deleted from blob storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPlan {
    pub path: Option<String>,
    pub stale: Option<String>,
}

/// File-blob store the surrounding system provides. The core only ever asks
/// it to drop a superseded object by path.
pub trait BlobStore {
    fn delete(&self, path: &str) -> anyhow::Result<()>;
}

// ============================================================================
// RESULT DRAFT
// ============================================================================

/// Raw submission fields for a create or amend, before any derivation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDraft {
    /// Present on amendment, absent on create
    #[serde(default)]
    pub id: Option<String>,

    pub test_type: String,

    /// As typed, "YYYY-MM-DD"
    #[serde(default)]
    pub test_date: Option<String>,

    #[serde(default)]
    pub value: Option<FieldValue>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub reference_range: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    /// Freshly uploaded file, already staged by the upload layer
    #[serde(default)]
    pub new_attachment: Option<String>,

    /// Attachment currently on the record being amended
    #[serde(default)]
    pub existing_attachment: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A record ready to persist, plus the attachment cleanup it implies.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedResult {
    pub record: FollowUpRecord,
    pub attachment: AttachmentPlan,
}

// ============================================================================
// INGESTION RULES
// ============================================================================

pub struct IngestionRules {
    classifier: ThresholdClassifier,
}

impl IngestionRules {
    pub fn new() -> Self {
        IngestionRules {
            classifier: ThresholdClassifier::new(),
        }
    }

    pub fn with_classifier(classifier: ThresholdClassifier) -> Self {
        IngestionRules { classifier }
    }

    pub fn classifier(&self) -> &ThresholdClassifier {
        &self.classifier
    }

    /// Require test date and value before any write.
    ///
    /// Presence is an explicit sentinel check: absent, empty string, and
    /// boolean false are missing; the number 0 is a valid present value.
    pub fn validate(
        &self,
        test_date: Option<&str>,
        value: Option<&FieldValue>,
    ) -> Result<(), IngestionError> {
        let date_present = matches!(test_date, Some(date) if !date.is_empty());
        if !date_present {
            return Err(IngestionError::MissingRequiredField {
                field: "test_date".to_string(),
            });
        }

        let value_present = value.map_or(false, FieldValue::is_present);
        if !value_present {
            return Err(IngestionError::MissingRequiredField {
                field: "value".to_string(),
            });
        }

        Ok(())
    }

    /// Whole years between birth date and `as_of`, minus one if the birthday
    /// has not yet occurred that year. The anniversary itself counts as
    /// reached. Absent or future birth dates yield None.
    pub fn derive_age(&self, birth_date: Option<NaiveDate>, as_of: NaiveDate) -> Option<u32> {
        let birth = birth_date?;
        if birth > as_of {
            return None;
        }

        let mut years = as_of.year() - birth.year();
        if (as_of.month(), as_of.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }

        u32::try_from(years).ok()
    }

    /// Reference-range precedence: an explicit string wins verbatim, a known
    /// age formats the banded range, otherwise nothing (never a placeholder).
    pub fn resolve_reference_range(
        &self,
        explicit: Option<&str>,
        age: Option<u32>,
    ) -> Option<String> {
        match explicit {
            Some(range) => Some(range.to_string()),
            None => age.map(|a| format!("0.0 - {:.1}", self.classifier.threshold(Some(a)))),
        }
    }

    /// Status precedence: an explicit string wins verbatim, otherwise the
    /// classifier decides.
    pub fn resolve_status(
        &self,
        explicit: Option<&str>,
        value: Option<&FieldValue>,
        age: Option<u32>,
    ) -> String {
        match explicit {
            Some(status) => status.to_string(),
            None => self.classifier.classify(value, age).status.as_str().to_string(),
        }
    }

    /// Attachment precedence: a new upload replaces the old path and marks it
    /// stale; no upload keeps the existing attachment untouched.
    pub fn resolve_attachment(
        &self,
        new_file: Option<&str>,
        existing: Option<&str>,
    ) -> AttachmentPlan {
        match new_file {
            Some(new_path) => AttachmentPlan {
                path: Some(new_path.to_string()),
                stale: existing.map(str::to_string),
            },
            None => AttachmentPlan {
                path: existing.map(str::to_string),
                stale: None,
            },
        }
    }

    /// Best-effort cleanup of a superseded attachment. Deletion failure is
    /// logged and swallowed; the write it accompanies must not fail.
    pub fn apply_attachment(&self, store: &dyn BlobStore, plan: &AttachmentPlan) {
        if let Some(stale) = &plan.stale {
            if let Err(err) = store.delete(stale) {
                warn!(path = %stale, error = %err, "failed to delete superseded attachment");
            }
        }
    }

    /// The full on-write pipeline: validate, derive the age at test date,
    /// resolve status, reference range and attachment, and emit a record
    /// ready for the store. Everything past validate is total.
    pub fn prepare(
        &self,
        draft: ResultDraft,
        patient: &PatientSnapshot,
    ) -> Result<PreparedResult, IngestionError> {
        self.validate(draft.test_date.as_deref(), draft.value.as_ref())?;

        let value = match draft.value {
            Some(value) => value,
            None => {
                return Err(IngestionError::MissingRequiredField {
                    field: "value".to_string(),
                })
            }
        };

        // An unparseable date passed presence but yields no age
        let test_date = draft
            .test_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        let age = test_date.and_then(|d| self.derive_age(patient.birth_date, d));

        let status = self.resolve_status(draft.status.as_deref(), Some(&value), age);
        let reference_range =
            self.resolve_reference_range(draft.reference_range.as_deref(), age);
        let attachment = self.resolve_attachment(
            draft.new_attachment.as_deref(),
            draft.existing_attachment.as_deref(),
        );

        let mut record = FollowUpRecord::new(&draft.test_type, value, test_date);
        if let Some(id) = draft.id {
            record.id = id;
        }
        record.status = Some(status);
        record.reference_range = reference_range;
        record.notes = draft.notes;
        record.author = draft.author;
        record.attachment_path = attachment.path.clone();
        record.metadata = draft.metadata;

        Ok(PreparedResult { record, attachment })
    }
}

impl Default for IngestionRules {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn rules() -> IngestionRules {
        IngestionRules::new()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_presence_matrix() {
        let rules = rules();
        let today = Some("2024-06-01");

        // Zero is a valid measurement
        assert!(rules.validate(today, Some(&FieldValue::Number(0.0))).is_ok());
        assert!(rules.validate(today, Some(&FieldValue::Number(4.5))).is_ok());
        assert!(rules
            .validate(today, Some(&FieldValue::Text("4.5".to_string())))
            .is_ok());

        // Sentinels are missing
        assert!(rules.validate(today, Some(&FieldValue::Flag(false))).is_err());
        assert!(rules
            .validate(today, Some(&FieldValue::Text("".to_string())))
            .is_err());
        assert!(rules.validate(today, None).is_err());

        // Date sentinels
        assert!(rules.validate(None, Some(&FieldValue::Number(1.0))).is_err());
        assert!(rules.validate(Some(""), Some(&FieldValue::Number(1.0))).is_err());

        println!("✅ Presence matrix test passed");
    }

    #[test]
    fn test_validate_names_the_missing_field() {
        let rules = rules();

        let err = rules.validate(None, Some(&FieldValue::Number(1.0))).unwrap_err();
        assert_eq!(
            err,
            IngestionError::MissingRequiredField {
                field: "test_date".to_string()
            }
        );

        let err = rules.validate(Some("2024-06-01"), None).unwrap_err();
        assert_eq!(
            err,
            IngestionError::MissingRequiredField {
                field: "value".to_string()
            }
        );
        assert_eq!(err.to_string(), "Required field is missing: value");
    }

    #[test]
    fn test_derive_age_anniversary_rule() {
        let rules = rules();
        let birth = Some(date(1960, 6, 15));

        // On the anniversary the year counts
        assert_eq!(rules.derive_age(birth, date(2024, 6, 15)), Some(64));
        // One day before, it does not
        assert_eq!(rules.derive_age(birth, date(2024, 6, 14)), Some(63));
        // One day after
        assert_eq!(rules.derive_age(birth, date(2024, 6, 16)), Some(64));

        // Month comparison, not day-of-year
        assert_eq!(rules.derive_age(birth, date(2024, 5, 20)), Some(63));
        assert_eq!(rules.derive_age(birth, date(2024, 7, 1)), Some(64));

        assert_eq!(rules.derive_age(None, date(2024, 6, 15)), None);
        // Birth date in the future clamps to None, never a negative age
        assert_eq!(rules.derive_age(Some(date(2030, 1, 1)), date(2024, 6, 15)), None);
    }

    #[test]
    fn test_resolve_reference_range_precedence() {
        let rules = rules();

        // Explicit wins verbatim
        assert_eq!(
            rules.resolve_reference_range(Some("0.0 - 9.9"), Some(45)),
            Some("0.0 - 9.9".to_string())
        );

        // Derived from the band
        assert_eq!(
            rules.resolve_reference_range(None, Some(45)),
            Some("0.0 - 2.0".to_string())
        );
        assert_eq!(
            rules.resolve_reference_range(None, Some(85)),
            Some("0.0 - 6.5".to_string())
        );

        // No age, no placeholder
        assert_eq!(rules.resolve_reference_range(None, None), None);
    }

    #[test]
    fn test_resolve_status_precedence() {
        let rules = rules();
        let value = FieldValue::Number(2.5);

        assert_eq!(
            rules.resolve_status(Some("Reviewed"), Some(&value), Some(30)),
            "Reviewed"
        );
        assert_eq!(rules.resolve_status(None, Some(&value), Some(30)), "High");
        assert_eq!(rules.resolve_status(None, Some(&value), Some(55)), "Normal");
        // Invalid value falls back to the classifier's safe default
        assert_eq!(rules.resolve_status(None, None, Some(55)), "Normal");
    }

    #[test]
    fn test_resolve_attachment_branches() {
        let rules = rules();

        // New upload replaces and marks the old one stale
        let replaced = rules.resolve_attachment(Some("files/new.pdf"), Some("files/old.pdf"));
        assert_eq!(replaced.path, Some("files/new.pdf".to_string()));
        assert_eq!(replaced.stale, Some("files/old.pdf".to_string()));

        // First upload, nothing to delete
        let first = rules.resolve_attachment(Some("files/new.pdf"), None);
        assert_eq!(first.path, Some("files/new.pdf".to_string()));
        assert_eq!(first.stale, None);

        // No upload keeps the existing attachment
        let kept = rules.resolve_attachment(None, Some("files/old.pdf"));
        assert_eq!(kept.path, Some("files/old.pdf".to_string()));
        assert_eq!(kept.stale, None);

        let empty = rules.resolve_attachment(None, None);
        assert_eq!(empty.path, None);
        assert_eq!(empty.stale, None);
    }

    struct RecordingStore {
        deleted: RefCell<Vec<String>>,
        fail: bool,
    }

    impl BlobStore for RecordingStore {
        fn delete(&self, path: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("storage unavailable");
            }
            self.deleted.borrow_mut().push(path.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_apply_attachment_best_effort() {
        let rules = rules();
        let plan = rules.resolve_attachment(Some("files/new.pdf"), Some("files/old.pdf"));

        let store = RecordingStore {
            deleted: RefCell::new(Vec::new()),
            fail: false,
        };
        rules.apply_attachment(&store, &plan);
        assert_eq!(store.deleted.borrow().as_slice(), ["files/old.pdf"]);

        // Deletion failure is swallowed, never propagated
        let failing = RecordingStore {
            deleted: RefCell::new(Vec::new()),
            fail: true,
        };
        rules.apply_attachment(&failing, &plan);
        assert!(failing.deleted.borrow().is_empty());

        // Nothing stale, nothing deleted
        let keep = rules.resolve_attachment(None, Some("files/old.pdf"));
        rules.apply_attachment(&store, &keep);
        assert_eq!(store.deleted.borrow().len(), 1);

        println!("✅ Best-effort attachment cleanup test passed");
    }

    #[test]
    fn test_prepare_derives_all_fields() {
        let rules = rules();
        let patient = PatientSnapshot {
            birth_date: Some(date(1960, 1, 10)),
            baseline: Default::default(),
        };

        let draft = ResultDraft {
            test_type: "psa".to_string(),
            test_date: Some("2024-06-01".to_string()),
            value: Some(FieldValue::Text("3.5".to_string())),
            author: Some("dr.keller".to_string()),
            new_attachment: Some("files/report.pdf".to_string()),
            ..Default::default()
        };

        let prepared = rules.prepare(draft, &patient).unwrap();
        let record = &prepared.record;

        // Age 64 on 2024-06-01 puts 3.5 in the 60-69 borderline tier
        assert_eq!(record.status, Some("Elevated".to_string()));
        assert_eq!(record.reference_range, Some("0.0 - 3.0".to_string()));
        assert_eq!(record.test_date, Some(date(2024, 6, 1)));
        assert_eq!(record.attachment_path, Some("files/report.pdf".to_string()));
        assert_eq!(record.author, Some("dr.keller".to_string()));
        assert!(!record.id.is_empty());
        assert_eq!(prepared.attachment.stale, None);
    }

    #[test]
    fn test_prepare_respects_explicit_fields() {
        let rules = rules();
        let patient = PatientSnapshot::default();

        let draft = ResultDraft {
            id: Some("existing-id".to_string()),
            test_type: "psa".to_string(),
            test_date: Some("2024-06-01".to_string()),
            value: Some(FieldValue::Number(3.5)),
            status: Some("Reviewed".to_string()),
            reference_range: Some("0.0 - 9.9".to_string()),
            existing_attachment: Some("files/old.pdf".to_string()),
            ..Default::default()
        };

        let prepared = rules.prepare(draft, &patient).unwrap();
        assert_eq!(prepared.record.id, "existing-id");
        assert_eq!(prepared.record.status, Some("Reviewed".to_string()));
        assert_eq!(prepared.record.reference_range, Some("0.0 - 9.9".to_string()));
        assert_eq!(prepared.record.attachment_path, Some("files/old.pdf".to_string()));
    }

    #[test]
    fn test_prepare_with_unknown_age_omits_range() {
        let rules = rules();
        // No birth date on file
        let patient = PatientSnapshot::default();

        let draft = ResultDraft {
            test_type: "psa".to_string(),
            test_date: Some("2024-06-01".to_string()),
            value: Some(FieldValue::Number(5.0)),
            ..Default::default()
        };

        let prepared = rules.prepare(draft, &patient).unwrap();
        assert_eq!(prepared.record.reference_range, None);
        // 5.0 against the default 4.0 limit
        assert_eq!(prepared.record.status, Some("High".to_string()));
    }

    #[test]
    fn test_prepare_rejects_missing_fields_before_mutation() {
        let rules = rules();
        let patient = PatientSnapshot::default();

        let draft = ResultDraft {
            test_type: "psa".to_string(),
            test_date: Some("2024-06-01".to_string()),
            value: Some(FieldValue::Flag(false)),
            ..Default::default()
        };

        let err = rules.prepare(draft, &patient).unwrap_err();
        assert!(matches!(err, IngestionError::MissingRequiredField { ref field } if field == "value"));
    }
}
