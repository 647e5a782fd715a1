// ⚖️ Result Reconciler - Merge the intake baseline into the result timeline
// The same observation must never appear twice
//
// A synthetic baseline entry is injected only when the intake snapshot is
// complete AND no follow-up row already records the same (date, value)
// observation. Partial matches are different observations and both stay.

use crate::ingestion::IngestionRules;
use crate::records::{
    BaselineRecord, FieldValue, FollowUpRecord, PatientSnapshot, ReconciledEntry, PSA_TEST_TYPE,
};
use chrono::NaiveDate;
use tracing::debug;

// ============================================================================
// RESULT RECONCILER
// ============================================================================

pub struct ResultReconciler {
    rules: IngestionRules,
}

impl ResultReconciler {
    pub fn new() -> Self {
        ResultReconciler {
            rules: IngestionRules::new(),
        }
    }

    pub fn with_rules(rules: IngestionRules) -> Self {
        ResultReconciler { rules }
    }

    /// Merge a patient's baseline into their follow-up rows for display.
    ///
    /// Decides inclusion only; the caller owns ordering and pagination of
    /// the surrounding result set. Baseline injection applies to PSA views
    /// exclusively - any other test-type filter passes follow-ups through.
    pub fn reconcile(
        &self,
        patient: &PatientSnapshot,
        follow_ups: Vec<FollowUpRecord>,
        test_type_filter: Option<&str>,
    ) -> Vec<ReconciledEntry> {
        let psa_view = test_type_filter
            .map_or(true, |filter| filter.eq_ignore_ascii_case(PSA_TEST_TYPE));

        if !psa_view {
            return wrap(follow_ups);
        }

        let (baseline_value, baseline_numeric, baseline_date) =
            match complete_baseline(&patient.baseline) {
                Some(parts) => parts,
                None => return wrap(follow_ups),
            };

        if follow_ups
            .iter()
            .any(|record| represents(record, baseline_numeric, baseline_date))
        {
            // Already recorded as a follow-up, nothing to inject
            return wrap(follow_ups);
        }

        let synthetic = self.materialize(patient, baseline_value, baseline_date);
        debug!(date = %baseline_date, "injecting synthetic baseline entry");

        let mut entries = wrap(follow_ups);
        let position = entries
            .iter()
            .position(|entry| later_than(&entry.record, baseline_date))
            .unwrap_or(entries.len());
        entries.insert(
            position,
            ReconciledEntry {
                record: synthetic,
                is_baseline: true,
            },
        );

        entries
    }

    /// Build a follow-up-shaped row from the intake snapshot, with status and
    /// reference range derived the same way a submitted result's would be.
    fn materialize(
        &self,
        patient: &PatientSnapshot,
        value: FieldValue,
        date: NaiveDate,
    ) -> FollowUpRecord {
        let age = self.rules.derive_age(patient.birth_date, date);

        let mut record = FollowUpRecord::new(PSA_TEST_TYPE, value, Some(date));
        record.status = Some(self.rules.resolve_status(None, Some(&record.value), age));
        record.reference_range = self.rules.resolve_reference_range(None, age);
        record
    }
}

impl Default for ResultReconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap(follow_ups: Vec<FollowUpRecord>) -> Vec<ReconciledEntry> {
    follow_ups.into_iter().map(ReconciledEntry::from_record).collect()
}

/// Both baseline fields present and the value numeric, or no synthesis
fn complete_baseline(baseline: &BaselineRecord) -> Option<(FieldValue, f64, NaiveDate)> {
    let date = baseline.date?;
    let value = baseline.value.clone()?;
    let numeric = value.as_f64()?;
    Some((value, numeric, date))
}

/// Exact-match test: same calendar date AND same numeric value. A record
/// missing either field, or differing in either, is a different observation.
fn represents(record: &FollowUpRecord, baseline_value: f64, baseline_date: NaiveDate) -> bool {
    let same_date = record.test_date == Some(baseline_date);
    let same_value = record
        .value
        .as_f64()
        .map_or(false, |v| (v - baseline_value).abs() < f64::EPSILON);
    same_date && same_value
}

/// Undated rows sort after the baseline so the synthetic entry lands before
/// them, keeping the dated prefix chronological.
fn later_than(record: &FollowUpRecord, baseline_date: NaiveDate) -> bool {
    match record.test_date {
        Some(date) => date > baseline_date,
        None => true,
    }
}

// ============================================================================
// TESTS
// ============================================================================
