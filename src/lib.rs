// Clinic Records - Core Library
// PSA value classification and longitudinal result reconciliation
//
// Pure data logic only: routing, auth, persistence and presentation live in
// the surrounding application and hand their rows through these engines.

pub mod classification;
pub mod ingestion;
pub mod reconciliation;
pub mod records;

// Re-export commonly used types
pub use classification::{
    AgeBand, Classification, PsaStatus, ThresholdClassifier, DEFAULT_NORMAL_UPPER,
};
pub use ingestion::{
    AttachmentPlan, BlobStore, IngestionError, IngestionRules, PreparedResult, ResultDraft,
};
pub use reconciliation::ResultReconciler;
pub use records::{
    BaselineRecord, FieldValue, FollowUpRecord, PatientSnapshot, ReconciledEntry, PSA_TEST_TYPE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
