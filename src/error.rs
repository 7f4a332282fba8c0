/// Errors raised by the estimation core and the policy recommender.
///
/// Every variant is a precondition violation or a data-quality defect. None
/// of them are retried; each aborts the current operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("cannot summarize an empty sample")]
    EmptySample,

    #[error("unsupported segmentation '{segmentation}'; known: {known:?}")]
    InvalidSegmentation {
        segmentation: String,
        known: Vec<String>,
    },

    #[error("segment column '{column}' contains null values (first at row {row})")]
    NullSegmentValue { column: String, row: usize },

    #[error("propensity model has no class for treatment {level}; fitted classes: {known:?}")]
    UnknownTreatmentClass { level: i64, known: Vec<i64> },

    #[error("no observed rows for treatment {level} in outcome '{outcome}'")]
    NoObservations { outcome: String, level: i64 },

    #[error("no treatment levels are <= {budget_cap}; available levels: {levels:?}")]
    NoFeasibleLevel { budget_cap: i64, levels: Vec<i64> },

    #[error("segmentation '{segmentation}' is not present in the artifact")]
    UnsupportedSegmentation { segmentation: String },

    #[error("method '{method}' is unavailable: {reason}")]
    UnsupportedMethod { method: String, reason: String },

    #[error("dataset validation failed: {reason}")]
    DatasetValidation { reason: String },

    #[error("outcome '{outcome}' is not tracked; known: {known:?}")]
    UnknownOutcome { outcome: String, known: Vec<String> },

    #[error("dose-response table is incomplete: {details}")]
    IncompleteTable { details: String },

    #[error("failed to fit {model}: {reason}")]
    ModelFit { model: String, reason: String },

    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid recommendation request: {reason}")]
    InvalidRequest { reason: String },
}

impl EngineError {
    pub fn dataset(reason: impl Into<String>) -> Self {
        Self::DatasetValidation {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
