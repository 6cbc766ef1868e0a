//! Error types for the financial analysis pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Temporal parse error: {0}")]
    TemporalParse(String),

    #[error("Calculation failed: {0}")]
    Formula(#[from] FormulaError),

    #[error("Insufficient evidence: {0}")]
    InsufficientEvidence(String),

    #[error("External service error after {attempts} attempt(s): {message}")]
    ExternalService { message: String, attempts: u32 },

    #[error("Unverifiable claims: {0} number(s) have no matching evidence or trace")]
    UnverifiableClaims(usize),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Query run cancelled")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Transient errors are retried with backoff; everything else propagates.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Http(_) | PipelineError::ExternalService { .. }
        )
    }

    /// Short machine-readable kind for audit records and terminal outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::TemporalParse(_) => "temporal_parse",
            PipelineError::Formula(_) => "formula",
            PipelineError::InsufficientEvidence(_) => "insufficient_evidence",
            PipelineError::ExternalService { .. } => "external_service",
            PipelineError::UnverifiableClaims(_) => "unverifiable_claims",
            PipelineError::InvalidPlan(_) => "invalid_plan",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Http(_) => "http",
            PipelineError::Io(_) => "io",
        }
    }
}

/// Typed failure of a single formula invocation.
///
/// Formula errors are local and recoverable: the affected calculation is
/// dropped and surfaces as an explicit caveat on the answer, never as a NaN
/// or a silently substituted default.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Unknown formula: {0}")]
    UnknownFormula(String),

    #[error("Missing operand: {0}")]
    MissingOperand(String),

    #[error("Division by zero: {0}")]
    DivisionByZero(String),

    #[error("Incompatible units: {0}")]
    IncompatibleUnits(String),

    #[error("Incompatible periods: {0}")]
    IncompatiblePeriods(String),

    #[error("Invalid operands: {0}")]
    InvalidOperands(String),
}
