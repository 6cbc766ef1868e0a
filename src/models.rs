//! Core data models for the analysis pipeline

use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Unit attached to every numeric value in the ledger.
///
/// The calculation engine fails closed on mismatched units; it never coerces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    /// Monetary amount (AED unless the citation says otherwise)
    Currency,
    Percent,
    Ratio,
    Count,
    Unknown,
}

impl Unit {
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        if lower.is_empty() {
            return Unit::Unknown;
        }
        if lower.contains('%') || lower.contains("percent") {
            Unit::Percent
        } else if lower.contains("ratio") || lower.contains("multiple") {
            Unit::Ratio
        } else if lower.contains("count") || lower.contains("number") {
            Unit::Count
        } else if lower.contains("aed")
            || lower.contains("usd")
            || lower.contains('$')
            || lower.contains("million")
            || lower.contains("billion")
            || lower.contains("thousand")
            || lower.contains("currency")
        {
            Unit::Currency
        } else {
            Unit::Unknown
        }
    }
}

/// Pipeline stage, used in audit records and transition logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Retrieving,
    Calculating,
    Synthesizing,
    Verifying,
    Accepted,
    Refused,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Planning => "planning",
            Stage::Retrieving => "retrieving",
            Stage::Calculating => "calculating",
            Stage::Synthesizing => "synthesizing",
            Stage::Verifying => "verifying",
            Stage::Accepted => "accepted",
            Stage::Refused => "refused",
            Stage::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Query =================
//

/// Immutable user question; everything downstream is scoped to its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

//
// ================= Plan =================
//

/// Structured plan extracted from the query by the reasoning adapter.
///
/// An empty plan means the query was judged out of scope and triggers refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub data_needs: Vec<DataNeed>,
    pub calculations: Vec<RequestedCalculation>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.data_needs.is_empty() && self.calculations.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNeed {
    pub metric: String,
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_period: Option<Period>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedCalculation {
    pub formula: FormulaId,
    pub operands: Vec<PlannedOperand>,
}

/// Operand as it appears in a plan, before ledger resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedOperand {
    pub role: String,
    pub source: PlannedSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedSource {
    /// Evidence looked up by metric name and fiscal period.
    Metric { metric: String, period: Period },
    /// Result of an earlier calculation in the same plan (by index).
    Calculation { index: usize },
}

//
// ================= Formulas =================
//

/// Built-in formula identifiers.
///
/// `growth_rate` splits into YoY and QoQ variants; the comparison period is
/// resolved by the period model, not supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormulaId {
    PercentageChange,
    GrowthRateYoy,
    GrowthRateQoq,
    Roe,
    Roa,
    LoanToDeposit,
    NetInterestMargin,
    CostToIncome,
    Average,
    Sum,
    CompoundGrowth,
}

impl FormulaId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormulaId::PercentageChange => "percentage_change",
            FormulaId::GrowthRateYoy => "growth_rate_yoy",
            FormulaId::GrowthRateQoq => "growth_rate_qoq",
            FormulaId::Roe => "roe",
            FormulaId::Roa => "roa",
            FormulaId::LoanToDeposit => "loan_to_deposit",
            FormulaId::NetInterestMargin => "net_interest_margin",
            FormulaId::CostToIncome => "cost_to_income",
            FormulaId::Average => "average",
            FormulaId::Sum => "sum",
            FormulaId::CompoundGrowth => "compound_growth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "percentage_change" | "pct_change" => Some(FormulaId::PercentageChange),
            "growth_rate" | "growth_rate_yoy" | "yoy" => Some(FormulaId::GrowthRateYoy),
            "growth_rate_qoq" | "qoq" => Some(FormulaId::GrowthRateQoq),
            "roe" => Some(FormulaId::Roe),
            "roa" => Some(FormulaId::Roa),
            "loan_to_deposit" => Some(FormulaId::LoanToDeposit),
            "net_interest_margin" | "nim" => Some(FormulaId::NetInterestMargin),
            "cost_to_income" => Some(FormulaId::CostToIncome),
            "average" | "avg" | "mean" => Some(FormulaId::Average),
            "sum" | "add" => Some(FormulaId::Sum),
            "compound_growth" | "cagr" => Some(FormulaId::CompoundGrowth),
            _ => None,
        }
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Evidence =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub locator: String,
}

/// One retrieved fact. Owned by the ledger for the lifetime of a single
/// query run; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: Uuid,
    pub metric: String,
    pub value: f64,
    pub unit: Unit,
    pub period: Period,
    pub citation: Citation,
    pub relevance: f64,
}

/// Canonical metric key for ledger lookups ("Net Profit" == "net_profit").
pub fn normalize_metric(metric: &str) -> String {
    metric
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

//
// ================= Calculation Traces =================
//

/// Origin of an operand value inside a trace step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Evidence(Uuid),
    Trace(Uuid),
    /// An earlier step within the same trace.
    Step(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operand {
    pub value: f64,
    pub provenance: Provenance,
}

/// One arithmetic operation with full operand provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub description: String,
    pub operands: Vec<Operand>,
    pub value: f64,
}

/// Immutable derivation chain for one formula invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationTrace {
    pub id: Uuid,
    pub formula: FormulaId,
    pub steps: Vec<TraceStep>,
    pub result: f64,
    pub unit: Unit,
}

//
// ================= Draft & Verification =================
//

/// Number as it appears in draft prose, with its byte offset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimedNumber {
    pub value: f64,
    pub offset: usize,
}

/// Prose answer from the reasoning adapter. Transient; discarded unless
/// verification resolves every claimed number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAnswer {
    pub text: String,
    pub claimed_numbers: Vec<ClaimedNumber>,
}

/// Two evidence items for the same metric and period with materially
/// different values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contradiction {
    pub metric: String,
    pub period: Period,
    pub first: Uuid,
    pub second: Uuid,
    pub values: (f64, f64),
}

/// Deterministic multiplicative confidence score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceScore {
    pub source_factor: f64,
    pub calculation_factor: f64,
    pub consistency_factor: f64,
}

impl ConfidenceScore {
    pub fn value(&self) -> f64 {
        self.source_factor * self.calculation_factor * self.consistency_factor
    }
}

/// Terminal artifact of one verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub unresolved: Vec<ClaimedNumber>,
    pub contradictions: Vec<Contradiction>,
    pub confidence: ConfidenceScore,
}

impl VerificationReport {
    pub fn all_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

//
// ================= Audit =================
//

/// One state-machine transition. The ordered trail of these records is a
/// first-class output: it is the basis of the citation guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub outcome: String,
}

//
// ================= Terminal Outcome =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RefusalReason {
    /// Plan had zero data needs and zero calculations.
    OutOfScope,
    /// Retrieval produced no usable sources for at least one data need.
    InsufficientEvidence { detail: String },
    /// Synthesis retries exhausted with numbers still unmatched.
    UnresolvedNumbers { numbers: Vec<f64>, attempts: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Accepted {
        draft: DraftAnswer,
        report: VerificationReport,
        /// Explicit degradations, e.g. a calculation that could not be
        /// resolved from the ledger.
        caveats: Vec<String>,
    },
    Refused {
        reason: RefusalReason,
    },
    Failed {
        kind: String,
        detail: String,
    },
}
