//! Append-only evidence ledger
//!
//! One ledger per query run, exclusively owned by that run. Retrieved facts
//! and calculation traces are appended, never mutated, so the verifier can
//! read it as a stable snapshot. No locking: the ledger is never shared
//! across queries.

use crate::models::{normalize_metric, CalculationTrace, EvidenceItem};
use crate::period::Period;
use uuid::Uuid;

#[derive(Debug)]
pub struct EvidenceLedger {
    query_id: Uuid,
    evidence: Vec<EvidenceItem>,
    traces: Vec<CalculationTrace>,
}

impl EvidenceLedger {
    pub fn new(query_id: Uuid) -> Self {
        Self {
            query_id,
            evidence: Vec::new(),
            traces: Vec::new(),
        }
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Append a retrieved fact; returns its id.
    pub fn add_evidence(&mut self, item: EvidenceItem) -> Uuid {
        let id = item.id;
        self.evidence.push(item);
        id
    }

    /// Append a completed calculation trace; returns its id.
    pub fn add_trace(&mut self, trace: CalculationTrace) -> Uuid {
        let id = trace.id;
        self.traces.push(trace);
        id
    }

    pub fn evidence(&self, id: Uuid) -> Option<&EvidenceItem> {
        self.evidence.iter().find(|e| e.id == id)
    }

    pub fn trace(&self, id: Uuid) -> Option<&CalculationTrace> {
        self.traces.iter().find(|t| t.id == id)
    }

    /// Best evidence (highest relevance) for a metric in a period.
    pub fn find(&self, metric: &str, period: Period) -> Option<&EvidenceItem> {
        let key = normalize_metric(metric);
        self.evidence
            .iter()
            .filter(|e| normalize_metric(&e.metric) == key && e.period == period)
            .max_by(|a, b| a.relevance.total_cmp(&b.relevance))
    }

    pub fn all_evidence(&self) -> &[EvidenceItem] {
        &self.evidence
    }

    pub fn all_traces(&self) -> &[CalculationTrace] {
        &self.traces
    }

    /// Number of distinct source documents cited by the ledger, used for
    /// the source factor of the confidence score.
    pub fn distinct_documents(&self) -> usize {
        let mut docs: Vec<&str> = self
            .evidence
            .iter()
            .map(|e| e.citation.document_id.as_str())
            .collect();
        docs.sort_unstable();
        docs.dedup();
        docs.len()
    }
}
