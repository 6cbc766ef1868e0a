//! Verifier and confidence scoring
//!
//! Deterministic cross-check of a draft answer against the evidence ledger.
//! Every number claimed in the prose must match a ledger value or a trace
//! result within tolerance; anything unmatched is reported, and the
//! orchestrator decides whether to re-synthesize or refuse. The confidence
//! score is a reproducible function of the ledger and the draft, not a model
//! judgment.

use crate::ledger::EvidenceLedger;
use crate::models::{
    normalize_metric, ClaimedNumber, ConfidenceScore, Contradiction, DraftAnswer,
    VerificationReport,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Absolute tolerance when matching claimed numbers.
    pub abs_tolerance: f64,
    /// Relative tolerance when matching claimed numbers.
    pub rel_tolerance: f64,
    /// Two evidence values for the same metric+period contradict when they
    /// differ by more than this relative amount.
    pub contradiction_rel_tolerance: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            abs_tolerance: 0.01,
            rel_tolerance: 0.001,
            contradiction_rel_tolerance: 0.01,
        }
    }
}

pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Cross-reference every claimed number against the ledger and flag
    /// contradictory evidence. Pure function of its inputs.
    pub fn verify(&self, draft: &DraftAnswer, ledger: &EvidenceLedger) -> VerificationReport {
        let unresolved: Vec<ClaimedNumber> = draft
            .claimed_numbers
            .iter()
            .filter(|claim| !self.resolves(claim.value, ledger))
            .cloned()
            .collect();

        let contradictions = self.find_contradictions(ledger);

        let source_factor = match ledger.distinct_documents() {
            0 => 0.3,
            1 | 2 => 0.7,
            _ => 1.0,
        };
        let calculation_factor = if unresolved.is_empty() { 1.0 } else { 0.8 };
        let consistency_factor = if contradictions.is_empty() { 1.0 } else { 0.7 };

        let confidence = ConfidenceScore {
            source_factor,
            calculation_factor,
            consistency_factor,
        };

        info!(
            claimed = draft.claimed_numbers.len(),
            unresolved = unresolved.len(),
            contradictions = contradictions.len(),
            confidence = confidence.value(),
            "Verification completed"
        );

        VerificationReport {
            unresolved,
            contradictions,
            confidence,
        }
    }

    fn resolves(&self, claimed: f64, ledger: &EvidenceLedger) -> bool {
        let matches = |v: f64| {
            let diff = (claimed - v).abs();
            diff <= self.config.abs_tolerance || diff <= self.config.rel_tolerance * v.abs()
        };

        ledger.all_evidence().iter().any(|e| matches(e.value))
            || ledger.all_traces().iter().any(|t| matches(t.result))
    }

    /// Pairwise scan for same-metric, same-period evidence with materially
    /// different values. Independent of the draft text.
    fn find_contradictions(&self, ledger: &EvidenceLedger) -> Vec<Contradiction> {
        let items = ledger.all_evidence();
        let mut found = Vec::new();

        for (i, a) in items.iter().enumerate() {
            for b in &items[i + 1..] {
                if a.period != b.period
                    || normalize_metric(&a.metric) != normalize_metric(&b.metric)
                {
                    continue;
                }
                let scale = a.value.abs().max(b.value.abs());
                let diff = (a.value - b.value).abs();
                let materially_different = if scale == 0.0 {
                    false
                } else {
                    diff / scale > self.config.contradiction_rel_tolerance
                };
                if materially_different {
                    found.push(Contradiction {
                        metric: normalize_metric(&a.metric),
                        period: a.period,
                        first: a.id,
                        second: b.id,
                        values: (a.value, b.value),
                    });
                }
            }
        }

        found
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

/// Scan prose for numeric claims, recording each value with its byte offset.
///
/// Heuristics: tokens glued to a letter (Q1, FY2024) are period expressions,
/// not claims, and bare integers in 1900..=2100 are treated as years. Both
/// are skipped so that citations do not show up as unverifiable numbers.
pub fn extract_claimed_numbers(text: &str) -> Vec<ClaimedNumber> {
    let bytes = text.as_bytes();
    let mut numbers = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        // token start; include a leading minus sign
        let mut start = i;
        if start > 0 && bytes[start - 1] == b'-' {
            let before_minus = start >= 2 && bytes[start - 2].is_ascii_alphanumeric();
            if !before_minus {
                start -= 1;
            }
        }

        let mut end = i;
        while end < bytes.len()
            && (bytes[end].is_ascii_digit() || bytes[end] == b',' || bytes[end] == b'.')
        {
            end += 1;
        }
        // trailing '.' or ',' is sentence punctuation
        while end > i && (bytes[end - 1] == b'.' || bytes[end - 1] == b',') {
            end -= 1;
        }

        // glued to an identifier: Q3, FY2024, doc-1, p.3
        let glued_to_letter = start > 0
            && (bytes[start - 1].is_ascii_alphabetic()
                || ((bytes[start - 1] == b'-' || bytes[start - 1] == b'.')
                    && start >= 2
                    && bytes[start - 2].is_ascii_alphanumeric()));
        let token: String = text[start..end].replace(',', "");

        if !glued_to_letter {
            if let Ok(value) = token.parse::<f64>() {
                let looks_like_year = !token.contains('.')
                    && !token.starts_with('-')
                    && (1900.0..=2100.0).contains(&value)
                    && value.fract() == 0.0;
                if !looks_like_year {
                    numbers.push(ClaimedNumber {
                        value,
                        offset: start,
                    });
                }
            }
        }

        i = end.max(i + 1);
    }

    numbers
}
