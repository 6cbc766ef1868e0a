//! Pipeline orchestrator
//!
//! Drives one query through the fixed stage sequence:
//!
//! PLANNING → RETRIEVING → CALCULATING → SYNTHESIZING → VERIFYING
//!   → {ACCEPTED, REFUSED, FAILED}
//!
//! The orchestrator owns every retry and refusal decision. External calls
//! get bounded, jittered exponential backoff; verification failures get a
//! bounded corrective re-synthesis loop; evidence shortfalls refuse rather
//! than fabricate. Every transition is appended to the audit trail.

use crate::audit::AuditTrail;
use crate::calc::{CalculationEngine, OperandBinding};
use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{PipelineError, Result};
use crate::ledger::EvidenceLedger;
use crate::models::{
    normalize_metric, PipelineOutcome, Plan, PlannedSource, Query, RefusalReason,
    RequestedCalculation, Stage,
};
use crate::period::Period;
use crate::reasoning::Reasoner;
use crate::retrieval::{Retriever, SearchFilters};
use crate::verifier::Verifier;
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooperative cancellation, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run produces: terminal outcome plus the full audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub query: Query,
    pub outcome: PipelineOutcome,
    pub audit: AuditTrail,
}

pub struct Pipeline {
    reasoner: Arc<dyn Reasoner>,
    retriever: Arc<dyn Retriever>,
    engine: CalculationEngine,
    verifier: Verifier,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        retriever: Arc<dyn Retriever>,
        config: PipelineConfig,
    ) -> Self {
        let verifier = Verifier::new(config.verifier.clone());
        Self {
            reasoner,
            retriever,
            engine: CalculationEngine::new(),
            verifier,
            config,
        }
    }

    /// Answer one query. Never panics and never returns a bare error: every
    /// run terminates in Accepted, Refused, or Failed, with its audit trail.
    pub async fn answer(&self, text: &str) -> RunReport {
        self.answer_with_cancel(text, &CancelFlag::new()).await
    }

    pub async fn answer_with_cancel(&self, text: &str, cancel: &CancelFlag) -> RunReport {
        let query = Query::new(text);
        let mut audit = AuditTrail::new(&query);

        info!(query_id = %query.id, text = %query.text, "Pipeline: starting run");

        let outcome = match self.run(&query, cancel, &mut audit).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(query_id = %query.id, error = %e, "Pipeline: run failed");
                audit.record(Stage::Failed, e.to_string(), e.kind());
                PipelineOutcome::Failed {
                    kind: e.kind().to_string(),
                    detail: e.to_string(),
                }
            }
        };

        let report = match &outcome {
            PipelineOutcome::Accepted { report, .. } => Some(report),
            _ => None,
        };
        audit.seal(report);

        RunReport {
            query,
            outcome,
            audit,
        }
    }

    async fn run(
        &self,
        query: &Query,
        cancel: &CancelFlag,
        audit: &mut AuditTrail,
    ) -> Result<PipelineOutcome> {
        // === PLANNING ===
        self.check_cancel(cancel)?;

        let reasoner = Arc::clone(&self.reasoner);
        let plan = call_with_retry(self.config.retry.clone(), "extract_plan", || {
            let reasoner = Arc::clone(&reasoner);
            let query = query.clone();
            async move { reasoner.extract_plan(&query).await }
        })
        .await?;

        if plan.is_empty() {
            audit.record(Stage::Planning, "plan has no data needs", "refused");
            audit.record(Stage::Refused, "query judged out of scope", "out_of_scope");
            return Ok(PipelineOutcome::Refused {
                reason: RefusalReason::OutOfScope,
            });
        }
        audit.record(
            Stage::Planning,
            format!(
                "{} data need(s), {} calculation(s)",
                plan.data_needs.len(),
                plan.calculations.len()
            ),
            "ok",
        );

        // === RETRIEVING ===
        self.check_cancel(cancel)?;

        let mut ledger = EvidenceLedger::new(query.id);
        if let Some(detail) = self.retrieve_all(&plan, &mut ledger, audit).await? {
            audit.record(Stage::Refused, detail.clone(), "insufficient_evidence");
            return Ok(PipelineOutcome::Refused {
                reason: RefusalReason::InsufficientEvidence { detail },
            });
        }

        // === CALCULATING ===
        self.check_cancel(cancel)?;

        let caveats = self.calculate_all(&plan, &mut ledger, audit);

        // === SYNTHESIZING / VERIFYING (bounded corrective loop) ===
        let mut corrections: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            self.check_cancel(cancel)?;

            audit.record(
                Stage::Synthesizing,
                format!("attempt {}", attempt + 1),
                if attempt == 0 { "ok" } else { "corrective retry" },
            );

            let reasoner = Arc::clone(&self.reasoner);
            let corrections_text = corrections.clone();
            let draft = call_with_retry(self.config.retry.clone(), "draft", || {
                let reasoner = Arc::clone(&reasoner);
                let query = query.clone();
                let corrections = corrections_text.clone();
                let ledger = &ledger;
                async move { reasoner.draft(&query, ledger, corrections.as_deref()).await }
            })
            .await?;

            self.check_cancel(cancel)?;

            let report = self.verifier.verify(&draft, &ledger);
            audit.record(
                Stage::Verifying,
                format!(
                    "{} claimed, {} unresolved, {} contradiction(s)",
                    draft.claimed_numbers.len(),
                    report.unresolved.len(),
                    report.contradictions.len()
                ),
                if report.all_resolved() { "ok" } else { "unresolved" },
            );

            if report.all_resolved() {
                info!(
                    query_id = %query.id,
                    confidence = report.confidence.value(),
                    "Pipeline: answer accepted"
                );
                audit.record(
                    Stage::Accepted,
                    format!("confidence {:.2}", report.confidence.value()),
                    "ok",
                );
                return Ok(PipelineOutcome::Accepted {
                    draft,
                    report,
                    caveats,
                });
            }

            if attempt >= self.config.max_synthesis_retries {
                let numbers: Vec<f64> = report.unresolved.iter().map(|c| c.value).collect();
                warn!(
                    query_id = %query.id,
                    ?numbers,
                    "Pipeline: synthesis retries exhausted, refusing"
                );
                audit.record(
                    Stage::Refused,
                    format!("{} number(s) remain unverifiable", numbers.len()),
                    "unresolved_numbers",
                );
                return Ok(PipelineOutcome::Refused {
                    reason: RefusalReason::UnresolvedNumbers {
                        numbers,
                        attempts: attempt + 1,
                    },
                });
            }

            corrections = Some(
                report
                    .unresolved
                    .iter()
                    .map(|c| c.value.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            attempt += 1;
        }
    }

    /// Fetch evidence for every data need (and comparison period)
    /// concurrently. Returns `Some(detail)` when any need has no candidate
    /// at or above the relevance threshold — the "insufficient sources"
    /// refusal, never a fabricated value.
    async fn retrieve_all(
        &self,
        plan: &Plan,
        ledger: &mut EvidenceLedger,
        audit: &mut AuditTrail,
    ) -> Result<Option<String>> {
        let mut fetches: Vec<(String, Period)> = Vec::new();
        for need in &plan.data_needs {
            let mut push = |metric: &str, period: Period| {
                let key = normalize_metric(metric);
                if !fetches
                    .iter()
                    .any(|(m, p)| normalize_metric(m) == key && *p == period)
                {
                    fetches.push((metric.to_string(), period));
                }
            };
            push(&need.metric, need.period);
            if let Some(comparison) = need.comparison_period {
                push(&need.metric, comparison);
            }
        }

        let mut tasks: JoinSet<(String, Period, Result<Vec<crate::models::EvidenceItem>>)> =
            JoinSet::new();

        for (metric, period) in &fetches {
            let retriever = Arc::clone(&self.retriever);
            let policy = self.config.retry.clone();
            let metric = metric.clone();
            let period = *period;

            tasks.spawn(async move {
                let query_text = format!("{} {}", metric.replace('_', " "), period);
                let filters = SearchFilters::for_period(period);
                let result = call_with_retry(policy, "search", || {
                    let retriever = Arc::clone(&retriever);
                    let query_text = query_text.clone();
                    let filters = filters.clone();
                    async move { retriever.search(&query_text, &filters).await }
                })
                .await;
                (metric, period, result)
            });
        }

        let mut missing: Vec<String> = Vec::new();
        let mut accepted_count = 0usize;

        while let Some(joined) = tasks.join_next().await {
            let (metric, period, result) =
                joined.map_err(|e| PipelineError::ExternalService {
                    message: format!("retrieval task failed: {}", e),
                    attempts: 1,
                })?;

            let candidates = result?;
            let qualified: Vec<_> = candidates
                .into_iter()
                .filter(|item| item.relevance >= self.config.relevance_threshold)
                .collect();

            debug!(%metric, %period, count = qualified.len(), "Evidence qualified");

            if qualified.is_empty() {
                missing.push(format!("{} for {}", metric, period));
            }
            for item in qualified {
                ledger.add_evidence(item);
                accepted_count += 1;
            }
        }

        if !missing.is_empty() {
            missing.sort();
            let detail = format!("no sufficiently relevant source for: {}", missing.join("; "));
            audit.record(Stage::Retrieving, detail.clone(), "refused");
            return Ok(Some(detail));
        }

        audit.record(
            Stage::Retrieving,
            format!(
                "{} evidence item(s) from {} document(s)",
                accepted_count,
                ledger.distinct_documents()
            ),
            "ok",
        );
        Ok(None)
    }

    /// Run requested calculations in plan order. A calculation whose
    /// operands cannot be resolved degrades to a caveat; it never aborts
    /// the run and never substitutes a default.
    fn calculate_all(
        &self,
        plan: &Plan,
        ledger: &mut EvidenceLedger,
        audit: &mut AuditTrail,
    ) -> Vec<String> {
        let mut caveats = Vec::new();
        let mut produced: Vec<Option<Uuid>> = Vec::with_capacity(plan.calculations.len());

        for calc in &plan.calculations {
            match self.resolve_bindings(calc, &produced, ledger) {
                Ok(bindings) => match self.engine.compute(calc.formula, &bindings, ledger) {
                    Ok(trace) => {
                        debug!(formula = %calc.formula, result = trace.result, "Trace recorded");
                        produced.push(Some(ledger.add_trace(trace)));
                    }
                    Err(e) => {
                        warn!(formula = %calc.formula, error = %e, "Calculation failed");
                        caveats.push(format!("{} could not be computed: {}", calc.formula, e));
                        produced.push(None);
                    }
                },
                Err(detail) => {
                    warn!(formula = %calc.formula, %detail, "Operand resolution failed");
                    caveats.push(format!("{} skipped: {}", calc.formula, detail));
                    produced.push(None);
                }
            }
        }

        audit.record(
            Stage::Calculating,
            format!(
                "{} of {} calculation(s) completed",
                produced.iter().filter(|p| p.is_some()).count(),
                plan.calculations.len()
            ),
            if caveats.is_empty() { "ok" } else { "partial" },
        );

        caveats
    }

    /// Map plan-level operands (metric+period, or an earlier calculation)
    /// onto ledger ids. The dependency check for calculation references is
    /// done here; the ledger itself needs no locking.
    fn resolve_bindings(
        &self,
        calc: &RequestedCalculation,
        produced: &[Option<Uuid>],
        ledger: &EvidenceLedger,
    ) -> std::result::Result<Vec<OperandBinding>, String> {
        let mut bindings = Vec::with_capacity(calc.operands.len());

        for operand in &calc.operands {
            let binding = match &operand.source {
                PlannedSource::Metric { metric, period } => {
                    let item = ledger.find(metric, *period).ok_or_else(|| {
                        format!("no evidence for {} in {}", metric, period)
                    })?;
                    OperandBinding::evidence(operand.role.clone(), item.id)
                }
                PlannedSource::Calculation { index } => {
                    let trace_id = produced
                        .get(*index)
                        .copied()
                        .flatten()
                        .ok_or_else(|| format!("depends on failed calculation {}", index))?;
                    OperandBinding::trace(operand.role.clone(), trace_id)
                }
            };
            bindings.push(binding);
        }

        Ok(bindings)
    }

    fn check_cancel(&self, cancel: &CancelFlag) -> Result<()> {
        if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Bounded retry with per-call timeout and jittered exponential backoff.
/// Only transient errors are retried; exhaustion converts to a terminal
/// external-service error, never a silent empty result.
async fn call_with_retry<T, F, Fut>(policy: RetryPolicy, what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        let result = match timeout(policy.call_timeout, call()).await {
            Ok(r) => r,
            Err(_) => Err(PipelineError::ExternalService {
                message: format!("{} timed out", what),
                attempts: attempt + 1,
            }),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                let jitter: f64 = rand::thread_rng().gen_range(0.5..1.5);
                warn!(%what, attempt, error = %e, "Transient failure, backing off");
                sleep(delay.mul_f64(jitter)).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(PipelineError::ExternalService {
                    message: format!("{} failed: {}", what, e),
                    attempts: attempt + 1,
                })
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Citation, DataNeed, EvidenceItem, FormulaId, PlannedOperand, Provenance, Unit,
    };
    use crate::reasoning::MockReasoner;
    use crate::retrieval::StaticRetriever;

    fn item(metric: &str, period: Period, value: f64, doc: &str) -> EvidenceItem {
        EvidenceItem {
            id: Uuid::new_v4(),
            metric: metric.to_string(),
            value,
            unit: Unit::Currency,
            period,
            citation: Citation {
                document_id: doc.to_string(),
                locator: "p.4".to_string(),
            },
            relevance: 0.9,
        }
    }

    fn metric_operand(role: &str, metric: &str, period: Period) -> PlannedOperand {
        PlannedOperand {
            role: role.to_string(),
            source: PlannedSource::Metric {
                metric: metric.to_string(),
                period,
            },
        }
    }

    fn calc_operand(role: &str, index: usize) -> PlannedOperand {
        PlannedOperand {
            role: role.to_string(),
            source: PlannedSource::Calculation { index },
        }
    }

    /// Plan + corpus for the ROE-change scenario used by several tests.
    fn roe_change_fixture() -> (Plan, Vec<EvidenceItem>) {
        let q1_2023 = Period::quarter(2023, 1);
        let q1_2024 = Period::quarter(2024, 1);

        let plan = Plan {
            data_needs: vec![
                DataNeed {
                    metric: "net_income".to_string(),
                    period: q1_2023,
                    comparison_period: Some(q1_2024),
                },
                DataNeed {
                    metric: "shareholders_equity".to_string(),
                    period: q1_2023,
                    comparison_period: Some(q1_2024),
                },
            ],
            calculations: vec![
                RequestedCalculation {
                    formula: FormulaId::Roe,
                    operands: vec![
                        metric_operand("net_income", "net_income", q1_2023),
                        metric_operand("shareholders_equity", "shareholders_equity", q1_2023),
                    ],
                },
                RequestedCalculation {
                    formula: FormulaId::Roe,
                    operands: vec![
                        metric_operand("net_income", "net_income", q1_2024),
                        metric_operand("shareholders_equity", "shareholders_equity", q1_2024),
                    ],
                },
                RequestedCalculation {
                    formula: FormulaId::PercentageChange,
                    operands: vec![calc_operand("old", 0), calc_operand("new", 1)],
                },
            ],
        };

        let corpus = vec![
            item("net_income", q1_2023, 500.0, "fab-fs-q1"),
            item("shareholders_equity", q1_2023, 5000.0, "fab-bs-q1"),
            item("net_income", q1_2024, 600.0, "fab-fs-next"),
            item("shareholders_equity", q1_2024, 5000.0, "fab-bs-next"),
        ];

        (plan, corpus)
    }

    fn pipeline(reasoner: MockReasoner, retriever: StaticRetriever) -> Pipeline {
        Pipeline::new(
            Arc::new(reasoner),
            Arc::new(retriever),
            PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_roe_change() {
        let (plan, corpus) = roe_change_fixture();
        let pipeline = pipeline(MockReasoner::new(plan), StaticRetriever::new(corpus));

        let run = pipeline
            .answer("What was FAB's ROE change from Q1 2023 to Q1 2024?")
            .await;

        match run.outcome {
            PipelineOutcome::Accepted {
                report, caveats, ..
            } => {
                assert!(report.all_resolved());
                assert!(report.contradictions.is_empty());
                assert_eq!(report.confidence.value(), 1.0);
                assert!(caveats.is_empty());
            }
            other => panic!("expected Accepted, got {:?}", other),
        }

        // audit trail covers every stage
        let stages: Vec<Stage> = run.audit.records().iter().map(|r| r.stage).collect();
        assert!(stages.contains(&Stage::Planning));
        assert!(stages.contains(&Stage::Retrieving));
        assert!(stages.contains(&Stage::Calculating));
        assert!(stages.contains(&Stage::Verifying));
        assert!(stages.contains(&Stage::Accepted));
        assert!(run.audit.sealed().is_some());
    }

    #[tokio::test]
    async fn test_traces_reference_prior_traces() {
        let (plan, corpus) = roe_change_fixture();
        let reasoner = MockReasoner::new(plan.clone());

        // run the calculating stage through the full pipeline, then inspect
        // the third trace via the percentage result: 10% -> 12% is +20%
        let pipeline = pipeline(reasoner, StaticRetriever::new(corpus));
        let run = pipeline.answer("ROE change").await;

        let draft_text = match &run.outcome {
            PipelineOutcome::Accepted { draft, .. } => &draft.text,
            other => panic!("expected Accepted, got {:?}", other),
        };
        assert!(draft_text.contains("20.00"));
        assert!(draft_text.contains("10.00"));
        assert!(draft_text.contains("12.00"));
    }

    #[tokio::test]
    async fn test_refuses_on_empty_retrieval() {
        let (plan, _) = roe_change_fixture();
        let pipeline = pipeline(MockReasoner::new(plan), StaticRetriever::empty());

        let run = pipeline.answer("ROE change with no corpus").await;

        match run.outcome {
            PipelineOutcome::Refused {
                reason: RefusalReason::InsufficientEvidence { detail },
            } => {
                assert!(detail.contains("net_income"));
            }
            other => panic!("expected InsufficientEvidence refusal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refuses_out_of_scope() {
        let pipeline = pipeline(MockReasoner::new(Plan::default()), StaticRetriever::empty());

        let run = pipeline.answer("What is the meaning of life?").await;

        assert!(matches!(
            run.outcome,
            PipelineOutcome::Refused {
                reason: RefusalReason::OutOfScope
            }
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_calculation_degrades_to_caveat() {
        let q1 = Period::quarter(2023, 1);
        let plan = Plan {
            data_needs: vec![DataNeed {
                metric: "net_income".to_string(),
                period: q1,
                comparison_period: None,
            }],
            calculations: vec![RequestedCalculation {
                formula: FormulaId::Roe,
                operands: vec![
                    metric_operand("net_income", "net_income", q1),
                    // never retrieved: not among the data needs
                    metric_operand("shareholders_equity", "shareholders_equity", q1),
                ],
            }],
        };
        let corpus = vec![item("net_income", q1, 500.0, "fab-fs-q1")];
        let pipeline = pipeline(MockReasoner::new(plan), StaticRetriever::new(corpus));

        let run = pipeline.answer("partial").await;

        match run.outcome {
            PipelineOutcome::Accepted { caveats, .. } => {
                assert_eq!(caveats.len(), 1);
                assert!(caveats[0].contains("roe"));
            }
            other => panic!("expected partial Accepted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrective_retry_then_accept() {
        let (plan, corpus) = roe_change_fixture();
        // first draft claims a number with no ledger backing; second is clean
        let reasoner = MockReasoner::with_drafts(
            plan,
            vec![
                "Net income was 123,456 in Q1 2023.".to_string(),
                "Net income was 500.00 in Q1 2023 and 600.00 in Q1 2024.".to_string(),
            ],
        );
        let pipeline = pipeline(reasoner, StaticRetriever::new(corpus));

        let run = pipeline.answer("ROE change").await;

        assert!(matches!(run.outcome, PipelineOutcome::Accepted { .. }));
        let synth_count = run
            .audit
            .records()
            .iter()
            .filter(|r| r.stage == Stage::Synthesizing)
            .count();
        assert_eq!(synth_count, 2);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_refusal() {
        let (plan, corpus) = roe_change_fixture();
        let bogus = "The figure was 123,456 exactly.".to_string();
        let reasoner =
            MockReasoner::with_drafts(plan, vec![bogus.clone(), bogus.clone(), bogus]);
        let pipeline = pipeline(reasoner, StaticRetriever::new(corpus));

        let run = pipeline.answer("ROE change").await;

        match run.outcome {
            PipelineOutcome::Refused {
                reason: RefusalReason::UnresolvedNumbers { numbers, attempts },
            } => {
                assert_eq!(numbers, vec![123456.0]);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected UnresolvedNumbers refusal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_fails_at_stage_boundary() {
        let (plan, corpus) = roe_change_fixture();
        let pipeline = pipeline(MockReasoner::new(plan), StaticRetriever::new(corpus));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let run = pipeline.answer_with_cancel("ROE change", &cancel).await;

        match run.outcome {
            PipelineOutcome::Failed { kind, .. } => assert_eq!(kind, "cancelled"),
            other => panic!("expected cancelled Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_provenance_chain_in_accepted_run() {
        // re-run the scenario and check the percentage_change trace points
        // at the two roe traces
        let (plan, corpus) = roe_change_fixture();
        let mut ledger = EvidenceLedger::new(Uuid::new_v4());
        for i in corpus {
            ledger.add_evidence(i);
        }

        let engine = CalculationEngine::new();
        let p = Pipeline::new(
            Arc::new(MockReasoner::new(plan.clone())),
            Arc::new(StaticRetriever::empty()),
            PipelineConfig::default(),
        );

        let mut produced = Vec::new();
        for calc in &plan.calculations {
            let bindings = p.resolve_bindings(calc, &produced, &ledger).unwrap();
            let trace = engine.compute(calc.formula, &bindings, &ledger).unwrap();
            produced.push(Some(ledger.add_trace(trace)));
        }

        let pct = ledger.trace(produced[2].unwrap()).unwrap();
        assert!((pct.result - 20.0).abs() < 1e-9);
        let first_step_provenance: Vec<Provenance> = pct.steps[0]
            .operands
            .iter()
            .map(|o| o.provenance)
            .collect();
        assert!(first_step_provenance.contains(&Provenance::Trace(produced[0].unwrap())));
        assert!(first_step_provenance.contains(&Provenance::Trace(produced[1].unwrap())));
    }
}
