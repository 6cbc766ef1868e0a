//! Reasoning adapter
//!
//! Thin contract over the external LLM service, used exactly twice per run:
//! once to extract a structured plan from the question, once (or more, under
//! corrective retry) to turn the ledger into prose. Adapter output is
//! untrusted input: plan JSON is validated field by field before it reaches
//! the orchestrator, and draft prose is re-scanned for numeric claims rather
//! than trusted to cite itself.

use crate::error::{PipelineError, Result};
use crate::ledger::EvidenceLedger;
use crate::models::{
    DataNeed, DraftAnswer, FormulaId, Plan, PlannedOperand, PlannedSource, Query,
    RequestedCalculation,
};
use crate::period::Period;
use crate::verifier::extract_claimed_numbers;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Contract for the external reasoning service.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Extract a structured plan from the raw question.
    async fn extract_plan(&self, query: &Query) -> Result<Plan>;

    /// Draft a prose answer over the ledger. `corrections` carries the
    /// unresolved numbers of a failed verification pass.
    async fn draft(
        &self,
        query: &Query,
        ledger: &EvidenceLedger,
        corrections: Option<&str>,
    ) -> Result<DraftAnswer>;
}

//
// ================= Plan Validation =================
//

/// Parse and validate plan JSON from the reasoning service.
///
/// Accepts an optional markdown fence. Every field is checked explicitly;
/// a malformed plan is rejected here, never repaired downstream.
pub fn parse_plan_response(raw: &str) -> Result<Plan> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json: Value = serde_json::from_str(cleaned)
        .map_err(|e| PipelineError::InvalidPlan(format!("unparseable plan JSON: {}", e)))?;

    let mut plan = Plan::default();

    if let Some(needs) = json.get("data_needs").and_then(Value::as_array) {
        for need in needs {
            let metric = need
                .get("metric")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::InvalidPlan("data need missing metric".into()))?;
            let period = parse_period_field(need, "period")?
                .ok_or_else(|| PipelineError::InvalidPlan("data need missing period".into()))?;
            let comparison_period = parse_period_field(need, "comparison_period")?;

            plan.data_needs.push(DataNeed {
                metric: metric.to_string(),
                period,
                comparison_period,
            });
        }
    }

    if let Some(calcs) = json.get("calculations").and_then(Value::as_array) {
        for (index, calc) in calcs.iter().enumerate() {
            let formula_str = calc
                .get("formula")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::InvalidPlan("calculation missing formula".into()))?;
            let formula = FormulaId::parse(formula_str).ok_or_else(|| {
                PipelineError::InvalidPlan(format!("unknown formula {:?}", formula_str))
            })?;

            let operands_json = calc
                .get("operands")
                .and_then(Value::as_array)
                .ok_or_else(|| PipelineError::InvalidPlan("calculation missing operands".into()))?;

            let mut operands = Vec::with_capacity(operands_json.len());
            for op in operands_json {
                let role = op
                    .get("role")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PipelineError::InvalidPlan("operand missing role".into()))?;

                let source = if let Some(calc_ref) = op.get("calculation") {
                    let referenced = calc_ref.as_u64().ok_or_else(|| {
                        PipelineError::InvalidPlan("calculation reference must be an index".into())
                    })? as usize;
                    // only backwards references: calculations run in order
                    if referenced >= index {
                        return Err(PipelineError::InvalidPlan(format!(
                            "calculation {} references calculation {}",
                            index, referenced
                        )));
                    }
                    PlannedSource::Calculation { index: referenced }
                } else {
                    let metric = op.get("metric").and_then(Value::as_str).ok_or_else(|| {
                        PipelineError::InvalidPlan(
                            "operand needs either a metric or a calculation reference".into(),
                        )
                    })?;
                    let period = parse_period_field(op, "period")?.ok_or_else(|| {
                        PipelineError::InvalidPlan("metric operand missing period".into())
                    })?;
                    PlannedSource::Metric {
                        metric: metric.to_string(),
                        period,
                    }
                };

                operands.push(PlannedOperand {
                    role: role.to_string(),
                    source,
                });
            }

            plan.calculations.push(RequestedCalculation { formula, operands });
        }
    }

    debug!(
        data_needs = plan.data_needs.len(),
        calculations = plan.calculations.len(),
        "Plan validated"
    );

    Ok(plan)
}

fn parse_period_field(obj: &Value, key: &str) -> Result<Option<Period>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Period::from_str(s)
            .map(Some)
            .map_err(|e| PipelineError::InvalidPlan(format!("bad {}: {}", key, e))),
        Some(other) => Err(PipelineError::InvalidPlan(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

//
// ================= Ledger Rendering =================
//

/// Evidence and trace summary fed into the drafting prompt and used by the
/// mock reasoner's generated drafts.
fn render_ledger(ledger: &EvidenceLedger) -> String {
    let mut out = String::new();
    out.push_str("Evidence:\n");
    for item in ledger.all_evidence() {
        let _ = writeln!(
            out,
            "- {} for {}: {:.2} [{}]",
            item.metric, item.period, item.value, item.citation.document_id
        );
    }
    out.push_str("Calculated results:\n");
    for trace in ledger.all_traces() {
        let _ = writeln!(out, "- {}: {:.2}", trace.formula, trace.result);
    }
    out
}

//
// ================= Gemini Implementation =================
//

const GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

const PLAN_SYSTEM_PROMPT: &str = r#"You are a financial analysis planning engine for quarterly bank disclosures.

Decompose the user question into a retrieval and calculation plan. Return ONLY valid JSON, no explanation:

{
  "data_needs": [
    { "metric": "net_income", "period": "Q1 2023", "comparison_period": "Q1 2024" }
  ],
  "calculations": [
    { "formula": "roe", "operands": [
        { "role": "net_income", "metric": "net_income", "period": "Q1 2023" },
        { "role": "shareholders_equity", "metric": "shareholders_equity", "period": "Q1 2023" }
    ]},
    { "formula": "percentage_change", "operands": [
        { "role": "old", "calculation": 0 },
        { "role": "new", "calculation": 1 }
    ]}
  ]
}

Rules:
- Periods are written as "Q<1-4> <year>" or "FY<year>".
- Formulas: percentage_change, growth_rate_yoy, growth_rate_qoq, roe, roa, loan_to_deposit, net_interest_margin, cost_to_income, average, sum, compound_growth.
- Calculation references use "calculation": <index of an EARLIER calculation>.
- If the question is not about bank financial disclosures, return {"data_needs": [], "calculations": []}."#;

const DRAFT_SYSTEM_PROMPT: &str = r#"You are a financial analysis assistant.

Write a clear, concise answer to the user question using ONLY the numeric data and citations provided. Every number in your answer must appear in the provided data. Cite the source document for each figure."#;

/// Reasoning over the Gemini API, connection-pooled.
pub struct GeminiReasoner {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiReasoner {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(PipelineError::ExternalService {
                message: "GEMINI_API_KEY not configured".to_string(),
                attempts: 1,
            });
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        };

        info!("Calling reasoning service");

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::ExternalService {
                message: format!("reasoning service error: {}", error_text),
                attempts: 1,
            });
        }

        let parsed: GeminiResponse = response.json().await?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PipelineError::ExternalService {
                message: "empty response from reasoning service".to_string(),
                attempts: 1,
            })
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    async fn extract_plan(&self, query: &Query) -> Result<Plan> {
        let response = self.generate(PLAN_SYSTEM_PROMPT, &query.text).await?;
        parse_plan_response(&response)
    }

    async fn draft(
        &self,
        query: &Query,
        ledger: &EvidenceLedger,
        corrections: Option<&str>,
    ) -> Result<DraftAnswer> {
        let mut prompt = format!("{}\n\nQuestion:\n{}", render_ledger(ledger), query.text);
        if let Some(corrections) = corrections {
            let _ = write!(
                prompt,
                "\n\nYour previous draft contained numbers not present in the data: {}. \
                 Rewrite the answer using only the provided figures.",
                corrections
            );
        }

        let text = self.generate(DRAFT_SYSTEM_PROMPT, &prompt).await?;
        let claimed_numbers = extract_claimed_numbers(&text);
        Ok(DraftAnswer {
            text,
            claimed_numbers,
        })
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

//
// ================= Mock Implementation =================
//

/// Mock reasoner for development & testing. Returns a fixed plan, and either
/// scripted drafts (in order) or a draft generated from the ledger whose
/// numbers all verify.
pub struct MockReasoner {
    plan: Plan,
    scripted_drafts: Mutex<VecDeque<String>>,
}

impl MockReasoner {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            scripted_drafts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_drafts(plan: Plan, drafts: Vec<String>) -> Self {
        Self {
            plan,
            scripted_drafts: Mutex::new(drafts.into()),
        }
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn extract_plan(&self, _query: &Query) -> Result<Plan> {
        Ok(self.plan.clone())
    }

    async fn draft(
        &self,
        query: &Query,
        ledger: &EvidenceLedger,
        _corrections: Option<&str>,
    ) -> Result<DraftAnswer> {
        let scripted = self
            .scripted_drafts
            .lock()
            .ok()
            .and_then(|mut drafts| drafts.pop_front());

        let text = scripted.unwrap_or_else(|| {
            format!("Answer to: {}\n\n{}", query.text, render_ledger(ledger))
        });

        let claimed_numbers = extract_claimed_numbers(&text);
        Ok(DraftAnswer {
            text,
            claimed_numbers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_response() {
        let raw = r#"```json
        {
          "data_needs": [
            { "metric": "net_income", "period": "Q1 2023" },
            { "metric": "net_income", "period": "Q1 2024", "comparison_period": "Q1 2023" }
          ],
          "calculations": [
            { "formula": "roe", "operands": [
              { "role": "net_income", "metric": "net_income", "period": "Q1 2023" },
              { "role": "shareholders_equity", "metric": "shareholders_equity", "period": "Q1 2023" }
            ]},
            { "formula": "percentage_change", "operands": [
              { "role": "old", "calculation": 0 },
              { "role": "new", "calculation": 0 }
            ]}
          ]
        }
        ```"#;

        let plan = parse_plan_response(raw).unwrap();
        assert_eq!(plan.data_needs.len(), 2);
        assert_eq!(plan.calculations.len(), 2);
        assert_eq!(plan.data_needs[0].period, Period::quarter(2023, 1));
        assert_eq!(plan.calculations[0].formula, FormulaId::Roe);
        assert!(matches!(
            plan.calculations[1].operands[0].source,
            PlannedSource::Calculation { index: 0 }
        ));
    }

    #[test]
    fn test_parse_plan_rejects_malformed() {
        assert!(parse_plan_response("not json").is_err());

        // bad period
        let bad_period = r#"{"data_needs": [{"metric": "x", "period": "H1 2023"}]}"#;
        assert!(parse_plan_response(bad_period).is_err());

        // forward calculation reference
        let forward = r#"{"calculations": [
            {"formula": "percentage_change", "operands": [
                {"role": "old", "calculation": 1},
                {"role": "new", "calculation": 1}
            ]}
        ]}"#;
        assert!(parse_plan_response(forward).is_err());

        // unknown formula
        let unknown = r#"{"calculations": [{"formula": "alchemy", "operands": []}]}"#;
        assert!(parse_plan_response(unknown).is_err());
    }

    #[test]
    fn test_parse_plan_allows_empty() {
        let plan = parse_plan_response(r#"{"data_needs": [], "calculations": []}"#).unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_mock_reasoner_scripted_drafts() {
        let reasoner = MockReasoner::with_drafts(
            Plan::default(),
            vec!["first draft 111".to_string(), "second draft 222".to_string()],
        );
        let query = Query::new("test");
        let ledger = EvidenceLedger::new(query.id);

        let first = reasoner.draft(&query, &ledger, None).await.unwrap();
        assert!(first.text.contains("first"));
        assert_eq!(first.claimed_numbers.len(), 1);

        let second = reasoner.draft(&query, &ledger, None).await.unwrap();
        assert!(second.text.contains("second"));
    }
}
