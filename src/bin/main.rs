use financial_analysis_pipeline::{
    config::PipelineConfig,
    models::{Citation, DataNeed, EvidenceItem, FormulaId, Plan, PlannedOperand, PlannedSource,
        PipelineOutcome, RequestedCalculation, Unit},
    period::Period,
    pipeline::Pipeline,
    reasoning::{GeminiReasoner, MockReasoner, Reasoner},
    retrieval::{HttpRetriever, Retriever, StaticRetriever},
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial Analysis Pipeline starting");

    let config = PipelineConfig::from_env();

    // Live services when configured, otherwise a self-contained demo run.
    let reasoner: Arc<dyn Reasoner> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(GeminiReasoner::new(key)?),
        _ => {
            info!("GEMINI_API_KEY not set, using the scripted demo reasoner");
            Arc::new(MockReasoner::new(demo_plan()))
        }
    };
    let retriever: Arc<dyn Retriever> = match std::env::var("RETRIEVAL_URL") {
        Ok(url) if !url.is_empty() => Arc::new(HttpRetriever::new(url)?),
        _ => {
            info!("RETRIEVAL_URL not set, using the built-in demo corpus");
            Arc::new(StaticRetriever::new(demo_corpus()))
        }
    };

    let pipeline = Pipeline::new(reasoner, retriever, config);

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "How did FAB's ROE change from Q1 2023 to Q1 2024?".to_string());

    info!(%question, "Running pipeline");
    let run = pipeline.answer(&question).await;

    println!("\n=== PIPELINE RESULT ===");
    match &run.outcome {
        PipelineOutcome::Accepted {
            draft,
            report,
            caveats,
        } => {
            println!("Status: accepted");
            println!("Confidence: {:.2}", report.confidence.value());
            println!("\n{}", draft.text);
            for caveat in caveats {
                println!("Caveat: {}", caveat);
            }
        }
        PipelineOutcome::Refused { reason } => {
            println!("Status: refused");
            println!("Reason: {}", serde_json::to_string(reason)?);
        }
        PipelineOutcome::Failed { kind, detail } => {
            println!("Status: failed ({})", kind);
            println!("Detail: {}", detail);
        }
    }

    println!("\n=== AUDIT TRAIL ===");
    println!("{}", run.audit.to_json()?);

    Ok(())
}

/// Plan the scripted reasoner emits for the demo question.
fn demo_plan() -> Plan {
    let q1_2023 = Period::quarter(2023, 1);
    let q1_2024 = Period::quarter(2024, 1);

    let metric = |role: &str, metric: &str, period: Period| PlannedOperand {
        role: role.to_string(),
        source: PlannedSource::Metric {
            metric: metric.to_string(),
            period,
        },
    };

    Plan {
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
                    metric("net_income", "net_income", q1_2023),
                    metric("shareholders_equity", "shareholders_equity", q1_2023),
                ],
            },
            RequestedCalculation {
                formula: FormulaId::Roe,
                operands: vec![
                    metric("net_income", "net_income", q1_2024),
                    metric("shareholders_equity", "shareholders_equity", q1_2024),
                ],
            },
            RequestedCalculation {
                formula: FormulaId::PercentageChange,
                operands: vec![
                    PlannedOperand {
                        role: "old".to_string(),
                        source: PlannedSource::Calculation { index: 0 },
                    },
                    PlannedOperand {
                        role: "new".to_string(),
                        source: PlannedSource::Calculation { index: 1 },
                    },
                ],
            },
        ],
    }
}

/// Evidence corpus mirroring FAB quarterly results, AED millions.
fn demo_corpus() -> Vec<EvidenceItem> {
    let item = |metric: &str, period: Period, value: f64, doc: &str| EvidenceItem {
        id: Uuid::new_v4(),
        metric: metric.to_string(),
        value,
        unit: Unit::Currency,
        period,
        citation: Citation {
            document_id: doc.to_string(),
            locator: "income statement".to_string(),
        },
        relevance: 0.9,
    };

    vec![
        item(
            "net_income",
            Period::quarter(2023, 1),
            3932.0,
            "FAB-Q1-2023-financial-statements.pdf",
        ),
        item(
            "shareholders_equity",
            Period::quarter(2023, 1),
            112450.0,
            "FAB-Q1-2023-balance-sheet.pdf",
        ),
        item(
            "net_income",
            Period::quarter(2024, 1),
            4240.0,
            "FAB-Q1-2024-financial-statements.pdf",
        ),
        item(
            "shareholders_equity",
            Period::quarter(2024, 1),
            118200.0,
            "FAB-Q1-2024-balance-sheet.pdf",
        ),
    ]
}
