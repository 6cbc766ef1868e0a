//! Financial Analysis Pipeline
//!
//! A verified analysis pipeline over quarterly bank disclosures that:
//! - Extracts a structured retrieval/calculation plan from the question
//! - Gathers evidence with citations from the document search service
//! - Runs deterministic financial calculations (LLM excluded from arithmetic)
//! - Cross-checks every number in the drafted answer against the evidence
//! - Refuses rather than fabricate when sources are insufficient
//!
//! PIPELINE:
//! QUERY → PLAN → RETRIEVE → CALCULATE → SYNTHESIZE → VERIFY → ANSWER | REFUSE

pub mod audit;
pub mod calc;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod period;
pub mod pipeline;
pub mod reasoning;
pub mod retrieval;
pub mod verifier;

pub use error::{PipelineError, Result};

// Re-export common types
pub use models::*;
pub use period::Period;
pub use pipeline::{CancelFlag, Pipeline, RunReport};
