//! Retrieval adapter
//!
//! Thin contract over the external vector-search service. The adapter
//! normalizes raw hits into [`EvidenceItem`]s — value strings are parsed
//! with financial-notation rules (parenthesized negatives, thousands
//! separators, bn/m/k suffixes), and hits without a resolvable period are
//! dropped rather than guessed. Candidates are returned in service order;
//! relevance filtering is the orchestrator's decision.

use crate::error::{PipelineError, Result};
use crate::models::{Citation, EvidenceItem, Unit};
use crate::period::Period;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarter: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,
}

impl SearchFilters {
    pub fn for_period(period: Period) -> Self {
        match period {
            Period::Quarter { year, quarter } => Self {
                year: Some(year),
                quarter: Some(quarter),
                report_type: None,
            },
            Period::FiscalYear { year } => Self {
                year: Some(year),
                quarter: None,
                report_type: None,
            },
        }
    }
}

/// Contract for the external document search service. Finite,
/// non-restartable result per call.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<EvidenceItem>>;
}

//
// ================= Number Normalization =================
//

/// Parse financial notation into a plain f64.
///
/// Handles `(1,234)` negatives, `1,234.5`, currency markers (`AED`, `$`,
/// `US$`), and `bn`/`million`/`k` style magnitude suffixes.
pub fn normalize_number_str(raw: &str) -> Option<f64> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].trim();
    }

    let cleaned = s
        .replace("US$", "")
        .replace("AED", "")
        .replace('$', "")
        .replace(',', "")
        .replace('—', "-")
        .replace('–', "-")
        .trim()
        .to_lowercase();

    let num_end = cleaned
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(cleaned.len());
    let (num_part, suffix) = cleaned.split_at(num_end);
    let num_part = num_part.trim();
    let suffix = suffix.trim();

    let multiplier = if suffix.starts_with('b') {
        1e9
    } else if suffix.starts_with('m') {
        1e6
    } else if suffix.starts_with('k') || suffix.starts_with('t') {
        1e3
    } else {
        1.0
    };

    let value: f64 = num_part.parse().ok().or_else(|| leading_number(num_part))?;
    let value = value * multiplier;
    Some(if negative { -value } else { value })
}

/// Fallback: longest numeric prefix of the string.
fn leading_number(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;
    while end < bytes.len()
        && (bytes[end].is_ascii_digit()
            || bytes[end] == b'.'
            || (end == 0 && bytes[end] == b'-'))
    {
        end += 1;
    }
    if end == 0 {
        return None;
    }
    s[..end].parse().ok()
}

//
// ================= HTTP Implementation =================
//

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(flatten)]
    filters: &'a SearchFilters,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    metric: String,
    value: serde_json::Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    period: Option<String>,
    source: String,
    #[serde(default)]
    locator: Option<String>,
    score: f64,
}

/// Retrieval over an HTTP search endpoint, connection-pooled.
pub struct HttpRetriever {
    client: Client,
    base_url: String,
    limit: usize,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limit: 6,
        })
    }

    fn hit_to_evidence(hit: SearchHit) -> Option<EvidenceItem> {
        let value = match &hit.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => normalize_number_str(s),
            _ => None,
        }?;

        // explicit period metadata wins; fall back to the source string
        let period = hit
            .period
            .as_deref()
            .and_then(|p| Period::from_str(p).ok())
            .or_else(|| Period::infer_from_source(&hit.source));

        let period = match period {
            Some(p) => p,
            None => {
                warn!(source = %hit.source, "Dropping hit with no resolvable period");
                return None;
            }
        };

        Some(EvidenceItem {
            id: Uuid::new_v4(),
            metric: hit.metric,
            value,
            unit: hit.unit.as_deref().map(Unit::from_label).unwrap_or(Unit::Unknown),
            period,
            citation: Citation {
                document_id: hit.source,
                locator: hit.locator.unwrap_or_default(),
            },
            relevance: hit.score,
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<EvidenceItem>> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            query,
            filters,
            limit: self.limit,
        };

        debug!(%query, ?filters, "Calling retrieval service");

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::ExternalService {
                message: format!("retrieval service returned {}: {}", status, body),
                attempts: 1,
            });
        }

        let parsed: SearchResponse = response.json().await?;
        let items: Vec<EvidenceItem> = parsed
            .results
            .into_iter()
            .filter_map(Self::hit_to_evidence)
            .collect();

        debug!(count = items.len(), "Retrieval returned candidates");
        Ok(items)
    }
}

//
// ================= Static Implementation =================
//

/// In-memory retriever backed by a fixed corpus. Used in tests and the demo
/// binary; keeps the pipeline functional without the search service.
pub struct StaticRetriever {
    items: Vec<EvidenceItem>,
}

impl StaticRetriever {
    pub fn new(items: Vec<EvidenceItem>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<EvidenceItem>> {
        let query_key = crate::models::normalize_metric(query);

        Ok(self
            .items
            .iter()
            .filter(|item| {
                let metric_key = crate::models::normalize_metric(&item.metric);
                query_key.contains(&metric_key)
            })
            .filter(|item| match filters.year {
                Some(year) => item.period.year() == year,
                None => true,
            })
            .filter(|item| match (filters.quarter, item.period) {
                (Some(q), Period::Quarter { quarter, .. }) => quarter == q,
                (Some(_), Period::FiscalYear { .. }) => false,
                (None, _) => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number_str() {
        assert_eq!(normalize_number_str("1,234"), Some(1234.0));
        assert_eq!(normalize_number_str("(1,234)"), Some(-1234.0));
        assert_eq!(normalize_number_str("1.2bn"), Some(1.2e9));
        assert_eq!(normalize_number_str("4,400 million"), Some(4.4e9));
        assert_eq!(normalize_number_str("AED 5,200"), Some(5200.0));
        assert_eq!(normalize_number_str("US$ 3.5 billion"), Some(3.5e9));
        assert_eq!(normalize_number_str("12k"), Some(12_000.0));
        assert_eq!(normalize_number_str("-4.5"), Some(-4.5));
        assert_eq!(normalize_number_str(""), None);
        assert_eq!(normalize_number_str("n/a"), None);
    }

    #[tokio::test]
    async fn test_static_retriever_filters() {
        let q3_2024 = Period::quarter(2024, 3);
        let q3_2023 = Period::quarter(2023, 3);
        let make = |period, value| EvidenceItem {
            id: Uuid::new_v4(),
            metric: "net_profit".to_string(),
            value,
            unit: Unit::Currency,
            period,
            citation: Citation {
                document_id: "doc".to_string(),
                locator: String::new(),
            },
            relevance: 0.8,
        };

        let retriever = StaticRetriever::new(vec![make(q3_2024, 4400.0), make(q3_2023, 4000.0)]);

        let hits = retriever
            .search("net profit Q3 2024", &SearchFilters::for_period(q3_2024))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, 4400.0);

        let none = retriever
            .search(
                "total assets Q3 2024",
                &SearchFilters::for_period(q3_2024),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_hit_to_evidence_period_fallback() {
        let hit = SearchHit {
            metric: "net_profit".to_string(),
            value: serde_json::json!("4,400 million"),
            unit: Some("AED".to_string()),
            period: None,
            source: "FAB-Q3-2024-results.pdf".to_string(),
            locator: None,
            score: 0.91,
        };
        let item = HttpRetriever::hit_to_evidence(hit).unwrap();
        assert_eq!(item.period, Period::quarter(2024, 3));
        assert_eq!(item.value, 4.4e9);
        assert_eq!(item.unit, Unit::Currency);

        let undated = SearchHit {
            metric: "net_profit".to_string(),
            value: serde_json::json!(1.0),
            unit: None,
            period: None,
            source: "untitled.pdf".to_string(),
            locator: None,
            score: 0.5,
        };
        assert!(HttpRetriever::hit_to_evidence(undated).is_none());
    }
}
