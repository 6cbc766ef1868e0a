//! Per-query audit trail
//!
//! The ordered sequence of stage transitions is a first-class output of the
//! pipeline, not a log line: it is the basis of the citation guarantee. The
//! trail is hash-sealed over the query and final report so an external
//! collector can verify it was not edited after the run.

use crate::error::Result;
use crate::models::{AuditRecord, Query, Stage, VerificationReport};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditTrail {
    pub query_id: Uuid,
    pub query_hash: String,
    records: Vec<AuditRecord>,
    seal: Option<String>,
}

impl AuditTrail {
    pub fn new(query: &Query) -> Self {
        Self {
            query_id: query.id,
            query_hash: hash_of(query),
            records: Vec::new(),
            seal: None,
        }
    }

    /// Append one transition record.
    pub fn record(&mut self, stage: Stage, summary: impl Into<String>, outcome: impl Into<String>) {
        self.records.push(AuditRecord {
            stage,
            timestamp: Utc::now(),
            summary: summary.into(),
            outcome: outcome.into(),
        });
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    /// Seal the trail over the query hash, all records, and the final
    /// verification report. Returns the seal digest.
    pub fn seal(&mut self, report: Option<&VerificationReport>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.query_hash.as_bytes());
        for record in &self.records {
            let _ = serde_json::to_writer(&mut HashWriter(&mut hasher), record);
        }
        if let Some(report) = report {
            let _ = serde_json::to_writer(&mut HashWriter(&mut hasher), report);
        }
        let seal = hex::encode(hasher.finalize());
        self.seal = Some(seal.clone());
        seal
    }

    pub fn sealed(&self) -> Option<&str> {
        self.seal.as_deref()
    }

    /// Serialized form consumed by the external observability collector.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// SHA256 of a serializable value, streamed without an intermediate String.
fn hash_of<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();
    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
