//! Agent-to-agent handoff
//!
//! Boundary between the analyst (sees raw rows) and the compliance pipeline
//! (enforces redaction). The in-process channel is a plain async call; a
//! remote transport only needs another `HandoffChannel` impl.

use crate::audit::EventRecorder;
use crate::compliance::CompliancePipeline;
use crate::models::{EventTag, RawResult, RowSet};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Caller-visible answer for every terminal failure. Carries no diagnostics.
pub const FALLBACK_ANSWER: &str =
    "I couldn't answer that question from the available data. Please try rephrasing it.";

pub const EMPTY_RESULT_ANSWER: &str = "The query returned no rows.";

#[async_trait]
pub trait HandoffChannel: Send + Sync {
    /// Hand the raw result over for redaction and return the redacted text.
    async fn send(&self, raw: RawResult, correlation_id: Uuid) -> String;
}

pub struct InProcessHandoff {
    compliance: Arc<CompliancePipeline>,
    recorder: EventRecorder,
    latency: Option<Duration>,
}

impl InProcessHandoff {
    pub fn new(compliance: Arc<CompliancePipeline>, recorder: EventRecorder) -> Self {
        Self {
            compliance,
            recorder,
            latency: None,
        }
    }

    /// Simulated transport delay applied on each crossing.
    pub fn with_latency(mut self, latency: Option<Duration>) -> Self {
        self.latency = latency;
        self
    }

    async fn cross_boundary(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl HandoffChannel for InProcessHandoff {
    async fn send(&self, raw: RawResult, correlation_id: Uuid) -> String {
        let payload_kind = match &raw {
            RawResult::Rows(_) => "rows",
            RawResult::Failed { .. } => "failed",
        };
        let outbound = render_raw_result(&raw);

        self.recorder
            .record(
                EventTag::Handoff,
                Some(correlation_id),
                json!({
                    "direction": "send",
                    "correlation_id": correlation_id,
                    "payload_kind": payload_kind,
                    "bytes": outbound.len(),
                }),
            )
            .await;

        self.cross_boundary().await;
        let report = self
            .compliance
            .redact_report(&outbound, Some(correlation_id))
            .await;
        self.cross_boundary().await;

        debug!(
            correlation_id = %correlation_id,
            findings = report.findings.len(),
            degraded = report.degraded,
            "Handoff: redacted response received"
        );

        self.recorder
            .record(
                EventTag::Handoff,
                Some(correlation_id),
                json!({
                    "direction": "receive",
                    "correlation_id": correlation_id,
                    "bytes": report.text.len(),
                    "findings": report.findings.len(),
                    "degraded": report.degraded,
                }),
            )
            .await;

        report.text
    }
}

/// Text form of a raw result: a markdown table for rows, the fixed fallback
/// answer for failures.
pub fn render_raw_result(raw: &RawResult) -> String {
    match raw {
        RawResult::Rows(rows) => render_table(rows),
        RawResult::Failed { .. } => FALLBACK_ANSWER.to_string(),
    }
}

fn render_table(rows: &RowSet) -> String {
    if rows.rows.is_empty() {
        return EMPTY_RESULT_ANSWER.to_string();
    }

    let mut out = String::new();

    let header: Vec<String> = rows.columns.iter().map(|c| clean_cell(c)).collect();
    out.push_str(&format!("| {} |\n", header.join(" | ")));
    out.push_str(&format!("|{}\n", "---|".repeat(header.len().max(1))));

    for row in &rows.rows {
        let cells: Vec<String> = row.iter().map(format_cell).collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    out
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => clean_cell(s),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.0}", f),
            _ => n.to_string(),
        },
        other => clean_cell(&other.to_string()),
    }
}

/// Keep one cell on one line and out of the column separators.
fn clean_cell(text: &str) -> String {
    text.replace(['\n', '\r'], " ").replace('|', "/")
}
