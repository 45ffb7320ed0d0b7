//! Compliance pipeline - two-stage PII redaction
//!
//! Stage 1 (deterministic): email addresses.
//! Stage 2 (contextual): person names recognised by the generation service.
//!
//! Fail-closed: if stage 2 errors or answers with something unparseable, a
//! stricter deterministic heuristic runs instead. The output is never less
//! redacted than stage 1, and redaction never fails the request.

pub mod patterns;

use crate::audit::EventRecorder;
use crate::generation::{GenerationOptions, GenerationPort};
use crate::models::{EventTag, RedactionFinding};
use crate::Result;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Output of one redaction pass.
///
/// Stage-1 finding spans index into the original text; stage-2 and fallback
/// spans index into the stage-1 output.
#[derive(Debug, Clone)]
pub struct RedactionReport {
    pub text: String,
    pub findings: Vec<RedactionFinding>,
    /// True when the fallback heuristic replaced contextual recognition.
    pub degraded: bool,
}

/// Only the exact requested shape counts; any other object is unparseable.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NameList {
    names: Vec<String>,
}

pub struct CompliancePipeline {
    generator: Arc<dyn GenerationPort>,
    recorder: EventRecorder,
    options: GenerationOptions,
}

impl CompliancePipeline {
    /// `temperature` should stay at (or near) 0 so that repeated redaction of
    /// the same text is stable.
    pub fn new(generator: Arc<dyn GenerationPort>, recorder: EventRecorder, temperature: f32) -> Self {
        Self {
            generator,
            recorder,
            options: GenerationOptions::with_temperature(temperature),
        }
    }

    pub async fn redact(&self, text: &str) -> String {
        self.redact_report(text, None).await.text
    }

    pub async fn redact_report(&self, text: &str, correlation_id: Option<Uuid>) -> RedactionReport {
        // === STAGE 1 ===
        let (stage_one, mut findings) = patterns::redact_emails(text);
        debug!(email_findings = findings.len(), "Stage 1 complete");

        if !stage_one.chars().any(char::is_alphabetic) {
            return RedactionReport {
                text: stage_one,
                findings,
                degraded: false,
            };
        }

        // === STAGE 2 ===
        let (name_findings, degraded) = match self.recognize_names(&stage_one).await {
            Ok(names) => (patterns::find_name_spans(&stage_one, &names), false),
            Err(err) => {
                warn!(error = %err, "Name recognition unavailable - applying fallback heuristic");

                self.recorder
                    .record(
                        EventTag::Error,
                        correlation_id,
                        json!({
                            "stage": "redaction",
                            "kind": err.kind(),
                            "error": "contextual name recognition failed; fallback heuristic applied",
                        }),
                    )
                    .await;

                (patterns::fallback_name_spans(&stage_one), true)
            }
        };

        debug!(name_findings = name_findings.len(), degraded, "Stage 2 complete");

        let redacted = patterns::apply_findings(&stage_one, &name_findings);
        findings.extend(name_findings);

        RedactionReport {
            text: redacted,
            findings,
            degraded,
        }
    }

    async fn recognize_names(&self, text: &str) -> Result<Vec<String>> {
        let prompt = build_name_prompt(text);
        let response = self.generator.complete(&prompt, &self.options).await?;
        parse_name_response(&response)
    }
}

fn build_name_prompt(text: &str) -> String {
    format!(
        r#"You are a privacy compliance filter.

Identify every personal name (first names, last names, and full names of
people) in the TEXT below.

Rules:
- Do NOT report numeric identifiers
- Do NOT report company, product, or other business entity names
- Ignore tokens that look like [REDACTED_...]
- Copy each name exactly as it appears in the TEXT
- Return ONLY valid JSON
- No explanation text
- JSON format:

{{"names": ["..."]}}

TEXT:
<<<
{}
>>>
"#,
        text
    )
}

/// Accepts `{"names": [...]}` or a bare `[...]`, optionally fenced.
fn parse_name_response(response: &str) -> Result<Vec<String>> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if cleaned.starts_with('[') {
        return Ok(serde_json::from_str::<Vec<String>>(cleaned)?);
    }

    let parsed: NameList = serde_json::from_str(cleaned)?;
    Ok(parsed.names)
}
