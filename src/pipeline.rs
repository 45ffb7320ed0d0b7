//! Caller-facing pipeline
//!
//! QUESTION → SCHEMA → ANALYST (bounded retry) → HANDOFF → REDACTED ANSWER
//!
//! `ask` is the only entry point a shell or batch harness needs. It never
//! returns raw rows or internal diagnostics.

use crate::analyst::{AgentCounters, AnalystAgent};
use crate::audit::EventRecorder;
use crate::compliance::CompliancePipeline;
use crate::config::PipelineConfig;
use crate::gemini::GeminiClient;
use crate::generation::{GenerationOptions, GenerationPort};
use crate::handoff::{HandoffChannel, InProcessHandoff};
use crate::models::{AskOutcome, EventTag, FailureReason, Question, RawResult};
use crate::store::{QueryStore, SqliteQueryStore};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct QueryPipeline {
    analyst: AnalystAgent,
    store: Arc<dyn QueryStore>,
    handoff: Arc<dyn HandoffChannel>,
    recorder: EventRecorder,
}

impl QueryPipeline {
    pub fn new(
        analyst: AnalystAgent,
        store: Arc<dyn QueryStore>,
        handoff: Arc<dyn HandoffChannel>,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            analyst,
            store,
            handoff,
            recorder,
        }
    }

    /// Wire the standard in-process pipeline.
    ///
    /// `sql_generator` drafts queries; `redaction_generator` serves the
    /// compliance side. They may be the same service.
    pub fn from_config(
        config: &PipelineConfig,
        sql_generator: Arc<dyn GenerationPort>,
        redaction_generator: Arc<dyn GenerationPort>,
        store: Arc<dyn QueryStore>,
        recorder: EventRecorder,
        counters: Arc<AgentCounters>,
    ) -> Self {
        let analyst = AnalystAgent::new(
            sql_generator,
            store.clone(),
            recorder.clone(),
            counters,
            config.max_retries,
        )
        .with_options(GenerationOptions::with_temperature(config.sql_temperature));

        let compliance = Arc::new(CompliancePipeline::new(
            redaction_generator,
            recorder.clone(),
            config.redaction_temperature,
        ));

        let handoff = Arc::new(
            InProcessHandoff::new(compliance, recorder.clone()).with_latency(config.handoff_latency),
        );

        Self::new(analyst, store, handoff, recorder)
    }

    /// Build the production pipeline: Gemini for both generation roles and
    /// the configured SQLite database, seeded with the demo dataset.
    pub async fn connect(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;

        let generator: Arc<dyn GenerationPort> = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.generation_model_identifier.clone(),
        )?);

        let store = SqliteQueryStore::connect(&config.database_url)
            .await?
            .with_demo_data()
            .await?;

        info!(
            model = %config.generation_model_identifier,
            max_retries = config.max_retries,
            "Pipeline initialized"
        );

        Ok(Self::from_config(
            config,
            generator.clone(),
            generator,
            Arc::new(store),
            EventRecorder::new(),
            Arc::new(AgentCounters::new()),
        ))
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn counters(&self) -> &Arc<AgentCounters> {
        self.analyst.counters()
    }

    /// Answer a question with a redacted, human-readable string.
    pub async fn ask(&self, question: &str) -> String {
        self.ask_detailed(question).await.answer
    }

    /// Like `ask`, also returning the attempt history and counters.
    pub async fn ask_detailed(&self, question: &str) -> AskOutcome {
        let start_time = Instant::now();
        let correlation_id = Uuid::new_v4();
        let question = Question::new(question);

        info!(
            correlation_id = %correlation_id,
            "Pipeline: question received"
        );

        // === SCHEMA ===
        let (raw, attempts, state) = match self.store.describe_schema().await {
            Ok(schema) => {
                let answer = self.analyst.answer(&question, &schema, correlation_id).await;
                (answer.result, answer.attempts, answer.state)
            }
            Err(err) => {
                warn!(error = %err, "Schema description unavailable");

                self.recorder
                    .record(
                        EventTag::Error,
                        Some(correlation_id),
                        json!({
                            "stage": "schema",
                            "kind": err.kind(),
                            "error": err.to_string(),
                        }),
                    )
                    .await;

                let raw = RawResult::Failed {
                    reason: FailureReason::SchemaUnavailable,
                };
                (raw, Vec::new(), self.counters().snapshot(0))
            }
        };

        // === HANDOFF ===
        let answer = self.handoff.send(raw, correlation_id).await;

        info!(
            correlation_id = %correlation_id,
            attempts = state.attempts_made,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline: answer produced"
        );

        AskOutcome {
            answer,
            correlation_id,
            attempts,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::generation::ScriptedGenerator;
    use crate::handoff::FALLBACK_ANSWER;
    use crate::models::{Event, SchemaDescription};
    use crate::store::SqliteQueryStore;
    use async_trait::async_trait;

    const NO_NAMES: &str = r#"{"names": []}"#;

    async fn demo_store() -> Arc<dyn QueryStore> {
        Arc::new(
            SqliteQueryStore::in_memory()
                .await
                .unwrap()
                .with_demo_data()
                .await
                .unwrap(),
        )
    }

    async fn pipeline_with(
        sql: Arc<ScriptedGenerator>,
        redaction: Arc<ScriptedGenerator>,
    ) -> QueryPipeline {
        QueryPipeline::from_config(
            &PipelineConfig::default(),
            sql,
            redaction,
            demo_store().await,
            EventRecorder::new(),
            Arc::new(AgentCounters::new()),
        )
    }

    fn tags(events: &[Event]) -> Vec<EventTag> {
        events.iter().map(|e| e.tag).collect()
    }

    #[tokio::test]
    async fn test_total_transactions() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT COUNT(*) AS total_transactions FROM transactions",
            ])),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
        )
        .await;

        let answer = pipeline.ask("How many total transactions?").await;
        assert!(answer.contains('6'), "{}", answer);
    }

    #[tokio::test]
    async fn test_add_on_revenue() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "```sql\nSELECT SUM(amount) AS revenue FROM transactions WHERE product_category = 'Add-ons';\n```",
            ])),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
        )
        .await;

        let answer = pipeline.ask("Total revenue from Add-ons?").await;
        assert!(answer.contains("300"), "{}", answer);
    }

    #[tokio::test]
    async fn test_customer_name_is_redacted() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT customer_id, full_name, segment FROM customers WHERE customer_id = 104",
            ])),
            Arc::new(ScriptedGenerator::repeating(r#"{"names": ["David Okafor"]}"#)),
        )
        .await;

        let answer = pipeline.ask("Who is customer 104?").await;
        assert!(answer.contains("[REDACTED_NAME]"), "{}", answer);
        assert!(!answer.contains("David"));
        assert!(!answer.contains("Okafor"));
        assert!(answer.contains("104"));
    }

    #[tokio::test]
    async fn test_customer_email_is_redacted() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT email FROM customers WHERE customer_id = 101",
            ])),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
        )
        .await;

        let answer = pipeline.ask("Email of customer 101?").await;
        assert!(answer.contains("[REDACTED_EMAIL]"), "{}", answer);
        assert!(!answer.contains("alice.johnson@example.com"));
        assert!(!answer.contains('@'));
    }

    #[tokio::test]
    async fn test_malformed_column_is_corrected_on_second_attempt() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT SUM(amout) AS revenue FROM transactions",
                "SELECT SUM(amount) AS revenue FROM transactions",
            ])),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
        )
        .await;

        let outcome = pipeline.ask_detailed("What is total revenue?").await;

        assert!(outcome.answer.contains("3050"), "{}", outcome.answer);
        assert_eq!(outcome.state.attempts_made, 2);
        assert_eq!(outcome.attempts.len(), 2);

        let events = pipeline.recorder().events_for(outcome.correlation_id).await;
        let errors_and_data: Vec<EventTag> = tags(&events)
            .into_iter()
            .filter(|t| matches!(t, EventTag::Error | EventTag::Data))
            .collect();
        assert_eq!(errors_and_data, vec![EventTag::Error, EventTag::Data]);

        assert_eq!(
            tags(&events),
            vec![
                EventTag::Thought,
                EventTag::Error,
                EventTag::Thought,
                EventTag::Data,
                EventTag::Handoff,
                EventTag::Handoff,
            ]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_fallback_without_sql_errors() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::repeating("SELECT revenue FROM sales")),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
        )
        .await;

        let outcome = pipeline.ask_detailed("Revenue by quarter?").await;

        assert_eq!(outcome.answer, FALLBACK_ANSWER);
        assert!(!outcome.answer.contains("no such table"));
        assert!(!outcome.answer.contains("SELECT"));
        assert_eq!(outcome.state.attempts_made, 3);
        assert!(outcome.state.attempts_made <= PipelineConfig::default().max_retries);
    }

    #[tokio::test]
    async fn test_redaction_outage_never_leaks_names() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT full_name, email FROM customers ORDER BY customer_id",
            ])),
            Arc::new(ScriptedGenerator::unavailable()),
        )
        .await;

        let outcome = pipeline.ask_detailed("List all customers").await;

        for raw in ["Alice", "Johnson", "Okafor", "Haddad", "@example"] {
            assert!(!outcome.answer.contains(raw), "{} leaked: {}", raw, outcome.answer);
        }
        assert!(outcome.answer.contains("[REDACTED_NAME]"));

        let events = pipeline.recorder().events_for(outcome.correlation_id).await;
        assert!(events
            .iter()
            .any(|e| e.tag == EventTag::Error && e.payload["stage"] == "redaction"));
    }

    #[tokio::test]
    async fn test_data_events_never_carry_row_values() {
        let pipeline = pipeline_with(
            Arc::new(ScriptedGenerator::new([
                "SELECT full_name, email FROM customers WHERE customer_id = 101",
            ])),
            Arc::new(ScriptedGenerator::repeating(r#"{"names": ["Alice Johnson"]}"#)),
        )
        .await;

        let outcome = pipeline.ask_detailed("Who is 101?").await;
        let events = pipeline.recorder().events_for(outcome.correlation_id).await;

        let data = events.iter().find(|e| e.tag == EventTag::Data).unwrap();
        let serialized = data.payload.to_string();
        assert!(!serialized.contains("Alice"));
        assert!(!serialized.contains("alice.johnson@example.com"));
        assert_eq!(data.payload["row_count"], 1);
        assert_eq!(data.payload["columns"], json!(["full_name", "email"]));
    }

    struct BrokenStore;

    #[async_trait]
    impl QueryStore for BrokenStore {
        async fn execute(
            &self,
            _sql: &str,
        ) -> std::result::Result<crate::models::RowSet, crate::error::QueryError> {
            Err(crate::error::QueryError::new("disk I/O error"))
        }

        async fn describe_schema(&self) -> crate::Result<SchemaDescription> {
            Err(PipelineError::Schema("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_schema_failure_degrades_to_fallback() {
        let sql = Arc::new(ScriptedGenerator::new(["SELECT 1"]));
        let pipeline = QueryPipeline::from_config(
            &PipelineConfig::default(),
            sql.clone(),
            Arc::new(ScriptedGenerator::repeating(NO_NAMES)),
            Arc::new(BrokenStore),
            EventRecorder::new(),
            Arc::new(AgentCounters::new()),
        );

        let outcome = pipeline.ask_detailed("How many?").await;

        assert_eq!(outcome.answer, FALLBACK_ANSWER);
        assert!(!outcome.answer.contains("locked"));
        assert!(sql.prompts().is_empty());
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_counters_without_loss() {
        let sql = Arc::new(ScriptedGenerator::repeating(
            "SELECT COUNT(*) AS total FROM transactions",
        ));
        let pipeline = Arc::new(
            pipeline_with(sql, Arc::new(ScriptedGenerator::repeating(NO_NAMES))).await,
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let pipeline = pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.ask_detailed(&format!("How many transactions? #{}", i)).await
            }));
        }

        let mut correlations = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(outcome.answer.contains('6'));
            correlations.push(outcome.correlation_id);
        }

        assert_eq!(pipeline.counters().queries_run(), 10);
        assert_eq!(pipeline.counters().errors_encountered(), 0);

        for correlation in correlations {
            let events = pipeline.recorder().events_for(correlation).await;
            assert_eq!(
                tags(&events),
                vec![EventTag::Thought, EventTag::Data, EventTag::Handoff, EventTag::Handoff]
            );
        }
    }
}
