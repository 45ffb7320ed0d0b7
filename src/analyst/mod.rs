//! Analyst agent - self-correcting SQL loop
//!
//! DRAFTING → EXECUTING → {SUCCEEDED, RETRYING → DRAFTING, EXHAUSTED}
//!
//! Every failed attempt is fed back into the next drafting prompt with the
//! engine's literal error text. The loop is bounded by `max_retries`.

pub mod prompt;
pub mod sql;

use crate::audit::EventRecorder;
use crate::generation::{GenerationOptions, GenerationPort};
use crate::error::QueryError;
use crate::handoff::render_raw_result;
use crate::models::{
    AgentState, AttemptOutcome, AttemptRecord, EventTag, FailureReason, Question, RawResult,
    RowSet, SchemaDescription,
};
use crate::store::QueryStore;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use prompt::build_sql_prompt;

/// Lifetime counters shared by every request that goes through one
/// analyst. Each update belongs to an attempt that has already finished.
#[derive(Debug, Default)]
pub struct AgentCounters {
    queries_run: AtomicU64,
    errors_encountered: AtomicU64,
}

impl AgentCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) -> u64 {
        self.queries_run.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_error(&self) -> u64 {
        self.errors_encountered.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn queries_run(&self) -> u64 {
        self.queries_run.load(Ordering::SeqCst)
    }

    pub fn errors_encountered(&self) -> u64 {
        self.errors_encountered.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, attempts_made: u32) -> AgentState {
        AgentState {
            attempts_made,
            queries_run: self.queries_run(),
            errors_encountered: self.errors_encountered(),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Drafting,
    Executing(String),
    Succeeded(RowSet),
    Retrying,
    Exhausted,
}

/// Result of one `answer` call. `attempts.len() == state.attempts_made`.
#[derive(Debug, Clone)]
pub struct AnalystAnswer {
    pub result: RawResult,
    pub attempts: Vec<AttemptRecord>,
    pub state: AgentState,
}

impl AnalystAnswer {
    /// Unredacted text form of the result. Only the compliance side of the
    /// handoff should ever show this to anyone.
    pub fn final_text(&self) -> String {
        render_raw_result(&self.result)
    }
}

pub struct AnalystAgent {
    generator: Arc<dyn GenerationPort>,
    store: Arc<dyn QueryStore>,
    recorder: EventRecorder,
    counters: Arc<AgentCounters>,
    max_retries: u32,
    options: GenerationOptions,
}

impl AnalystAgent {
    pub fn new(
        generator: Arc<dyn GenerationPort>,
        store: Arc<dyn QueryStore>,
        recorder: EventRecorder,
        counters: Arc<AgentCounters>,
        max_retries: u32,
    ) -> Self {
        Self {
            generator,
            store,
            recorder,
            counters,
            max_retries: max_retries.max(1),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn counters(&self) -> &Arc<AgentCounters> {
        &self.counters
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run the bounded drafting/execution loop for one question.
    pub async fn answer(
        &self,
        question: &Question,
        schema: &SchemaDescription,
        correlation_id: Uuid,
    ) -> AnalystAnswer {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut phase = Phase::Drafting;

        info!(
            correlation_id = %correlation_id,
            max_retries = self.max_retries,
            "Analyst: starting"
        );

        loop {
            let attempt = attempts.len() as u32 + 1;

            phase = match phase {
                // === DRAFTING ===
                Phase::Drafting => {
                    let prompt = build_sql_prompt(question, schema, &attempts);

                    match self.generator.complete(&prompt, &self.options).await {
                        Ok(response) => {
                            let candidate = sql::extract_sql(&response).unwrap_or_default();
                            debug!(attempt, sql = %candidate, "Drafted SQL");

                            self.recorder
                                .record(
                                    EventTag::Thought,
                                    Some(correlation_id),
                                    json!({ "attempt": attempt, "sql": candidate }),
                                )
                                .await;

                            Phase::Executing(candidate)
                        }
                        Err(err) => {
                            self.counters.record_error();
                            warn!(attempt, error = %err, "Generation failed while drafting");

                            self.recorder
                                .record(
                                    EventTag::Error,
                                    Some(correlation_id),
                                    json!({
                                        "attempt": attempt,
                                        "stage": "drafting",
                                        "kind": err.kind(),
                                        "error": err.to_string(),
                                    }),
                                )
                                .await;

                            return self.finish(
                                RawResult::Failed {
                                    reason: FailureReason::GenerationUnavailable,
                                },
                                attempts,
                            );
                        }
                    }
                }

                // === EXECUTING ===
                Phase::Executing(candidate) => match self.execute_candidate(&candidate).await {
                    Ok(rows) => {
                        self.counters.record_query();
                        attempts.push(AttemptRecord {
                            attempt,
                            sql: candidate,
                            outcome: AttemptOutcome::Success {
                                row_count: rows.row_count(),
                            },
                            recorded_at: Utc::now(),
                        });
                        Phase::Succeeded(rows)
                    }
                    Err(err) => {
                        attempts.push(AttemptRecord {
                            attempt,
                            sql: candidate,
                            outcome: AttemptOutcome::Failed {
                                error: err.message.clone(),
                            },
                            recorded_at: Utc::now(),
                        });
                        self.counters.record_error();

                        warn!(attempt, error = %err, "Query failed");

                        self.recorder
                            .record(
                                EventTag::Error,
                                Some(correlation_id),
                                json!({
                                    "attempt": attempt,
                                    "stage": "executing",
                                    "kind": "query_error",
                                    "error": err.message,
                                }),
                            )
                            .await;

                        if (attempts.len() as u32) < self.max_retries {
                            Phase::Retrying
                        } else {
                            Phase::Exhausted
                        }
                    }
                },

                // === SUCCEEDED ===
                Phase::Succeeded(rows) => {
                    self.recorder
                        .record(
                            EventTag::Data,
                            Some(correlation_id),
                            json!({
                                "attempt": attempts.len(),
                                "row_count": rows.row_count(),
                                "columns": rows.columns,
                                "digest": self.recorder.digest(&rows),
                            }),
                        )
                        .await;

                    info!(
                        correlation_id = %correlation_id,
                        attempts = attempts.len(),
                        row_count = rows.row_count(),
                        "Analyst: query succeeded"
                    );

                    return self.finish(RawResult::Rows(rows), attempts);
                }

                // === RETRYING ===
                Phase::Retrying => {
                    debug!(next_attempt = attempt, "Retrying with error context");
                    Phase::Drafting
                }

                // === EXHAUSTED ===
                Phase::Exhausted => {
                    warn!(
                        correlation_id = %correlation_id,
                        attempts = attempts.len(),
                        "Analyst: retries exhausted"
                    );

                    return self.finish(
                        RawResult::Failed {
                            reason: FailureReason::RetriesExhausted,
                        },
                        attempts,
                    );
                }
            };
        }
    }

    async fn execute_candidate(&self, candidate: &str) -> Result<RowSet, QueryError> {
        if candidate.is_empty() {
            return Err(QueryError::new("the response did not contain an SQL statement"));
        }
        sql::ensure_read_only(candidate)?;
        self.store.execute(candidate).await
    }

    fn finish(&self, result: RawResult, attempts: Vec<AttemptRecord>) -> AnalystAnswer {
        let state = self.counters.snapshot(attempts.len() as u32);
        AnalystAnswer {
            result,
            attempts,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use crate::store::SqliteQueryStore;

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

    async fn agent_with(
        generator: Arc<ScriptedGenerator>,
        recorder: EventRecorder,
        counters: Arc<AgentCounters>,
    ) -> AnalystAgent {
        AnalystAgent::new(generator, demo_store().await, recorder, counters, 3)
    }

    fn tags(events: &[crate::models::Event]) -> Vec<EventTag> {
        events.iter().map(|e| e.tag).collect()
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let generator = Arc::new(ScriptedGenerator::new([
            "SELECT COUNT(*) AS total FROM transactions",
        ]));
        let recorder = EventRecorder::new();
        let agent = agent_with(generator, recorder.clone(), Arc::new(AgentCounters::new())).await;
        let schema = agent.store.describe_schema().await.unwrap();
        let correlation = Uuid::new_v4();

        let answer = agent
            .answer(&Question::new("How many total transactions?"), &schema, correlation)
            .await;

        assert!(matches!(answer.result, RawResult::Rows(ref rows) if rows.rows[0][0] == json!(6)));
        assert_eq!(answer.attempts.len(), 1);
        assert_eq!(answer.state.attempts_made, 1);
        assert_eq!(answer.state.queries_run, 1);
        assert_eq!(answer.state.errors_encountered, 0);
        assert!(answer.final_text().contains('6'));

        let events = recorder.events_for(correlation).await;
        assert_eq!(tags(&events), vec![EventTag::Thought, EventTag::Data]);
    }

    #[tokio::test]
    async fn test_error_text_is_fed_into_retry_prompt() {
        let generator = Arc::new(ScriptedGenerator::new([
            "SELECT SUM(amout) FROM transactions",
            "SELECT SUM(amount) AS revenue FROM transactions",
        ]));
        let recorder = EventRecorder::new();
        let agent =
            agent_with(generator.clone(), recorder.clone(), Arc::new(AgentCounters::new())).await;
        let schema = agent.store.describe_schema().await.unwrap();
        let correlation = Uuid::new_v4();

        let answer = agent
            .answer(&Question::new("Total revenue?"), &schema, correlation)
            .await;

        assert!(matches!(answer.result, RawResult::Rows(_)));
        assert_eq!(answer.state.attempts_made, 2);
        assert_eq!(answer.state.errors_encountered, 1);
        assert!(answer.attempts[0].error().unwrap().contains("no such column"));
        assert!(answer.attempts[1].error().is_none());

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("no such column"));
        assert!(prompts[1].contains("no such column: amout"));
        assert!(prompts[1].contains("SELECT SUM(amout) FROM transactions"));

        let events = recorder.events_for(correlation).await;
        assert_eq!(
            tags(&events),
            vec![EventTag::Thought, EventTag::Error, EventTag::Thought, EventTag::Data]
        );
        assert_eq!(events[1].payload["attempt"], 1);
    }

    #[tokio::test]
    async fn test_exhaustion_stops_at_max_retries() {
        let generator = Arc::new(ScriptedGenerator::repeating("SELECT nope FROM transactions"));
        let recorder = EventRecorder::new();
        let agent =
            agent_with(generator.clone(), recorder.clone(), Arc::new(AgentCounters::new())).await;
        let schema = agent.store.describe_schema().await.unwrap();
        let correlation = Uuid::new_v4();

        let answer = agent
            .answer(&Question::new("Anything?"), &schema, correlation)
            .await;

        assert_eq!(
            answer.result,
            RawResult::Failed {
                reason: FailureReason::RetriesExhausted
            }
        );
        assert_eq!(answer.attempts.len(), 3);
        assert_eq!(answer.state.attempts_made, 3);
        assert_eq!(answer.state.queries_run, 0);
        assert_eq!(answer.state.errors_encountered, 3);
        assert_eq!(generator.prompts().len(), 3);
        assert!(!answer.final_text().contains("no such column"));

        let errors = recorder
            .events_for(correlation)
            .await
            .into_iter()
            .filter(|e| e.tag == EventTag::Error)
            .count();
        assert_eq!(errors, 3);
    }

    #[tokio::test]
    async fn test_write_statements_count_as_failed_attempts() {
        let generator = Arc::new(ScriptedGenerator::new([
            "DELETE FROM customers",
            "SELECT COUNT(*) AS total FROM customers",
        ]));
        let agent = agent_with(generator, EventRecorder::new(), Arc::new(AgentCounters::new())).await;
        let schema = agent.store.describe_schema().await.unwrap();

        let answer = agent
            .answer(&Question::new("Remove everyone"), &schema, Uuid::new_v4())
            .await;

        assert_eq!(answer.state.attempts_made, 2);
        assert!(answer.attempts[0].error().unwrap().contains("read-only"));
        assert!(matches!(answer.result, RawResult::Rows(ref rows) if rows.rows[0][0] == json!(6)));
    }

    #[tokio::test]
    async fn test_generation_outage_is_terminal() {
        let generator = Arc::new(ScriptedGenerator::unavailable());
        let recorder = EventRecorder::new();
        let agent = agent_with(generator, recorder.clone(), Arc::new(AgentCounters::new())).await;
        let schema = agent.store.describe_schema().await.unwrap();
        let correlation = Uuid::new_v4();

        let answer = agent
            .answer(&Question::new("How many?"), &schema, correlation)
            .await;

        assert_eq!(
            answer.result,
            RawResult::Failed {
                reason: FailureReason::GenerationUnavailable
            }
        );
        assert!(answer.attempts.is_empty());
        assert_eq!(answer.state.errors_encountered, 1);

        let events = recorder.events_for(correlation).await;
        assert_eq!(tags(&events), vec![EventTag::Error]);
        assert_eq!(events[0].payload["kind"], "generation_unavailable");
    }

    #[tokio::test]
    async fn test_counters_are_shared_across_requests() {
        let counters = Arc::new(AgentCounters::new());
        let generator = Arc::new(ScriptedGenerator::new([
            "SELECT bad FROM transactions",
            "SELECT COUNT(*) FROM transactions",
            "SELECT COUNT(*) FROM customers",
        ]));
        let agent = agent_with(generator, EventRecorder::new(), counters.clone()).await;
        let schema = agent.store.describe_schema().await.unwrap();

        let first = agent
            .answer(&Question::new("q1"), &schema, Uuid::new_v4())
            .await;
        let second = agent
            .answer(&Question::new("q2"), &schema, Uuid::new_v4())
            .await;

        assert_eq!(first.state.attempts_made, 2);
        assert_eq!(second.state.attempts_made, 1);
        assert_eq!(second.state.queries_run, 2);
        assert_eq!(second.state.errors_encountered, 1);
        assert_eq!(counters.queries_run(), 2);
    }

    #[test]
    fn test_counter_updates_return_new_totals() {
        let counters = AgentCounters::new();
        assert_eq!(counters.record_query(), 1);
        assert_eq!(counters.record_error(), 1);
        assert_eq!(counters.snapshot(0).queries_run, 1);
    }
}
