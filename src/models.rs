//! Core data models for the query pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Question =================
//

/// Natural-language question supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//
// ================= Schema =================
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Business term mapped onto an SQL expression, e.g. "Revenue" → `SUM(transactions.amount)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticAlias {
    pub term: String,
    pub expression: String,
}

/// Join path `from_table.from_column = to_table.to_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Read-only description of the store, obtained once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
    pub aliases: Vec<SemanticAlias>,
    pub relationships: Vec<Relationship>,
}

impl SchemaDescription {
    /// Render the schema as prompt text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("TABLES:\n");
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            out.push_str(&format!("- {}({})\n", table.name, columns.join(", ")));
        }

        if !self.relationships.is_empty() {
            out.push_str("\nRELATIONSHIPS:\n");
            for rel in &self.relationships {
                out.push_str(&format!(
                    "- {}.{} = {}.{}\n",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column
                ));
            }
        }

        if !self.aliases.is_empty() {
            out.push_str("\nSEMANTIC ALIASES:\n");
            for alias in &self.aliases {
                out.push_str(&format!("- \"{}\" means {}\n", alias.term, alias.expression));
            }
        }

        out
    }
}

//
// ================= Rows =================
//

/// Tabular result of a successful query. Cells are JSON scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl RowSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

//
// ================= Attempts =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success { row_count: usize },
    Failed { error: String },
}

/// One drafting/execution cycle of the analyst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index within the request.
    pub attempt: u32,
    pub sql: String,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Failed { error } => Some(error),
            AttemptOutcome::Success { .. } => None,
        }
    }
}

/// Counters reported back to the caller after a request.
///
/// `attempts_made` is per request; the other two are lifetime totals of the
/// shared counters at the moment the request finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub attempts_made: u32,
    pub queries_run: u64,
    pub errors_encountered: u64,
}

//
// ================= Raw Result =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RetriesExhausted,
    GenerationUnavailable,
    SchemaUnavailable,
}

/// Output of the analyst, handed across the compliance boundary exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawResult {
    Rows(RowSet),
    Failed { reason: FailureReason },
}

//
// ================= Redaction =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedactionCategory {
    Email,
    PersonName,
}

impl RedactionCategory {
    /// Fixed replacement token for this category.
    pub fn placeholder(self) -> &'static str {
        match self {
            RedactionCategory::Email => "[REDACTED_EMAIL]",
            RedactionCategory::PersonName => "[REDACTED_NAME]",
        }
    }
}

impl fmt::Display for RedactionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RedactionCategory::Email => "EMAIL",
            RedactionCategory::PersonName => "PERSON_NAME",
        };
        write!(f, "{}", s)
    }
}

/// A span found by a redaction stage. `start..end` are byte offsets into the
/// text that stage scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionFinding {
    pub start: usize,
    pub end: usize,
    pub category: RedactionCategory,
    pub replacement: String,
}

//
// ================= Events =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventTag {
    Thought,
    Handoff,
    Error,
    Data,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventTag::Thought => "THOUGHT",
            EventTag::Handoff => "HANDOFF",
            EventTag::Error => "ERROR",
            EventTag::Data => "DATA",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dense, gap-free position in the recorder.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub tag: EventTag,
    pub correlation_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

//
// ================= Final Result =================
//

/// Everything a caller may see about one `ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskOutcome {
    pub answer: String,
    pub correlation_id: Uuid,
    pub attempts: Vec<AttemptRecord>,
    pub state: AgentState,
}
