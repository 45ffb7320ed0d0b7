//! Drafting prompt construction
//!
//! `(question, schema, history) -> prompt`, with no I/O.

use crate::models::{AttemptOutcome, AttemptRecord, Question, SchemaDescription};

/// Build the SQL drafting prompt. On retries the full attempt history is
/// included and the most recent engine error is repeated verbatim.
pub fn build_sql_prompt(
    question: &Question,
    schema: &SchemaDescription,
    history: &[AttemptRecord],
) -> String {
    let mut prompt = format!(
        r#"You are a data analyst that writes SQLite queries.

Translate the QUESTION into exactly ONE read-only SQLite SELECT statement
over the schema below.

SCHEMA:
{}
QUESTION:
{}

Rules:
- Use only tables and columns listed in SCHEMA
- Expand semantic aliases into their SQL expressions
- Give every computed column a short alias
- Return ONLY the SQL statement
- No explanation text
"#,
        schema.render(),
        question.as_str(),
    );

    if history.is_empty() {
        return prompt;
    }

    prompt.push_str("\nPREVIOUS ATTEMPTS:\n");
    for record in history {
        let outcome = match &record.outcome {
            AttemptOutcome::Failed { error } => format!("FAILED: {}", error),
            AttemptOutcome::Success { row_count } => format!("OK ({} rows)", row_count),
        };
        prompt.push_str(&format!(
            "Attempt {}:\n{}\n-> {}\n",
            record.attempt, record.sql, outcome
        ));
    }

    if let Some(last_error) = history.iter().rev().find_map(AttemptRecord::error) {
        prompt.push_str(&format!(
            "\nThe last query failed with this database error:\n{}\n\
             Fix the query so that it runs. Generate a DIFFERENT statement.\n",
            last_error
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSchema, TableSchema};
    use chrono::Utc;

    fn schema() -> SchemaDescription {
        SchemaDescription {
            tables: vec![TableSchema {
                name: "transactions".to_string(),
                columns: vec![ColumnSchema {
                    name: "amount".to_string(),
                    data_type: "REAL".to_string(),
                }],
            }],
            ..Default::default()
        }
    }

    fn failed(attempt: u32, sql: &str, error: &str) -> AttemptRecord {
        AttemptRecord {
            attempt,
            sql: sql.to_string(),
            outcome: AttemptOutcome::Failed {
                error: error.to_string(),
            },
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_attempt_prompt_has_question_and_schema_only() {
        let prompt = build_sql_prompt(
            &Question::new("How many total transactions?"),
            &schema(),
            &[],
        );

        assert!(prompt.contains("How many total transactions?"));
        assert!(prompt.contains("transactions(amount REAL)"));
        assert!(!prompt.contains("PREVIOUS ATTEMPTS"));
    }

    #[test]
    fn test_retry_prompt_carries_full_history_and_last_error() {
        let history = vec![
            failed(1, "SELECT amout FROM transactions", "no such column: amout"),
            failed(2, "SELECT amnt FROM transactions", "no such column: amnt"),
        ];

        let prompt = build_sql_prompt(&Question::new("Total revenue?"), &schema(), &history);

        assert!(prompt.contains("Attempt 1:\nSELECT amout FROM transactions"));
        assert!(prompt.contains("Attempt 2:\nSELECT amnt FROM transactions"));
        assert!(prompt.contains("failed with this database error:\nno such column: amnt"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let history = vec![failed(1, "SELECT x", "no such column: x")];
        let question = Question::new("Total revenue?");

        assert_eq!(
            build_sql_prompt(&question, &schema(), &history),
            build_sql_prompt(&question, &schema(), &history)
        );
    }
}
