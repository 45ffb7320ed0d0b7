//! Candidate SQL handling: pull the statement out of a model response and
//! refuse anything that is not a single read-only query.

use crate::error::QueryError;

const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "pragma",
    "vacuum", "reindex", "truncate",
];

/// Strip markdown fences, a leading `SQL:` label, and trailing semicolons.
/// Returns `None` when nothing is left.
pub fn extract_sql(response: &str) -> Option<String> {
    let mut text = response.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        // skip the info string (```sql, ```sqlite, ...)
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        text = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
    }

    let mut text = text.trim();
    if text.get(..4).is_some_and(|label| label.eq_ignore_ascii_case("sql:")) {
        text = text[4..].trim();
    }

    let sql = text.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

/// Accept exactly one `SELECT`/`WITH` statement containing no write keyword
/// outside of string literals.
pub fn ensure_read_only(sql: &str) -> Result<(), QueryError> {
    let words = unquoted_words(sql)?;

    match words.first().map(String::as_str) {
        Some("select") | Some("with") => {}
        _ => {
            return Err(QueryError::new(
                "only read-only SELECT statements are permitted",
            ))
        }
    }

    if let Some(keyword) = words.iter().find(|w| WRITE_KEYWORDS.contains(&w.as_str())) {
        return Err(QueryError::new(format!(
            "statement contains forbidden keyword {}",
            keyword.to_uppercase()
        )));
    }

    // REPLACE(x, a, b) is a string function; only REPLACE INTO writes
    if words.windows(2).any(|pair| pair[0] == "replace" && pair[1] == "into") {
        return Err(QueryError::new(
            "statement contains forbidden keyword REPLACE",
        ));
    }

    Ok(())
}

/// Lower-cased identifier-like words outside quotes. A `;` outside quotes
/// means more than one statement.
fn unquoted_words(sql: &str) -> Result<Vec<String>, QueryError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in sql.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                flush_word(&mut current, &mut words);
                quote = Some(c);
            }
            ';' => {
                return Err(QueryError::new("multiple statements are not permitted"));
            }
            c if c.is_alphanumeric() || c == '_' => current.push(c.to_ascii_lowercase()),
            _ => flush_word(&mut current, &mut words),
        }
    }
    flush_word(&mut current, &mut words);

    Ok(words)
}

fn flush_word(current: &mut String, words: &mut Vec<String>) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_and_fenced_sql() {
        assert_eq!(
            extract_sql("SELECT COUNT(*) FROM transactions;").as_deref(),
            Some("SELECT COUNT(*) FROM transactions")
        );
        assert_eq!(
            extract_sql("```sql\nSELECT 1;\n```").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(
            extract_sql("Here you go:\n```\nSELECT 2\n```\nThanks").as_deref(),
            Some("SELECT 2")
        );
        assert_eq!(extract_sql("SQL: SELECT 3").as_deref(), Some("SELECT 3"));
    }

    #[test]
    fn test_extract_empty_response() {
        assert_eq!(extract_sql(""), None);
        assert_eq!(extract_sql("```sql\n```"), None);
        assert_eq!(extract_sql(" ;; "), None);
    }

    #[test]
    fn test_read_only_accepts_selects() {
        assert!(ensure_read_only("SELECT * FROM customers").is_ok());
        assert!(ensure_read_only(
            "WITH t AS (SELECT amount FROM transactions) SELECT SUM(amount) FROM t"
        )
        .is_ok());
        // keywords inside literals are data
        assert!(ensure_read_only("SELECT * FROM notes WHERE body = 'drop; delete'").is_ok());
    }

    #[test]
    fn test_read_only_accepts_replace_function() {
        assert!(ensure_read_only("SELECT REPLACE(segment, '-', ' ') AS seg FROM customers").is_ok());
        assert!(ensure_read_only("select replace(full_name,'a','b') from customers").is_ok());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        assert!(ensure_read_only("DELETE FROM customers").is_err());
        assert!(ensure_read_only("SELECT 1; DROP TABLE customers").is_err());
        assert!(ensure_read_only(
            "WITH t AS (SELECT 1) DELETE FROM customers"
        )
        .is_err());
        assert!(ensure_read_only(
            "WITH t AS (SELECT 1 AS id) REPLACE INTO customers (customer_id) SELECT id FROM t"
        )
        .is_err());
        assert!(ensure_read_only("").is_err());
    }
}
