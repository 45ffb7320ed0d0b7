//! Deterministic PII detectors
//!
//! Email matching (stage 1), literal name-span matching for names reported by
//! the recognition stage, and the stricter heuristic used when recognition is
//! unavailable. All detectors skip text that is already a placeholder, so
//! re-running them over their own output finds nothing.

use crate::models::{RedactionCategory, RedactionFinding};
use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;

// Literal patterns: `expect` can only fire on a typo, which the tests catch.
lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"[\p{L}\p{N}._%+\-]+@[\p{L}\p{N}\-]+(?:\.[\p{L}\p{N}\-]+)*\.\p{L}{2,}")
            .expect("email pattern compiles");

    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\[REDACTED_[A-Z_]+\]").expect("placeholder pattern compiles");

    /// Two or more adjacent capitalized words: "Alice Johnson", "Mary-Jane O'Neil".
    static ref CAPITALIZED_SPAN_REGEX: Regex = Regex::new(
        r"\b\p{Lu}\p{Ll}*(?:['\-]\p{Lu}?\p{Ll}+)*(?:[ \t]+\p{Lu}\p{Ll}*(?:['\-]\p{Lu}?\p{Ll}+)*)+\b"
    )
    .expect("capitalized span pattern compiles");
}

/// Stage 1: replace every email address. Finding spans index into `text`.
pub fn redact_emails(text: &str) -> (String, Vec<RedactionFinding>) {
    let findings: Vec<RedactionFinding> = EMAIL_REGEX
        .find_iter(text)
        .map(|m| finding(m.range(), RedactionCategory::Email))
        .collect();

    (apply_findings(text, &findings), findings)
}

/// Locate each reported name in `text` on word boundaries. Numeric-only
/// entries, entries containing placeholder brackets, and matches overlapping
/// a placeholder or an earlier match are ignored.
pub fn find_name_spans(text: &str, names: &[String]) -> Vec<RedactionFinding> {
    let mut candidates: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| n.chars().any(char::is_alphabetic))
        .filter(|n| !n.contains('[') && !n.contains(']'))
        .collect();
    // longest first so "Alice Johnson" wins over "Alice"
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    candidates.dedup();

    let mut taken = placeholder_spans(text);
    let mut findings = Vec::new();

    for name in candidates {
        let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(name))) else {
            continue;
        };

        for m in pattern.find_iter(text) {
            let range = m.range();
            if overlaps_any(&range, &taken) {
                continue;
            }
            taken.push(range.clone());
            findings.push(finding(range, RedactionCategory::PersonName));
        }
    }

    findings.sort_by_key(|f| f.start);
    findings
}

/// Fail-closed heuristic used when contextual recognition is unavailable:
/// every non-numeric cell under a table column whose header mentions "name",
/// plus every remaining capitalized multi-word span.
pub fn fallback_name_spans(text: &str) -> Vec<RedactionFinding> {
    let mut taken = placeholder_spans(text);
    let mut findings = Vec::new();

    for range in name_column_cells(text) {
        if overlaps_any(&range, &taken) {
            continue;
        }
        taken.push(range.clone());
        findings.push(finding(range, RedactionCategory::PersonName));
    }

    for m in CAPITALIZED_SPAN_REGEX.find_iter(text) {
        let range = m.range();
        if overlaps_any(&range, &taken) {
            continue;
        }
        taken.push(range.clone());
        findings.push(finding(range, RedactionCategory::PersonName));
    }

    findings.sort_by_key(|f| f.start);
    findings
}

/// Replace non-overlapping findings (sorted or not) with their replacements.
pub fn apply_findings(text: &str, findings: &[RedactionFinding]) -> String {
    let mut ordered: Vec<&RedactionFinding> = findings.iter().collect();
    ordered.sort_by_key(|f| f.start);

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for f in ordered {
        if f.start < cursor || f.end > text.len() {
            continue;
        }
        out.push_str(&text[cursor..f.start]);
        out.push_str(&f.replacement);
        cursor = f.end;
    }
    out.push_str(&text[cursor..]);

    out
}

fn finding(range: Range<usize>, category: RedactionCategory) -> RedactionFinding {
    RedactionFinding {
        start: range.start,
        end: range.end,
        category,
        replacement: category.placeholder().to_string(),
    }
}

fn placeholder_spans(text: &str) -> Vec<Range<usize>> {
    PLACEHOLDER_REGEX.find_iter(text).map(|m| m.range()).collect()
}

fn overlaps_any(range: &Range<usize>, taken: &[Range<usize>]) -> bool {
    taken
        .iter()
        .any(|t| range.start < t.end && t.start < range.end)
}

/// Byte ranges of cells in name-bearing columns of pipe tables:
///
/// ```text
/// | customer_id | full_name     |
/// |---|---|
/// | 104         | David Okafor  |
/// ```
fn name_column_cells(text: &str) -> Vec<Range<usize>> {
    let mut cells = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut name_columns: Vec<usize> = Vec::new();
    let mut in_body = false;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end_matches(['\n', '\r']);

        if !trimmed.trim_start().starts_with('|') {
            header = None;
            name_columns.clear();
            in_body = false;
            continue;
        }

        let row = pipe_cells(trimmed);

        if in_body {
            for (index, range) in row.into_iter().enumerate() {
                if !name_columns.contains(&index) {
                    continue;
                }
                let value = &trimmed[range.clone()];
                if is_redactable_cell(value) {
                    cells.push(line_start + range.start..line_start + range.end);
                }
            }
            continue;
        }

        let values: Vec<String> = row.iter().map(|r| trimmed[r.clone()].to_string()).collect();

        match header.take() {
            Some(columns) if is_separator(&values) => {
                name_columns = columns
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.to_lowercase().contains("name"))
                    .map(|(i, _)| i)
                    .collect();
                in_body = true;
            }
            _ => header = Some(values),
        }
    }

    cells
}

/// Trimmed content ranges of the cells of one `| a | b |` line.
fn pipe_cells(line: &str) -> Vec<Range<usize>> {
    let pipes: Vec<usize> = line.match_indices('|').map(|(i, _)| i).collect();

    pipes
        .windows(2)
        .map(|pair| {
            let (start, end) = (pair[0] + 1, pair[1]);
            let raw = &line[start..end];
            let lead = raw.len() - raw.trim_start().len();
            let trail = raw.len() - raw.trim_end().len();
            if lead + trail >= raw.len() {
                start..start
            } else {
                start + lead..end - trail
            }
        })
        .collect()
}

fn is_separator(values: &[String]) -> bool {
    !values.is_empty()
        && values
            .iter()
            .all(|v| !v.is_empty() && v.chars().all(|c| c == '-' || c == ':'))
}

fn is_redactable_cell(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && value.chars().any(char::is_alphabetic)
        && !PLACEHOLDER_REGEX.is_match(value)
}
