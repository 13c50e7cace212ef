//! Destructive DDL: `DROP TABLE`, `DROP COLUMN`, `TRUNCATE`.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::Detector;
use crate::diagnostics::{Code, Diagnostic, ErrorCode, ValidationError};
use crate::sql_parser::strip_line_comments;

static DROP_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDROP\s+TABLE\b").expect("valid regex"));

static DROP_COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bDROP\s+COLUMN\b").expect("valid regex"));

static TRUNCATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bTRUNCATE\b").expect("valid regex"));

/// Flags statements that irreversibly remove data.
///
/// Works line by line after stripping comments on each line. Every match
/// yields its own error, so a line with two `DROP TABLE`s reports twice.
pub struct DestructiveOperations;

const CODES: &[Code] = &[
    Code::Error(ErrorCode::DropTable),
    Code::Error(ErrorCode::DropColumn),
    Code::Error(ErrorCode::Truncate),
];

impl Detector for DestructiveOperations {
    fn name(&self) -> &'static str {
        "destructive-operations"
    }

    fn codes(&self) -> &'static [Code] {
        CODES
    }

    fn detect(&self, sql: &str) -> Vec<Diagnostic> {
        detect_destructive_operations(sql)
            .into_iter()
            .map(Diagnostic::from)
            .collect()
    }
}

/// Scan for destructive operations, returning one error per match.
pub fn detect_destructive_operations(sql: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (idx, raw_line) in sql.lines().enumerate() {
        let line = strip_line_comments(raw_line);
        let line_no = idx + 1;

        let mut found: Vec<(usize, ErrorCode)> = Vec::new();
        found.extend(DROP_TABLE_RE.find_iter(&line).map(|m| (m.start(), ErrorCode::DropTable)));
        found.extend(DROP_COLUMN_RE.find_iter(&line).map(|m| (m.start(), ErrorCode::DropColumn)));
        found.extend(TRUNCATE_RE.find_iter(&line).map(|m| (m.start(), ErrorCode::Truncate)));
        found.sort_by_key(|(pos, _)| *pos);

        for (_, code) in found {
            errors.push(error_for(code, line_no));
        }
    }

    errors
}

fn error_for(code: ErrorCode, line: usize) -> ValidationError {
    let (message, suggestion) = match code {
        ErrorCode::DropTable => (
            "DROP TABLE detected: the table and all of its rows will be permanently deleted",
            "Rename the table or move its data to an archive table first, and keep a down migration that recreates it",
        ),
        ErrorCode::DropColumn => (
            "DROP COLUMN detected: the column data will be permanently deleted",
            "Stop reading the column in application code first, back up its data, then drop it in a later migration",
        ),
        ErrorCode::Truncate => (
            "TRUNCATE detected: every row in the table will be deleted",
            "Use a targeted DELETE with a WHERE clause, or confirm a backup exists before truncating",
        ),
    };
    ValidationError {
        code,
        message: format!("{} (line {})", message, line),
        line: Some(line),
        suggestion: Some(suggestion.to_string()),
    }
}
