//! Column type changes without an explicit `USING` cast.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::Detector;
use crate::diagnostics::{Code, Diagnostic, ValidationWarning, WarningCode};
use crate::sql_parser::{
    blank_comments, line_number_at, normalize_identifier, statement_spans, QUALIFIED_IDENT,
};

/// How far past the `TYPE newtype` match to look for a `USING` clause.
pub const USING_LOOKAHEAD_CHARS: usize = 200;

static ALTER_TABLE_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({table})\s+",
        table = QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

/// One `ALTER [COLUMN] c [SET DATA] TYPE t` action of an `ALTER TABLE`.
static ALTER_COLUMN_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bALTER\s+(?:COLUMN\s+)?("[^"]+"|\w+)\s+(?:SET\s+DATA\s+)?TYPE\s+((?:double\s+precision|character\s+varying|time(?:stamp)?\s+with(?:out)?\s+time\s+zone|[\w.]+)(?:\s*\([^)]*\))?(?:\[\])?)"#,
    )
    .expect("valid regex")
});

static USING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUSING\b").expect("valid regex"));

/// Warns when `ALTER COLUMN ... TYPE` has no `USING` clause nearby.
///
/// "Nearby" is the next [`USING_LOOKAHEAD_CHARS`] characters after the new
/// type, cut short at the next type change of the same `ALTER TABLE`. A
/// `USING` further away is missed, and a `USING` belonging to a following
/// statement inside the window is wrongly credited.
pub struct UnsafeTypeChange;

const CODES: &[Code] = &[Code::Warning(WarningCode::TypeChange)];

impl Detector for UnsafeTypeChange {
    fn name(&self) -> &'static str {
        "unsafe-type-change"
    }

    fn codes(&self) -> &'static [Code] {
        CODES
    }

    fn detect(&self, sql: &str) -> Vec<Diagnostic> {
        detect_unsafe_type_changes(sql)
            .into_iter()
            .map(Diagnostic::from)
            .collect()
    }
}

/// Return one warning per column type change lacking a `USING` cast.
pub fn detect_unsafe_type_changes(sql: &str) -> Vec<ValidationWarning> {
    let text = blank_comments(sql);
    let mut warnings = Vec::new();

    for (offset, stmt) in statement_spans(&text) {
        let Some(head) = ALTER_TABLE_HEAD_RE.captures(stmt) else {
            continue;
        };
        let (Some(head_match), Some(table)) = (head.get(0), head.get(1)) else {
            continue;
        };
        let table = normalize_identifier(table.as_str());
        let body_offset = offset + head_match.end();
        let actions: Vec<_> = ALTER_COLUMN_TYPE_RE
            .captures_iter(&stmt[head_match.end()..])
            .collect();

        for (i, caps) in actions.iter().enumerate() {
            let (Some(whole), Some(column), Some(new_type)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };

            let end = body_offset + whole.end();
            let mut window = lookahead(&text, end, USING_LOOKAHEAD_CHARS);
            if let Some(next) = actions.get(i + 1).and_then(|c| c.get(0)) {
                let bound = body_offset + next.start() - end;
                if bound < window.len() {
                    window = &window[..bound];
                }
            }
            if USING_RE.is_match(window) {
                continue;
            }

            let column = normalize_identifier(column.as_str());
            let new_type = new_type.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            warnings.push(ValidationWarning {
                code: WarningCode::TypeChange,
                message: format!(
                    "Column '{}.{}' changes type to {} without a USING clause",
                    table, column, new_type
                ),
                line: Some(line_number_at(&text, body_offset + whole.start())),
                suggestion: Some(format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} TYPE {new_type} USING {column}::{new_type};"
                )),
            });
        }
    }

    warnings
}

/// Up to `chars` characters of `text` starting at byte `from`.
fn lookahead(text: &str, from: usize, chars: usize) -> &str {
    let rest = &text[from..];
    match rest.char_indices().nth(chars) {
        Some((end, _)) => &rest[..end],
        None => rest,
    }
}
