//! Tables created without row level security.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex_lite::Regex;

use super::Detector;
use crate::diagnostics::{Code, Diagnostic, ValidationWarning, WarningCode};
use crate::sql_parser::{blank_comments, line_number_at, normalize_identifier, QUALIFIED_IDENT};

pub(crate) static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bCREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:(?:TEMP|TEMPORARY|UNLOGGED)\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?({})",
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

pub(crate) static ENABLE_RLS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({})\s+ENABLE\s+ROW\s+LEVEL\s+SECURITY\b",
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

/// Warns for every table created in the migration that never has row level
/// security enabled in the same migration.
pub struct MissingRls;

const CODES: &[Code] = &[Code::Warning(WarningCode::MissingRls)];

impl Detector for MissingRls {
    fn name(&self) -> &'static str {
        "missing-rls"
    }

    fn codes(&self) -> &'static [Code] {
        CODES
    }

    fn detect(&self, sql: &str) -> Vec<Diagnostic> {
        detect_missing_rls(sql)
            .into_iter()
            .map(Diagnostic::from)
            .collect()
    }
}

/// Return one warning per created table lacking `ENABLE ROW LEVEL SECURITY`.
///
/// Names are compared lower-cased without schema, in order of first creation.
pub fn detect_missing_rls(sql: &str) -> Vec<ValidationWarning> {
    let text = blank_comments(sql);

    let mut created: Vec<(String, usize)> = Vec::new();
    let mut seen = HashSet::new();
    for caps in CREATE_TABLE_RE.captures_iter(&text) {
        let Some(m) = caps.get(1) else { continue };
        let table = normalize_identifier(m.as_str());
        if seen.insert(table.clone()) {
            created.push((table, line_number_at(&text, m.start())));
        }
    }

    let secured: HashSet<String> = ENABLE_RLS_RE
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1))
        .map(|m| normalize_identifier(m.as_str()))
        .collect();

    created
        .into_iter()
        .filter(|(table, _)| !secured.contains(table))
        .map(|(table, line)| ValidationWarning {
            code: WarningCode::MissingRls,
            message: format!("Table '{}' is created without enabling row level security", table),
            line: Some(line),
            suggestion: Some(format!(
                "ALTER TABLE {table} ENABLE ROW LEVEL SECURITY; then add policies, e.g. \
                 CREATE POLICY \"{table}_select_own\" ON {table} FOR SELECT USING (auth.uid() = user_id);"
            )),
        })
        .collect()
}
