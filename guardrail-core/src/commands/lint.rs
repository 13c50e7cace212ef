//! Static analysis of every migration file in the configured locations.
//!
//! Runs the validation aggregator on each file without touching a
//! database and flattens the findings into one report.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::migration::scan_migrations;
use crate::validation::validate;

/// Severity level for a lint issue.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LintSeverity {
    /// Blocks the migration.
    Error,
    /// Advisory only.
    Warning,
}

impl std::fmt::Display for LintSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LintSeverity::Error => write!(f, "error"),
            LintSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// A single lint finding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintIssue {
    /// Diagnostic code, e.g. `DROP_TABLE`.
    pub rule_id: String,
    pub severity: LintSeverity,
    pub message: String,
    /// Filename of the migration script where the issue was found.
    pub script: String,
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

/// Aggregate lint report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub issues: Vec<LintIssue>,
    /// Total number of migration files that were checked.
    pub files_checked: usize,
    pub error_count: usize,
    pub warning_count: usize,
}

impl LintReport {
    /// Scripts with at least one error, in report order, without duplicates.
    pub fn failing_scripts(&self) -> Vec<&str> {
        let mut scripts: Vec<&str> = Vec::new();
        for issue in self.issues.iter().filter(|i| i.severity == LintSeverity::Error) {
            if !scripts.contains(&issue.script.as_str()) {
                scripts.push(&issue.script);
            }
        }
        scripts
    }
}

/// Execute the lint command.
pub fn execute(locations: &[PathBuf], disabled_rules: &[String]) -> Result<LintReport> {
    let migrations = scan_migrations(locations)?;
    let files_checked = migrations.len();
    let mut issues = Vec::new();

    for migration in &migrations {
        let report = validate(&migration.sql, disabled_rules);

        issues.extend(report.errors.into_iter().map(|e| LintIssue {
            rule_id: e.code.to_string(),
            severity: LintSeverity::Error,
            message: e.message,
            script: migration.script.clone(),
            line: e.line,
            suggestion: e.suggestion,
        }));
        issues.extend(report.warnings.into_iter().map(|w| LintIssue {
            rule_id: w.code.to_string(),
            severity: LintSeverity::Warning,
            message: w.message,
            script: migration.script.clone(),
            line: w.line,
            suggestion: w.suggestion,
        }));
    }

    let error_count = issues
        .iter()
        .filter(|i| i.severity == LintSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    log::info!(
        "Lint complete; files={}, errors={}, warnings={}",
        files_checked,
        error_count,
        warning_count
    );

    Ok(LintReport {
        issues,
        files_checked,
        error_count,
        warning_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_migration(dir: &std::path::Path, name: &str, sql: &str) {
        fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn test_lint_drop_table_is_error() {
        let dir = TempDir::new().unwrap();
        setup_migration(
            dir.path(),
            "20240101000000_drop_old.sql",
            "-- cleanup\nDROP TABLE old_table;",
        );

        let report = execute(&[dir.path().to_path_buf()], &[]).unwrap();
        let issue = report.issues.iter().find(|i| i.rule_id == "DROP_TABLE").unwrap();
        assert_eq!(issue.severity, LintSeverity::Error);
        assert_eq!(issue.line, Some(2));
        assert_eq!(issue.script, "20240101000000_drop_old.sql");
        assert_eq!(report.error_count, 1);
        assert_eq!(report.failing_scripts(), vec!["20240101000000_drop_old.sql"]);
    }

    #[test]
    fn test_lint_missing_rls_is_warning() {
        let dir = TempDir::new().unwrap();
        setup_migration(
            dir.path(),
            "20240101000000_orders.sql",
            "CREATE TABLE orders (id uuid);",
        );

        let report = execute(&[dir.path().to_path_buf()], &[]).unwrap();
        assert_eq!(report.error_count, 0);
        assert_eq!(report.warning_count, 1);
        assert_eq!(report.issues[0].rule_id, "MISSING_RLS");
    }

    #[test]
    fn test_lint_disabled_rules() {
        let dir = TempDir::new().unwrap();
        setup_migration(
            dir.path(),
            "20240101000000_orders.sql",
            "CREATE TABLE orders (id uuid);",
        );

        let report = execute(&[dir.path().to_path_buf()], &["MISSING_RLS".to_string()]).unwrap();
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_lint_counts_across_files() {
        let dir = TempDir::new().unwrap();
        setup_migration(dir.path(), "20240101000000_a.sql", "TRUNCATE audit_log;");
        setup_migration(
            dir.path(),
            "20240102000000_b.sql",
            "ALTER TABLE users DROP COLUMN nickname;",
        );
        setup_migration(dir.path(), "20240103000000_c.sql", "SELECT 1;");

        let report = execute(&[dir.path().to_path_buf()], &[]).unwrap();
        assert_eq!(report.files_checked, 3);
        assert_eq!(report.error_count, 2);
        assert_eq!(report.issues[0].rule_id, "TRUNCATE");
        assert_eq!(report.issues[1].rule_id, "DROP_COLUMN");
    }

    #[test]
    fn test_lint_commented_statement_is_clean() {
        let dir = TempDir::new().unwrap();
        setup_migration(
            dir.path(),
            "20240101000000_noop.sql",
            "-- DROP TABLE users;\n",
        );

        let report = execute(&[dir.path().to_path_buf()], &[]).unwrap();
        assert!(report.issues.is_empty());
    }
}
