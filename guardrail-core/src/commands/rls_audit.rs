//! Whole-schema row level security audit.
//!
//! Replays every migration in order and tracks, per table, whether RLS
//! ends up enabled and how many policies it has. Tables without RLS are
//! gaps; tables with RLS but no policies deny all access and are reported
//! as warnings.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::migration::{scan_migrations, MigrationFile};
use crate::rules::rls::{CREATE_TABLE_RE, ENABLE_RLS_RE};
use crate::sql_parser::{blank_comments, normalize_identifier, split_statements, QUALIFIED_IDENT};

static DISABLE_RLS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({})\s+DISABLE\s+ROW\s+LEVEL\s+SECURITY\b",
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

static CREATE_POLICY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)\bCREATE\s+POLICY\s+(?:"[^"]+"|\w+)\s+ON\s+({})"#,
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

static DROP_POLICY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)\bDROP\s+POLICY\s+(?:IF\s+EXISTS\s+)?(?:"[^"]+"|\w+)\s+ON\s+({})"#,
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

static DROP_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^DROP\s+TABLE\s+(?:IF\s+EXISTS\s+)?(.+?)(?:\s+(?:CASCADE|RESTRICT))?$")
        .expect("valid regex")
});

static RENAME_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"(?i)^ALTER\s+TABLE\s+(?:IF\s+EXISTS\s+)?(?:ONLY\s+)?({})\s+RENAME\s+TO\s+("[^"]+"|\w+)"#,
        QUALIFIED_IDENT
    ))
    .expect("valid regex")
});

/// Final RLS state of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableStatus {
    pub table: String,
    pub rls_enabled: bool,
    pub policy_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

/// Result of the audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RlsAuditReport {
    /// `true` when every table has RLS enabled.
    pub success: bool,
    pub total_tables: usize,
    #[serde(rename = "tablesWithRLS")]
    pub tables_with_rls: usize,
    /// Tables without RLS.
    pub gaps: Vec<TableStatus>,
    /// Tables with RLS enabled but no policies.
    pub warnings: Vec<TableStatus>,
    pub summary: Vec<String>,
}

/// Execute the audit over all migrations in `locations`.
pub fn execute(locations: &[PathBuf]) -> Result<RlsAuditReport> {
    let migrations = scan_migrations(locations)?;
    Ok(audit(&migrations))
}

/// Audit already-loaded migrations, applied in slice order.
pub fn audit(migrations: &[MigrationFile]) -> RlsAuditReport {
    let mut tables: Vec<TableStatus> = Vec::new();

    for migration in migrations {
        let text = blank_comments(&migration.sql);
        for statement in split_statements(&text) {
            apply_statement(&mut tables, statement);
        }
    }

    let mut gaps = Vec::new();
    let mut warnings = Vec::new();
    for table in &tables {
        if !table.rls_enabled {
            gaps.push(TableStatus {
                issue: Some("Row level security is not enabled".to_string()),
                ..table.clone()
            });
        } else if table.policy_count == 0 {
            warnings.push(TableStatus {
                issue: Some("RLS is enabled but no policies exist, so all access is denied".to_string()),
                ..table.clone()
            });
        }
    }

    let total_tables = tables.len();
    let tables_with_rls = tables.iter().filter(|t| t.rls_enabled).count();
    let summary = summarize(migrations.len(), total_tables, tables_with_rls, &gaps, &warnings);

    log::info!(
        "RLS audit complete; tables={}, with_rls={}, gaps={}, warnings={}",
        total_tables,
        tables_with_rls,
        gaps.len(),
        warnings.len()
    );

    RlsAuditReport {
        success: gaps.is_empty(),
        total_tables,
        tables_with_rls,
        gaps,
        warnings,
        summary,
    }
}

fn apply_statement(tables: &mut Vec<TableStatus>, statement: &str) {
    if let Some(caps) = DROP_TABLE_RE.captures(statement) {
        if let Some(list) = caps.get(1) {
            for name in list.as_str().split(',') {
                let name = normalize_identifier(name);
                tables.retain(|t| t.table != name);
            }
        }
        return;
    }

    if let Some(m) = CREATE_TABLE_RE.captures(statement).and_then(|c| c.get(1)) {
        let name = normalize_identifier(m.as_str());
        if find(tables, &name).is_none() {
            tables.push(TableStatus {
                table: name,
                rls_enabled: false,
                policy_count: 0,
                issue: None,
            });
        }
        return;
    }

    if let Some(caps) = RENAME_TABLE_RE.captures(statement) {
        if let (Some(from), Some(to)) = (caps.get(1), caps.get(2)) {
            let from = normalize_identifier(from.as_str());
            if let Some(t) = find(tables, &from) {
                t.table = normalize_identifier(to.as_str());
            }
        }
        return;
    }

    if let Some(m) = ENABLE_RLS_RE.captures(statement).and_then(|c| c.get(1)) {
        if let Some(t) = find(tables, &normalize_identifier(m.as_str())) {
            t.rls_enabled = true;
        }
        return;
    }

    if let Some(m) = DISABLE_RLS_RE.captures(statement).and_then(|c| c.get(1)) {
        if let Some(t) = find(tables, &normalize_identifier(m.as_str())) {
            t.rls_enabled = false;
        }
        return;
    }

    if let Some(m) = CREATE_POLICY_RE.captures(statement).and_then(|c| c.get(1)) {
        if let Some(t) = find(tables, &normalize_identifier(m.as_str())) {
            t.policy_count += 1;
        }
        return;
    }

    if let Some(m) = DROP_POLICY_RE.captures(statement).and_then(|c| c.get(1)) {
        if let Some(t) = find(tables, &normalize_identifier(m.as_str())) {
            t.policy_count = t.policy_count.saturating_sub(1);
        }
    }
}

fn find<'a>(tables: &'a mut [TableStatus], name: &str) -> Option<&'a mut TableStatus> {
    tables.iter_mut().find(|t| t.table == name)
}

fn summarize(
    migration_count: usize,
    total_tables: usize,
    tables_with_rls: usize,
    gaps: &[TableStatus],
    warnings: &[TableStatus],
) -> Vec<String> {
    let mut summary = vec![
        format!(
            "{} table(s) found across {} migration(s)",
            total_tables, migration_count
        ),
        format!("{} table(s) have row level security enabled", tables_with_rls),
    ];

    if gaps.is_empty() {
        summary.push("Every table has row level security enabled".to_string());
    } else {
        let names: Vec<&str> = gaps.iter().map(|g| g.table.as_str()).collect();
        summary.push(format!(
            "{} table(s) without row level security: {}",
            gaps.len(),
            names.join(", ")
        ));
    }

    if !warnings.is_empty() {
        let names: Vec<&str> = warnings.iter().map(|w| w.table.as_str()).collect();
        summary.push(format!(
            "{} table(s) deny all access (RLS enabled, no policies): {}",
            warnings.len(),
            names.join(", ")
        ));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn migration(script: &str, sql: &str) -> MigrationFile {
        MigrationFile {
            script: script.to_string(),
            path: PathBuf::from(script),
            version: crate::migration::migration_version(script),
            sql: sql.to_string(),
        }
    }

    #[test]
    fn test_audit_gap_and_warning() {
        let report = audit(&[
            migration(
                "1.sql",
                "CREATE TABLE profiles (id uuid);\n\
                 ALTER TABLE profiles ENABLE ROW LEVEL SECURITY;\n\
                 CREATE POLICY \"own profile\" ON public.profiles FOR SELECT USING (auth.uid() = id);\n\
                 CREATE TABLE orders (id uuid);\n\
                 CREATE TABLE secrets (id uuid);\n\
                 ALTER TABLE secrets ENABLE ROW LEVEL SECURITY;",
            ),
        ]);

        assert!(!report.success);
        assert_eq!(report.total_tables, 3);
        assert_eq!(report.tables_with_rls, 2);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].table, "orders");
        assert!(report.gaps[0].issue.is_some());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].table, "secrets");
        assert!(report.summary.iter().any(|s| s.contains("orders")));
    }

    #[test]
    fn test_later_migrations_fix_gaps() {
        let report = audit(&[
            migration("1.sql", "CREATE TABLE orders (id uuid);"),
            migration(
                "2.sql",
                "ALTER TABLE orders ENABLE ROW LEVEL SECURITY;\n\
                 CREATE POLICY read_orders ON orders FOR SELECT USING (true);",
            ),
        ]);
        assert!(report.success);
        assert!(report.gaps.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_disable_and_drop() {
        let report = audit(&[
            migration(
                "1.sql",
                "CREATE TABLE a (id int); ALTER TABLE a ENABLE ROW LEVEL SECURITY;\n\
                 CREATE TABLE b (id int);",
            ),
            migration(
                "2.sql",
                "ALTER TABLE a DISABLE ROW LEVEL SECURITY;\nDROP TABLE IF EXISTS b CASCADE;",
            ),
        ]);
        assert_eq!(report.total_tables, 1);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].table, "a");
        assert!(!report.gaps[0].rls_enabled);
    }

    #[test]
    fn test_drop_policy_and_rename() {
        let report = audit(&[migration(
            "1.sql",
            "CREATE TABLE old_name (id int);\n\
             ALTER TABLE old_name RENAME TO new_name;\n\
             ALTER TABLE new_name ENABLE ROW LEVEL SECURITY;\n\
             CREATE POLICY p ON new_name USING (true);\n\
             DROP POLICY IF EXISTS p ON new_name;",
        )]);
        assert_eq!(report.total_tables, 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].table, "new_name");
        assert_eq!(report.warnings[0].policy_count, 0);
    }

    #[test]
    fn test_commented_statements_ignored() {
        let report = audit(&[migration(
            "1.sql",
            "CREATE TABLE t (id int);\n-- ALTER TABLE t ENABLE ROW LEVEL SECURITY;\n",
        )]);
        assert_eq!(report.gaps.len(), 1);
    }

    #[test]
    fn test_output_field_names() {
        let report = audit(&[migration("1.sql", "CREATE TABLE t (id int);")]);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["totalTables"], 1);
        assert_eq!(value["tablesWithRLS"], 0);
        assert_eq!(value["gaps"][0]["rlsEnabled"], false);
        assert_eq!(value["gaps"][0]["policyCount"], 0);
        assert!(value["summary"].is_array());
    }

    #[test]
    fn test_execute_reads_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("20240101000000_a.sql"),
            "CREATE TABLE a (id int);",
        )
        .unwrap();
        fs::write(
            dir.path().join("20240102000000_b.sql"),
            "ALTER TABLE a ENABLE ROW LEVEL SECURITY; CREATE POLICY p ON a USING (true);",
        )
        .unwrap();

        let report = execute(&[dir.path().to_path_buf()]).unwrap();
        assert!(report.success);
        assert_eq!(report.tables_with_rls, 1);
    }

    #[test]
    fn test_empty_schema_is_success() {
        let report = audit(&[]);
        assert!(report.success);
        assert_eq!(report.total_tables, 0);
    }
}
