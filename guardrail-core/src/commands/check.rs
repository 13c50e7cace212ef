//! Hazard report for individual migration files.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::validation::{validate, ValidationReport};

/// Findings for one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileCheck {
    pub file: String,
    #[serde(flatten)]
    pub report: ValidationReport,
}

/// Validate each file in `paths`, in the order given.
pub fn execute(paths: &[PathBuf], disabled_rules: &[String]) -> Result<Vec<FileCheck>> {
    paths
        .iter()
        .map(|path| check_file(path, disabled_rules))
        .collect()
}

fn check_file(path: &Path, disabled_rules: &[String]) -> Result<FileCheck> {
    let sql = std::fs::read_to_string(path)?;
    let report = validate(&sql, disabled_rules);
    log::debug!(
        "Checked file; path={}, errors={}, warnings={}",
        path.display(),
        report.errors.len(),
        report.warnings.len()
    );
    Ok(FileCheck {
        file: path.display().to_string(),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_flattens_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.sql");
        std::fs::write(&path, "DROP TABLE users;").unwrap();

        let checks = execute(&[path], &[]).unwrap();
        assert_eq!(checks.len(), 1);
        assert!(!checks[0].report.passed());

        let value = serde_json::to_value(&checks[0]).unwrap();
        assert_eq!(value["errors"][0]["code"], "DROP_TABLE");
        assert_eq!(value["errors"][0]["line"], 1);
        assert!(value["warnings"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = execute(&[PathBuf::from("/nonexistent/m.sql")], &[]);
        assert!(matches!(result, Err(crate::error::GuardrailError::IoError(_))));
    }
}
