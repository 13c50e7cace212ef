//! Runs every registered detector over one migration and merges the findings.

use serde::Serialize;

use crate::diagnostics::{Diagnostic, ValidationError, ValidationWarning};
use crate::rules::{registry, Detector};

/// All findings for one migration.
///
/// Errors block the migration, warnings never do. Order is detector
/// registration order, then match order within each detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// `true` when nothing blocks the migration.
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::Error(e) => self.errors.push(e),
            Diagnostic::Warning(w) => self.warnings.push(w),
        }
    }
}

/// Validate `sql` with every detector, dropping codes listed in `disabled_rules`.
pub fn validate(sql: &str, disabled_rules: &[String]) -> ValidationReport {
    validate_with(&registry(), sql, disabled_rules)
}

/// Validate `sql` with an explicit detector list.
pub fn validate_with(
    detectors: &[Box<dyn Detector>],
    sql: &str,
    disabled_rules: &[String],
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for detector in detectors {
        let findings = detector.detect(sql);
        log::debug!(
            "Detector finished; detector={}, findings={}",
            detector.name(),
            findings.len()
        );
        for finding in findings {
            if is_disabled(disabled_rules, finding.code().as_str()) {
                continue;
            }
            report.push(finding);
        }
    }

    report
}

fn is_disabled(disabled_rules: &[String], code: &str) -> bool {
    disabled_rules.iter().any(|r| r.eq_ignore_ascii_case(code))
}
