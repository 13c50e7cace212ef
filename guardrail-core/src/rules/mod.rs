//! Hazard detectors for migration SQL.
//!
//! Each detector owns a fixed set of diagnostic codes and scans raw SQL text
//! for one hazard class. Detectors are pure: no I/O, no shared state, and
//! the same input always yields the same findings in the same order.

pub mod destructive;
pub mod fk_index;
pub mod rls;
pub mod type_change;

use crate::diagnostics::{Code, Diagnostic};

/// A single hazard rule.
pub trait Detector: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Codes this detector may emit. No two detectors share a code.
    fn codes(&self) -> &'static [Code];

    /// Scan `sql` and return findings in match order.
    fn detect(&self, sql: &str) -> Vec<Diagnostic>;
}

/// All detectors in registration order.
pub fn registry() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(destructive::DestructiveOperations),
        Box::new(rls::MissingRls),
        Box::new(fk_index::MissingForeignKeyIndex),
        Box::new(type_change::UnsafeTypeChange),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_detectors_own_disjoint_codes() {
        let mut seen = HashSet::new();
        for detector in registry() {
            for code in detector.codes() {
                assert!(
                    seen.insert(code.as_str()),
                    "{} claimed by more than one detector",
                    code.as_str()
                );
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_detectors_only_emit_owned_codes() {
        let sql = "CREATE TABLE a (id uuid, b_id uuid REFERENCES b(id));\n\
                   ALTER TABLE a ALTER COLUMN id TYPE text;\n\
                   DROP TABLE c;\nALTER TABLE a DROP COLUMN x;\nTRUNCATE a;";
        for detector in registry() {
            for finding in detector.detect(sql) {
                assert!(
                    detector.codes().contains(&finding.code()),
                    "{} emitted foreign code {}",
                    detector.name(),
                    finding.code().as_str()
                );
            }
        }
    }
}
