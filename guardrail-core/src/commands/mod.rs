//! Command implementations: check, lint, rls-audit.

pub mod check;
pub mod lint;
pub mod rls_audit;
