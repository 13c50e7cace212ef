//! Migration safety checks, a structured migration-tool wrapper, and an
//! LLM agent fan-out.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use guardrail_core::config::{CliOverrides, GuardrailConfig};
//! use guardrail_core::Guardrail;
//!
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GuardrailConfig::load(None, &CliOverrides::default())?;
//! let guardrail = Guardrail::new(config);
//! let report = guardrail.lint()?;
//! println!("{} error(s) in {} file(s)", report.error_count, report.files_checked);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`diagnostics`] — Error/warning codes and finding types
//! - [`rules`] — Regex hazard detectors behind the `Detector` trait
//! - [`validation`] — Runs every detector and merges findings
//! - [`sql_parser`] — Comment stripping, statement splitting, identifiers
//! - [`migration`] — Migration file discovery
//! - [`exec`] — Bounded external command execution
//! - [`skill`] — create/apply/rollback/validate wrapper with JSON results
//! - [`agents`] — Concurrent LLM agent batches with per-task timeouts
//! - [`commands`] — check, lint and RLS audit over migration files
//! - [`config`] — Configuration loading (TOML, env vars, CLI overrides)
//! - [`error`] — Error types

pub mod agents;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod exec;
pub mod migration;
pub mod rules;
pub mod skill;
pub mod sql_parser;
pub mod validation;

use std::path::PathBuf;

use config::GuardrailConfig;
use error::Result;

pub use agents::{AgentBackend, AgentResult, AgentTask, AgentType, BatchRequest, BatchResponse};
pub use commands::check::FileCheck;
pub use commands::lint::LintReport;
pub use commands::rls_audit::{RlsAuditReport, TableStatus};
pub use config::CliOverrides;
pub use diagnostics::{ErrorCode, ValidationError, ValidationWarning, WarningCode};
pub use exec::{CommandRunner, ExecOutcome, ExecRequest, ExecStatus, ProcessRunner};
pub use skill::{SkillCommand, SkillReport, SkillResponse};
pub use validation::{validate, ValidationReport};

/// Main entry point for the library.
///
/// Holds the resolved configuration and exposes every command with it
/// applied.
pub struct Guardrail {
    pub config: GuardrailConfig,
}

impl Guardrail {
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    /// Validate individual SQL files.
    pub fn check(&self, paths: &[PathBuf]) -> Result<Vec<FileCheck>> {
        commands::check::execute(paths, &self.config.validation.disabled_rules)
    }

    /// Lint every migration in the configured locations.
    pub fn lint(&self) -> Result<LintReport> {
        commands::lint::execute(
            &self.config.migrations.locations,
            &self.config.validation.disabled_rules,
        )
    }

    /// Audit row level security across all migrations.
    pub fn rls_audit(&self) -> Result<RlsAuditReport> {
        commands::rls_audit::execute(&self.config.migrations.locations)
    }

    /// Run a skill subcommand against the real migration tool.
    pub async fn skill(&self, command: &SkillCommand) -> SkillReport {
        skill::run_skill(&self.config, &ProcessRunner, command).await
    }

    /// Run a skill subcommand with a custom runner.
    pub async fn skill_with<R: CommandRunner>(&self, runner: &R, command: &SkillCommand) -> SkillReport {
        skill::run_skill(&self.config, runner, command).await
    }

    /// Run an agent batch against the configured HTTP backend.
    pub async fn agents(&self, request: BatchRequest) -> Result<BatchResponse> {
        let backend = agents::HttpBackend::new(&self.config.agents)?;
        self.agents_with(&backend, request).await
    }

    /// Run an agent batch with a custom backend.
    pub async fn agents_with<B: AgentBackend>(
        &self,
        backend: &B,
        request: BatchRequest,
    ) -> Result<BatchResponse> {
        agents::handle_request(backend, request, self.config.agents.default_timeout_ms).await
    }
}
