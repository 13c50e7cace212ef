//! Structured wrapper around the external migration tool.
//!
//! Each subcommand ends in exactly one [`SkillReport`]: a JSON payload plus
//! a process exit code. Invalid input and the rollback guard are handled
//! before anything is spawned.

use std::sync::LazyLock;
use std::time::Duration;

use regex_lite::Regex;
use serde::Serialize;

use crate::config::GuardrailConfig;
use crate::error::{GuardrailError, Result};
use crate::exec::{signal_name, CommandRunner, ExecOutcome, ExecRequest, ExecStatus};
use crate::migration::scan_migrations;
use crate::validation::validate;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for any failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when a safety guard refused to run the command.
pub const EXIT_BLOCKED: i32 = 2;

/// How many static-validation errors are spelled out in a failure message.
const MAX_LISTED_ERRORS: usize = 5;

static MIGRATION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

/// Accept only names made of ASCII letters, digits and underscores.
pub fn validate_migration_name(name: &str) -> Result<()> {
    if MIGRATION_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(GuardrailError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// A skill subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillCommand {
    Create { name: String },
    Apply,
    Rollback,
    Validate,
}

impl SkillCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SkillCommand::Create { .. } => "create",
            SkillCommand::Apply => "apply",
            SkillCommand::Rollback => "rollback",
            SkillCommand::Validate => "validate",
        }
    }
}

/// Payload for a command that succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSuccess {
    success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub next_steps: Vec<String>,
    /// Static findings that did not block the command.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Payload for a command that failed or was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillFailure {
    success: bool,
    pub error: String,
    /// Exit status of the tool, when it exited on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Machine-readable failure kind.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub hint: String,
}

impl SkillFailure {
    fn new(error: impl Into<String>, code: &str, hint: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            status: None,
            code: Some(code.to_string()),
            signal: None,
            stdout: None,
            stderr: None,
            hint: hint.into(),
        }
    }
}

/// The JSON object a skill invocation prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SkillResponse {
    Success(SkillSuccess),
    Failure(SkillFailure),
}

/// A response together with the exit code the process should end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillReport {
    pub response: SkillResponse,
    pub exit_code: i32,
}

impl SkillReport {
    fn success(
        message: impl Into<String>,
        output: Option<String>,
        next_steps: Vec<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            response: SkillResponse::Success(SkillSuccess {
                success: true,
                message: message.into(),
                output,
                next_steps,
                warnings,
            }),
            exit_code: EXIT_SUCCESS,
        }
    }

    fn failure(failure: SkillFailure) -> Self {
        Self {
            response: SkillResponse::Failure(failure),
            exit_code: EXIT_FAILURE,
        }
    }

    fn blocked(failure: SkillFailure) -> Self {
        Self {
            response: SkillResponse::Failure(failure),
            exit_code: EXIT_BLOCKED,
        }
    }

    /// Report for an error raised outside the skill flow (e.g. bad config).
    pub fn from_error(err: &GuardrailError) -> Self {
        let hint = match err {
            GuardrailError::ConfigError(_) => "Check guardrail.toml and the SKILL_* environment variables",
            _ => "Re-run with --verbose for more detail",
        };
        Self::failure(SkillFailure::new(err.to_string(), "INTERNAL", hint))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.response, SkillResponse::Success(_))
    }

    /// Single-line JSON for the caller.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.response)?)
    }
}

/// Build the tool invocation for `command` from config.
pub fn build_request(config: &GuardrailConfig, command: &SkillCommand) -> ExecRequest {
    let tool = &config.tool;
    let mut args = tool.args_prefix.clone();
    match command {
        SkillCommand::Create { name } => {
            args.extend(tool.create_args.iter().cloned());
            args.push(name.clone());
        }
        SkillCommand::Apply => args.extend(tool.apply_args.iter().cloned()),
        SkillCommand::Rollback => args.extend(tool.rollback_args.iter().cloned()),
        SkillCommand::Validate => args.extend(tool.validate_args.iter().cloned()),
    }

    ExecRequest {
        program: tool.program.clone(),
        args,
        cwd: tool.working_dir.clone(),
        timeout: Duration::from_millis(config.exec.timeout_ms),
        max_buffer: config.exec.max_buffer,
    }
}

/// Run one skill subcommand to completion.
pub async fn run_skill<R: CommandRunner>(
    config: &GuardrailConfig,
    runner: &R,
    command: &SkillCommand,
) -> SkillReport {
    log::debug!("Validating skill input; command={}", command.name());

    let mut findings = StaticFindings::default();
    match command {
        SkillCommand::Create { name } => {
            if let Err(e) = validate_migration_name(name) {
                return SkillReport::failure(SkillFailure::new(
                    e.to_string(),
                    "INVALID_NAME",
                    "Use only letters, digits and underscores, e.g. add_orders_table",
                ));
            }
        }
        SkillCommand::Rollback if !config.rollback.allow => {
            log::warn!("Rollback blocked; ALLOW_DB_ROLLBACK is not set to 1");
            return SkillReport::blocked(SkillFailure::new(
                GuardrailError::RollbackNotAllowed.to_string(),
                "ROLLBACK_BLOCKED",
                "Rollback can destroy data. Re-run with ALLOW_DB_ROLLBACK=1 only if you intend to roll back.",
            ));
        }
        SkillCommand::Validate => match static_check(config) {
            Ok(found) if found.error_count > 0 && config.validation.block_on_errors => {
                return SkillReport::failure(found.blocking_failure());
            }
            Ok(found) => {
                if found.error_count > 0 {
                    log::warn!(
                        "Static validation found errors; error_count={}, migrations={}",
                        found.error_count,
                        found.failing_files
                    );
                }
                findings = found;
            }
            Err(failure) => return SkillReport::failure(failure),
        },
        SkillCommand::Apply | SkillCommand::Rollback => {}
    }

    let request = build_request(config, command);
    log::info!("Running migration tool; command={}", request.display());
    let outcome = runner.run(&request).await;

    if outcome.is_success() {
        let output = Some(outcome.stdout.trim().to_string()).filter(|s| !s.is_empty());
        let (message, next_steps) = success_text(config, command, &findings);
        return SkillReport::success(message, output, next_steps, findings.listed);
    }

    SkillReport::failure(failure_from_outcome(config, &request, outcome))
}

/// What the static detectors found across local migrations.
#[derive(Debug, Default)]
struct StaticFindings {
    error_count: usize,
    warning_count: usize,
    failing_files: usize,
    /// `script:line CODE` for the first errors, plus a remainder note.
    listed: Vec<String>,
}

impl StaticFindings {
    fn blocking_failure(&self) -> SkillFailure {
        let err = GuardrailError::ValidationFailed {
            error_count: self.error_count,
            details: format!(
                "{} migration(s) affected: {}",
                self.failing_files,
                self.listed.join(", ")
            ),
        };
        SkillFailure::new(
            err.to_string(),
            "VALIDATION_FAILED",
            "Rewrite the destructive statements, or set [validation] block_on_errors = false to report them without blocking",
        )
    }
}

/// Run the static detectors over local migrations.
fn static_check(config: &GuardrailConfig) -> std::result::Result<StaticFindings, SkillFailure> {
    let migrations = scan_migrations(&config.migrations.locations).map_err(|e| {
        SkillFailure::new(
            e.to_string(),
            "SCAN_FAILED",
            "Check that [migrations] locations point at readable directories",
        )
    })?;

    let mut found = StaticFindings::default();
    for migration in &migrations {
        let report = validate(&migration.sql, &config.validation.disabled_rules);
        found.warning_count += report.warnings.len();
        if report.errors.is_empty() {
            continue;
        }
        found.failing_files += 1;
        found.error_count += report.errors.len();
        for e in &report.errors {
            if found.listed.len() < MAX_LISTED_ERRORS {
                let line = e.line.map(|l| format!(":{}", l)).unwrap_or_default();
                found.listed.push(format!("{}{} {}", migration.script, line, e.code));
            }
        }
    }

    if found.error_count > found.listed.len() {
        let more = found.error_count - found.listed.len();
        found.listed.push(format!("and {} more", more));
    }
    Ok(found)
}

fn success_text(
    config: &GuardrailConfig,
    command: &SkillCommand,
    findings: &StaticFindings,
) -> (String, Vec<String>) {
    let location = config
        .migrations
        .locations
        .first()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "the migrations directory".to_string());

    match command {
        SkillCommand::Create { name } => (
            format!("Created migration '{}'", name),
            vec![
                format!("Write the SQL for '{}' in the new file under {}", name, location),
                "Run `guardrail check <file>` to check it for hazards".to_string(),
                "Run `guardrail skill validate`, then `guardrail skill apply`".to_string(),
            ],
        ),
        SkillCommand::Apply => (
            "Migrations applied".to_string(),
            vec![
                "Run `guardrail rls-audit` to confirm every table has row level security".to_string(),
                "Commit the migration files together with the code that depends on them".to_string(),
            ],
        ),
        SkillCommand::Rollback => (
            "Rollback completed".to_string(),
            vec![
                "Fix the migration and re-apply it with `guardrail skill apply`".to_string(),
                "Unset ALLOW_DB_ROLLBACK once you are done".to_string(),
            ],
        ),
        SkillCommand::Validate => {
            let mut steps = Vec::new();
            if findings.error_count > 0 {
                steps.push(format!(
                    "Review {} destructive statement(s) in {} migration(s) with `guardrail lint`",
                    findings.error_count, findings.failing_files
                ));
            }
            if findings.warning_count > 0 {
                steps.push(format!(
                    "Review {} warning(s) with `guardrail lint`",
                    findings.warning_count
                ));
            }
            steps.push("Run `guardrail skill apply` to apply pending migrations".to_string());
            ("Migrations validated".to_string(), steps)
        }
    }
}

fn failure_from_outcome(
    config: &GuardrailConfig,
    request: &ExecRequest,
    outcome: ExecOutcome,
) -> SkillFailure {
    let command = request.display();
    let mut failure = match outcome.status {
        ExecStatus::NonZeroExit { code } => {
            let mut f = SkillFailure::new(
                format!("`{}` exited with status {}", command, code),
                "NON_ZERO_EXIT",
                "Re-run with SKILL_VERBOSE=1 to include the tool's stdout and stderr",
            );
            f.status = Some(code);
            f
        }
        ExecStatus::Signal { signal } => {
            let mut f = SkillFailure::new(
                format!("`{}` was terminated by {}", command, signal_name(signal)),
                "SIGNAL",
                "The tool was killed from outside; check for memory limits or manual interruption, then retry",
            );
            f.signal = Some(signal_name(signal));
            f
        }
        ExecStatus::Timeout => {
            let mut f = SkillFailure::new(
                format!("`{}` timed out after {} ms", command, config.exec.timeout_ms),
                "TIMEOUT",
                format!(
                    "Raise SKILL_EXEC_TIMEOUT_MS (currently {}) or check that the database is reachable",
                    config.exec.timeout_ms
                ),
            );
            f.signal = Some(signal_name(9));
            f
        }
        ExecStatus::BufferExceeded { stream } => {
            let mut f = SkillFailure::new(
                format!(
                    "`{}` wrote more than {} bytes to {}",
                    command, config.exec.max_buffer, stream
                ),
                "MAX_BUFFER_EXCEEDED",
                format!(
                    "Raise SKILL_EXEC_MAX_BUFFER (currently {} bytes)",
                    config.exec.max_buffer
                ),
            );
            f.signal = Some(signal_name(9));
            f
        }
        ExecStatus::SpawnFailed { message } => SkillFailure::new(
            message,
            "SPAWN_FAILED",
            format!(
                "Check that `{}` is installed and on PATH, or point GUARDRAIL_TOOL at it",
                request.program
            ),
        ),
        ExecStatus::Success => SkillFailure::new(
            format!("`{}` reported success", command),
            "UNEXPECTED",
            "No action needed",
        ),
    };

    if config.exec.verbose {
        failure.stdout = Some(outcome.stdout);
        failure.stderr = Some(outcome.stderr);
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeRunner {
        calls: Mutex<Vec<ExecRequest>>,
        status: ExecStatus,
    }

    impl FakeRunner {
        fn new(status: ExecStatus) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                status,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl CommandRunner for FakeRunner {
        async fn run(&self, request: &ExecRequest) -> ExecOutcome {
            self.calls.lock().unwrap().push(request.clone());
            ExecOutcome {
                status: self.status.clone(),
                stdout: "tool stdout\n".to_string(),
                stderr: "tool stderr\n".to_string(),
                elapsed: Duration::from_millis(5),
            }
        }
    }

    fn config_in(dir: &TempDir) -> GuardrailConfig {
        let mut config = GuardrailConfig::default();
        config.migrations.locations = vec![dir.path().to_path_buf()];
        config
    }

    fn json(report: &SkillReport) -> serde_json::Value {
        serde_json::from_str(&report.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_migration_name_validation() {
        assert!(validate_migration_name("my_migration_1").is_ok());
        assert!(validate_migration_name("AddOrders").is_ok());
        assert!(validate_migration_name("my migration!").is_err());
        assert!(validate_migration_name("").is_err());
        assert!(validate_migration_name("../escape").is_err());
    }

    #[tokio::test]
    async fn test_create_with_valid_name_spawns_tool() {
        let runner = FakeRunner::new(ExecStatus::Success);
        let config = GuardrailConfig::default();
        let report = run_skill(
            &config,
            &runner,
            &SkillCommand::Create {
                name: "my_migration_1".to_string(),
            },
        )
        .await;

        assert_eq!(report.exit_code, EXIT_SUCCESS);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].display(), "supabase migration new my_migration_1");

        let value = json(&report);
        assert_eq!(value["success"], true);
        assert_eq!(value["output"], "tool stdout");
        assert!(value["nextSteps"].as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_create_with_invalid_name_never_spawns() {
        let runner = FakeRunner::new(ExecStatus::Success);
        let report = run_skill(
            &GuardrailConfig::default(),
            &runner,
            &SkillCommand::Create {
                name: "my migration!".to_string(),
            },
        )
        .await;

        assert_eq!(report.exit_code, EXIT_FAILURE);
        assert_eq!(runner.call_count(), 0);
        let value = json(&report);
        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "INVALID_NAME");
        assert!(value["hint"].is_string());
    }

    #[tokio::test]
    async fn test_rollback_without_opt_in_is_blocked() {
        let runner = FakeRunner::new(ExecStatus::Success);
        let report = run_skill(&GuardrailConfig::default(), &runner, &SkillCommand::Rollback).await;

        assert_eq!(report.exit_code, EXIT_BLOCKED);
        assert_eq!(runner.call_count(), 0);
        let value = json(&report);
        assert_eq!(value["code"], "ROLLBACK_BLOCKED");
        assert!(value["error"].as_str().unwrap().contains("ALLOW_DB_ROLLBACK"));
    }

    #[tokio::test]
    async fn test_rollback_with_opt_in_runs() {
        let runner = FakeRunner::new(ExecStatus::Success);
        let mut config = GuardrailConfig::default();
        config.rollback.allow = true;
        let report = run_skill(&config, &runner, &SkillCommand::Rollback).await;
        assert_eq!(report.exit_code, EXIT_SUCCESS);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_hides_output_unless_verbose() {
        let runner = FakeRunner::new(ExecStatus::NonZeroExit { code: 4 });
        let mut config = GuardrailConfig::default();

        let quiet = json(&run_skill(&config, &runner, &SkillCommand::Apply).await);
        assert_eq!(quiet["success"], false);
        assert_eq!(quiet["status"], 4);
        assert!(quiet.get("stdout").is_none());
        assert!(quiet.get("stderr").is_none());
        assert!(quiet["hint"].as_str().unwrap().contains("SKILL_VERBOSE"));

        config.exec.verbose = true;
        let verbose = json(&run_skill(&config, &runner, &SkillCommand::Apply).await);
        assert_eq!(verbose["stdout"], "tool stdout\n");
        assert_eq!(verbose["stderr"], "tool stderr\n");
    }

    #[tokio::test]
    async fn test_timeout_failure() {
        let runner = FakeRunner::new(ExecStatus::Timeout);
        let report = run_skill(&GuardrailConfig::default(), &runner, &SkillCommand::Apply).await;
        assert_eq!(report.exit_code, EXIT_FAILURE);
        let value = json(&report);
        assert_eq!(value["code"], "TIMEOUT");
        assert_eq!(value["signal"], "SIGKILL");
        assert!(value["hint"].as_str().unwrap().contains("SKILL_EXEC_TIMEOUT_MS"));
    }

    #[tokio::test]
    async fn test_signal_failure() {
        let runner = FakeRunner::new(ExecStatus::Signal { signal: 15 });
        let value = json(&run_skill(&GuardrailConfig::default(), &runner, &SkillCommand::Apply).await);
        assert_eq!(value["signal"], "SIGTERM");
        assert!(value.get("status").is_none());
    }

    fn history_with_old_drop(dir: &TempDir) {
        std::fs::write(
            dir.path().join("20230101000000_old.sql"),
            "ALTER TABLE users DROP COLUMN nickname;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("20240101000000_orders.sql"),
            "CREATE TABLE orders (id uuid PRIMARY KEY);\n\
             ALTER TABLE orders ENABLE ROW LEVEL SECURITY;\n",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_validate_reports_static_errors_and_still_runs_tool() {
        let dir = TempDir::new().unwrap();
        history_with_old_drop(&dir);

        let runner = FakeRunner::new(ExecStatus::Success);
        let report = run_skill(&config_in(&dir), &runner, &SkillCommand::Validate).await;

        assert_eq!(report.exit_code, EXIT_SUCCESS);
        assert_eq!(runner.call_count(), 1);
        let value = json(&report);
        assert_eq!(value["success"], true);
        assert_eq!(value["warnings"][0], "20230101000000_old.sql:1 DROP_COLUMN");
        assert!(value["nextSteps"][0]
            .as_str()
            .unwrap()
            .contains("1 destructive statement(s) in 1 migration(s)"));
    }

    #[tokio::test]
    async fn test_validate_blocks_when_configured() {
        let dir = TempDir::new().unwrap();
        history_with_old_drop(&dir);
        let mut config = config_in(&dir);
        config.validation.block_on_errors = true;

        let runner = FakeRunner::new(ExecStatus::Success);
        let report = run_skill(&config, &runner, &SkillCommand::Validate).await;

        assert_eq!(report.exit_code, EXIT_FAILURE);
        assert_eq!(runner.call_count(), 0);
        let value = json(&report);
        assert_eq!(value["code"], "VALIDATION_FAILED");
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("20230101000000_old.sql:1 DROP_COLUMN"));
    }

    #[tokio::test]
    async fn test_validate_lists_at_most_five_errors() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("20240101000000_purge.sql"),
            "TRUNCATE a;\nTRUNCATE b;\nTRUNCATE c;\nTRUNCATE d;\nTRUNCATE e;\nTRUNCATE f;\nTRUNCATE g;\n",
        )
        .unwrap();

        let runner = FakeRunner::new(ExecStatus::Success);
        let value = json(&run_skill(&config_in(&dir), &runner, &SkillCommand::Validate).await);
        let warnings = value["warnings"].as_array().unwrap();
        assert_eq!(warnings.len(), MAX_LISTED_ERRORS + 1);
        assert_eq!(warnings[MAX_LISTED_ERRORS], "and 2 more");
    }

    #[tokio::test]
    async fn test_validate_passes_and_reports_warnings() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("20240101000000_orders.sql"),
            "CREATE TABLE orders (id uuid);\n",
        )
        .unwrap();

        let runner = FakeRunner::new(ExecStatus::Success);
        let report = run_skill(&config_in(&dir), &runner, &SkillCommand::Validate).await;

        assert_eq!(report.exit_code, EXIT_SUCCESS);
        assert_eq!(runner.call_count(), 1);
        let value = json(&report);
        assert!(value["nextSteps"][0].as_str().unwrap().contains("1 warning"));
    }

    #[test]
    fn test_build_request_uses_prefix_and_cwd() {
        let mut config = GuardrailConfig::default();
        config.tool.program = "npx".to_string();
        config.tool.args_prefix = vec!["supabase".to_string()];
        config.tool.working_dir = Some(PathBuf::from("app"));
        config.exec.timeout_ms = 500;

        let req = build_request(&config, &SkillCommand::Apply);
        assert_eq!(req.display(), "npx supabase db push");
        assert_eq!(req.cwd, Some(PathBuf::from("app")));
        assert_eq!(req.timeout, Duration::from_millis(500));
    }
}
