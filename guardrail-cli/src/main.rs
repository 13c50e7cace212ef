//! CLI entry point for guardrail.
//! Provides clap-based command routing, exit code mapping based on error
//! type, and the JSON protocol for the `skill` subcommands.

mod output;

use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;

use guardrail_core::config::{CliOverrides, GuardrailConfig};
use guardrail_core::error::GuardrailError;
use guardrail_core::skill::{SkillCommand, SkillReport};
use guardrail_core::{BatchRequest, FileCheck, Guardrail};

/// Top-level CLI definition with global flags and subcommand dispatch.
#[derive(Parser)]
#[command(
    name = "guardrail",
    about = "Migration safety checks and a structured migration-tool wrapper",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Migration locations, comma-separated (overrides config)
    #[arg(long, value_name = "PATHS")]
    locations: Option<String>,

    /// Tool timeout in milliseconds (overrides SKILL_EXEC_TIMEOUT_MS)
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// All available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Drive the migration tool and print a single JSON result
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },

    /// Check individual migration files for hazards
    Check {
        /// SQL files to check
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Check every migration in the configured locations
    Lint {
        /// Disable specific rule codes (comma-separated)
        #[arg(long, value_name = "CODES", value_delimiter = ',')]
        disable: Vec<String>,
        /// Exit code 1 if any errors found
        #[arg(long)]
        strict: bool,
    },

    /// Check that every table ends up with row level security
    RlsAudit,

    /// Run a batch of LLM agent tasks
    Agents {
        /// Request file, or `-` for stdin
        #[arg(value_name = "FILE", default_value = "-")]
        input: String,
    },
}

#[derive(Subcommand)]
enum SkillAction {
    /// Create a new migration file
    Create {
        /// Migration name (letters, digits, underscores)
        name: String,
    },
    /// Apply pending migrations
    Apply,
    /// Roll back the database (requires ALLOW_DB_ROLLBACK=1)
    Rollback,
    /// Validate migrations statically, then with the tool
    Validate,
}

impl From<SkillAction> for SkillCommand {
    fn from(action: SkillAction) -> Self {
        match action {
            SkillAction::Create { name } => SkillCommand::Create { name },
            SkillAction::Apply => SkillCommand::Apply,
            SkillAction::Rollback => SkillCommand::Rollback,
            SkillAction::Validate => SkillCommand::Validate,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Skill output is a JSON protocol on stdout/stderr; keep logs out of it
    // unless debugging was asked for.
    let is_skill = matches!(cli.command, Commands::Skill { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.json || cli.quiet || is_skill {
        "error"
    } else {
        "info"
    };

    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or(filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    if is_skill {
        process::exit(run_skill(cli).await);
    }

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &GuardrailError) -> i32 {
    match error {
        GuardrailError::RollbackNotAllowed => 2,
        GuardrailError::ConfigError(_) => 3,
        GuardrailError::RlsGaps { .. } => 4,
        _ => 1,
    }
}

fn overrides_from(cli: &Cli, disabled_rules: Option<Vec<String>>) -> CliOverrides {
    CliOverrides {
        locations: cli.locations.as_ref().map(|l| {
            l.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        }),
        timeout_ms: cli.timeout_ms,
        verbose: None,
        disabled_rules,
    }
}

/// Run a skill subcommand and print its JSON payload. Returns the exit code.
async fn run_skill(cli: Cli) -> i32 {
    let overrides = overrides_from(&cli, None);
    let Commands::Skill { action } = cli.command else {
        return 1;
    };

    let report = match GuardrailConfig::load(cli.config.as_deref(), &overrides) {
        Ok(config) => Guardrail::new(config).skill(&action.into()).await,
        Err(e) => SkillReport::from_error(&e),
    };

    match report.to_json() {
        Ok(json) if report.is_success() => println!("{}", json),
        Ok(json) => eprintln!("{}", json),
        Err(e) => eprintln!("{}", fallback_json(&e.to_string())),
    }
    report.exit_code
}

/// Failure payload for when the report itself could not be serialized.
fn fallback_json(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error,
        "hint": "Report this as a bug"
    })
    .to_string()
}

/// JSON for `check`: always an array, one entry per file.
fn check_json(checks: &[FileCheck]) -> Result<String, GuardrailError> {
    Ok(serde_json::to_string_pretty(checks)?)
}

/// Build configuration and dispatch the chosen subcommand.
async fn run(cli: Cli) -> Result<(), GuardrailError> {
    let json_output = cli.json;
    let disabled = match &cli.command {
        Commands::Lint { disable, .. } if !disable.is_empty() => Some(disable.clone()),
        _ => None,
    };
    let overrides = overrides_from(&cli, disabled);
    let config = GuardrailConfig::load(cli.config.as_deref(), &overrides)?;
    log::debug!("Loaded config; config={:?}", config);
    let guardrail = Guardrail::new(config);

    match cli.command {
        Commands::Skill { .. } => Ok(()),
        Commands::Check { files } => {
            let checks = guardrail.check(&files)?;
            if json_output {
                println!("{}", check_json(&checks)?);
            } else {
                output::print_check_report(&checks);
            }

            let error_count: usize = checks.iter().map(|c| c.report.errors.len()).sum();
            if error_count > 0 {
                let failing: Vec<&str> = checks
                    .iter()
                    .filter(|c| !c.report.passed())
                    .map(|c| c.file.as_str())
                    .collect();
                return Err(GuardrailError::ValidationFailed {
                    error_count,
                    details: failing.join(", "),
                });
            }
            Ok(())
        }
        Commands::Lint { strict, .. } => {
            let report = guardrail.lint()?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_lint_report(&report);
            }
            if strict && report.error_count > 0 {
                return Err(GuardrailError::LintFailed {
                    error_count: report.error_count,
                    details: report.failing_scripts().join(", "),
                });
            }
            Ok(())
        }
        Commands::RlsAudit => {
            let report = guardrail.rls_audit()?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_rls_audit(&report);
            }
            if !report.success {
                let tables: Vec<&str> = report.gaps.iter().map(|g| g.table.as_str()).collect();
                return Err(GuardrailError::RlsGaps {
                    count: report.gaps.len(),
                    tables: tables.join(", "),
                });
            }
            Ok(())
        }
        Commands::Agents { input } => {
            let raw = read_input(&input)?;
            let request = BatchRequest::from_json(&raw)?;
            let response = guardrail.agents(request).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                output::print_agent_results(&response.agents);
                for result in response.agents.iter().filter(|r| r.success) {
                    if let Some(ref value) = result.response {
                        println!();
                        println!("{}", result.agent_type.as_str().bold());
                        println!("{}", serde_json::to_string_pretty(value)?);
                    }
                }
            }
            Ok(())
        }
    }
}

fn read_input(input: &str) -> Result<String, GuardrailError> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(input)?)
    }
}

fn print_error(error: &GuardrailError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    match error {
        GuardrailError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your guardrail.toml and the SKILL_* / GUARDRAIL_* environment variables."
                    .dimmed()
            );
        }
        GuardrailError::ValidationFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: Rewrite the destructive statements, or disable a rule with [validation] disabled_rules."
                    .dimmed()
            );
        }
        GuardrailError::LintFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: Run 'guardrail check <file>' on the listed scripts for details.".dimmed()
            );
        }
        GuardrailError::RlsGaps { .. } => {
            eprintln!(
                "{}",
                "Hint: Add 'ALTER TABLE <table> ENABLE ROW LEVEL SECURITY;' and policies in a new migration."
                    .dimmed()
            );
        }
        GuardrailError::BackendError(_) => {
            eprintln!(
                "{}",
                "Hint: Check ANTHROPIC_API_KEY and GUARDRAIL_AGENTS_ENDPOINT, then retry.".dimmed()
            );
        }
        GuardrailError::InvalidRequest(_) | GuardrailError::JsonError(_) => {
            eprintln!(
                "{}",
                "Hint: Requests look like {\"agents\": [{\"type\": \"research\", \"prompt\": \"...\", \"timeout\": 60000}]}."
                    .dimmed()
            );
        }
        _ => {}
    }
}
