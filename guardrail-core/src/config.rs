//! Configuration loading and resolution.
//!
//! Supports TOML config files, environment variables, and CLI overrides
//! with a defined priority order (CLI > env > TOML > defaults). The
//! resolved [`GuardrailConfig`] is built once at startup and passed down
//! explicitly; nothing below this module reads the environment.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{GuardrailError, Result};
use crate::exec::{DEFAULT_MAX_BUFFER, DEFAULT_TIMEOUT_MS};

/// Helper macro to apply an optional owned value directly to a target field.
///
/// Replaces: `if let Some(v) = $opt { $target = v; }`
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Helper macro to apply an optional owned value, wrapping it in `Some()`.
macro_rules! apply_option_some {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = Some(v);
        }
    };
}

/// Helper macro to clone a borrowed optional value directly to a target field.
macro_rules! apply_option_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = v.clone();
        }
    };
}

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "guardrail.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct GuardrailConfig {
    /// Timeout, buffer and verbosity for spawned tool commands.
    pub exec: ExecConfig,
    /// The migration tool the skill wrapper drives.
    pub tool: ToolConfig,
    /// Where migration files live.
    pub migrations: MigrationSettings,
    /// Rollback safety guard.
    pub rollback: RollbackConfig,
    /// Static validation settings.
    pub validation: ValidationConfig,
    /// LLM backend settings for the agent orchestrator.
    pub agents: AgentsConfig,
}

/// Bounded execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Wall-clock timeout per command in milliseconds.
    pub timeout_ms: u64,
    /// Maximum captured bytes per output stream.
    pub max_buffer: usize,
    /// Include stdout/stderr in failure payloads.
    pub verbose: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_buffer: DEFAULT_MAX_BUFFER,
            verbose: false,
        }
    }
}

/// The external migration tool and its per-subcommand arguments.
///
/// The final command line is `program args_prefix... <subcommand args>...`,
/// with the migration name appended for `create`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub program: String,
    pub args_prefix: Vec<String>,
    pub create_args: Vec<String>,
    pub apply_args: Vec<String>,
    pub rollback_args: Vec<String>,
    pub validate_args: Vec<String>,
    /// Directory the tool runs in (defaults to the current directory).
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "supabase".to_string(),
            args_prefix: Vec::new(),
            create_args: vec!["migration".to_string(), "new".to_string()],
            apply_args: vec!["db".to_string(), "push".to_string()],
            rollback_args: vec!["db".to_string(), "reset".to_string()],
            validate_args: vec!["db".to_string(), "lint".to_string()],
            working_dir: None,
        }
    }
}

/// Migration file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Filesystem directories to scan for migration SQL files.
    pub locations: Vec<PathBuf>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            locations: vec![PathBuf::from("supabase/migrations")],
        }
    }
}

/// Rollback guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackConfig {
    /// Rollback runs only when this is true.
    pub allow: bool,
}

/// Static validation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Diagnostic codes to suppress (e.g. `MISSING_RLS`).
    pub disabled_rules: Vec<String>,
    /// Refuse to run the tool's validation when any migration has errors.
    pub block_on_errors: bool,
}

/// LLM backend settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentsConfig {
    /// Messages API endpoint.
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Per-task timeout when a task does not carry its own.
    pub default_timeout_ms: u64,
    /// API key; only ever read from the environment.
    pub api_key: Option<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            default_timeout_ms: 120_000,
            api_key: None,
        }
    }
}

impl fmt::Debug for AgentsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentsConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    exec: Option<TomlExecConfig>,
    tool: Option<TomlToolConfig>,
    migrations: Option<TomlMigrationSettings>,
    rollback: Option<TomlRollbackConfig>,
    validation: Option<TomlValidationConfig>,
    agents: Option<TomlAgentsConfig>,
}

#[derive(Deserialize, Default)]
struct TomlExecConfig {
    timeout_ms: Option<u64>,
    max_buffer: Option<usize>,
    verbose: Option<bool>,
}

#[derive(Deserialize, Default)]
struct TomlToolConfig {
    program: Option<String>,
    args_prefix: Option<Vec<String>>,
    create_args: Option<Vec<String>>,
    apply_args: Option<Vec<String>>,
    rollback_args: Option<Vec<String>>,
    validate_args: Option<Vec<String>>,
    working_dir: Option<String>,
}

#[derive(Deserialize, Default)]
struct TomlMigrationSettings {
    locations: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
struct TomlRollbackConfig {
    allow: Option<bool>,
}

#[derive(Deserialize, Default)]
struct TomlValidationConfig {
    disabled_rules: Option<Vec<String>>,
    block_on_errors: Option<bool>,
}

#[derive(Deserialize, Default)]
struct TomlAgentsConfig {
    endpoint: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    default_timeout_ms: Option<u64>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override migration file locations.
    pub locations: Option<Vec<PathBuf>>,
    /// Override the command timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Force verbose failure payloads.
    pub verbose: Option<bool>,
    /// Additional rule codes to disable.
    pub disabled_rules: Option<Vec<String>>,
}

impl GuardrailConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::load_with_env(config_path, overrides, &vars)
    }

    /// Same as [`GuardrailConfig::load`], reading environment variables from `vars`.
    pub fn load_with_env(
        config_path: Option<&str>,
        overrides: &CliOverrides,
        vars: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut config = GuardrailConfig::default();

        // Layer 3: TOML config file
        let toml_path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                GuardrailError::ConfigError(format!(
                    "Failed to parse config file '{}': {}",
                    toml_path, e
                ))
            })?;
            config.apply_toml(toml_config);
        } else if config_path.is_some() {
            return Err(GuardrailError::ConfigError(format!(
                "Config file '{}' not found",
                toml_path
            )));
        }

        // Layer 2: Environment variables
        config.apply_env_vars(vars);

        // Layer 1: CLI overrides
        config.apply_cli(overrides);

        config.check()?;
        Ok(config)
    }

    /// Defaults plus environment variables from `vars`, no file, no CLI.
    pub fn from_env_vars(vars: &HashMap<String, String>) -> Self {
        let mut config = GuardrailConfig::default();
        config.apply_env_vars(vars);
        config
    }

    fn check(&self) -> Result<()> {
        if self.exec.timeout_ms == 0 {
            return Err(GuardrailError::ConfigError(
                "exec.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.exec.max_buffer == 0 {
            return Err(GuardrailError::ConfigError(
                "exec.max_buffer must be greater than zero".to_string(),
            ));
        }
        if self.tool.program.trim().is_empty() {
            return Err(GuardrailError::ConfigError(
                "tool.program must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_toml(&mut self, toml: TomlConfig) {
        if let Some(e) = toml.exec {
            apply_option!(e.timeout_ms => self.exec.timeout_ms);
            apply_option!(e.max_buffer => self.exec.max_buffer);
            apply_option!(e.verbose => self.exec.verbose);
        }

        if let Some(t) = toml.tool {
            apply_option!(t.program => self.tool.program);
            apply_option!(t.args_prefix => self.tool.args_prefix);
            apply_option!(t.create_args => self.tool.create_args);
            apply_option!(t.apply_args => self.tool.apply_args);
            apply_option!(t.rollback_args => self.tool.rollback_args);
            apply_option!(t.validate_args => self.tool.validate_args);
            apply_option_some!(t.working_dir.map(PathBuf::from) => self.tool.working_dir);
        }

        if let Some(m) = toml.migrations {
            if let Some(v) = m.locations {
                self.migrations.locations = v.into_iter().map(PathBuf::from).collect();
            }
        }

        if let Some(r) = toml.rollback {
            apply_option!(r.allow => self.rollback.allow);
        }

        if let Some(v) = toml.validation {
            apply_option!(v.disabled_rules => self.validation.disabled_rules);
            apply_option!(v.block_on_errors => self.validation.block_on_errors);
        }

        if let Some(a) = toml.agents {
            apply_option!(a.endpoint => self.agents.endpoint);
            apply_option!(a.model => self.agents.model);
            apply_option!(a.max_tokens => self.agents.max_tokens);
            apply_option!(a.default_timeout_ms => self.agents.default_timeout_ms);
        }
    }

    fn apply_env_vars(&mut self, vars: &HashMap<String, String>) {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string());

        if let Some(v) = get("SKILL_EXEC_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(n) => self.exec.timeout_ms = n,
                Err(_) => log::warn!("Ignoring invalid SKILL_EXEC_TIMEOUT_MS; value={}", v),
            }
        }
        if let Some(v) = get("SKILL_EXEC_MAX_BUFFER") {
            match v.parse::<usize>() {
                Ok(n) => self.exec.max_buffer = n,
                Err(_) => log::warn!("Ignoring invalid SKILL_EXEC_MAX_BUFFER; value={}", v),
            }
        }
        if let Some(v) = get("SKILL_VERBOSE") {
            self.exec.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("ALLOW_DB_ROLLBACK") {
            self.rollback.allow = v == "1";
        }
        if let Some(v) = get("GUARDRAIL_MIGRATIONS_LOCATIONS") {
            self.migrations.locations = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        apply_option!(get("GUARDRAIL_TOOL") => self.tool.program);
        apply_option!(get("GUARDRAIL_AGENTS_ENDPOINT") => self.agents.endpoint);
        apply_option!(get("GUARDRAIL_AGENTS_MODEL") => self.agents.model);
        if let Some(v) = get("ANTHROPIC_API_KEY").filter(|v| !v.is_empty()) {
            self.agents.api_key = Some(v);
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        apply_option_clone!(overrides.locations => self.migrations.locations);
        apply_option!(overrides.timeout_ms => self.exec.timeout_ms);
        apply_option!(overrides.verbose => self.exec.verbose);
        if let Some(ref rules) = overrides.disabled_rules {
            for rule in rules {
                if !self
                    .validation
                    .disabled_rules
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(rule))
                {
                    self.validation.disabled_rules.push(rule.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = GuardrailConfig::default();
        assert_eq!(config.exec.timeout_ms, 120_000);
        assert_eq!(config.exec.max_buffer, 10 * 1024 * 1024);
        assert!(!config.exec.verbose);
        assert!(!config.rollback.allow);
        assert_eq!(config.tool.program, "supabase");
        assert_eq!(
            config.migrations.locations,
            vec![PathBuf::from("supabase/migrations")]
        );
        assert_eq!(config.agents.default_timeout_ms, 120_000);
    }

    #[test]
    fn test_env_vars() {
        let config = GuardrailConfig::from_env_vars(&vars(&[
            ("SKILL_EXEC_TIMEOUT_MS", "5000"),
            ("SKILL_EXEC_MAX_BUFFER", "2048"),
            ("SKILL_VERBOSE", "true"),
            ("ALLOW_DB_ROLLBACK", "1"),
            ("GUARDRAIL_MIGRATIONS_LOCATIONS", "db/a, db/b"),
            ("GUARDRAIL_TOOL", "npx"),
        ]));
        assert_eq!(config.exec.timeout_ms, 5000);
        assert_eq!(config.exec.max_buffer, 2048);
        assert!(config.exec.verbose);
        assert!(config.rollback.allow);
        assert_eq!(
            config.migrations.locations,
            vec![PathBuf::from("db/a"), PathBuf::from("db/b")]
        );
        assert_eq!(config.tool.program, "npx");
    }

    #[test]
    fn test_rollback_requires_exactly_one() {
        for value in ["true", "yes", "0", ""] {
            let config = GuardrailConfig::from_env_vars(&vars(&[("ALLOW_DB_ROLLBACK", value)]));
            assert!(!config.rollback.allow, "value {:?} must not allow rollback", value);
        }
    }

    #[test]
    fn test_invalid_numeric_env_is_ignored() {
        let config = GuardrailConfig::from_env_vars(&vars(&[("SKILL_EXEC_TIMEOUT_MS", "soon")]));
        assert_eq!(config.exec.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
[exec]
timeout_ms = 30000
verbose = true

[tool]
program = "npx"
args_prefix = ["supabase"]
working_dir = "app"

[migrations]
locations = ["db/migrations", "db/seeds"]

[validation]
disabled_rules = ["TYPE_CHANGE"]
block_on_errors = true

[agents]
model = "claude-haiku"
"#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let mut config = GuardrailConfig::default();
        config.apply_toml(toml_config);

        assert_eq!(config.exec.timeout_ms, 30000);
        assert!(config.exec.verbose);
        assert_eq!(config.tool.program, "npx");
        assert_eq!(config.tool.args_prefix, vec!["supabase".to_string()]);
        assert_eq!(config.tool.working_dir, Some(PathBuf::from("app")));
        assert_eq!(config.tool.apply_args, vec!["db".to_string(), "push".to_string()]);
        assert_eq!(
            config.migrations.locations,
            vec![PathBuf::from("db/migrations"), PathBuf::from("db/seeds")]
        );
        assert_eq!(config.validation.disabled_rules, vec!["TYPE_CHANGE".to_string()]);
        assert!(config.validation.block_on_errors);
        assert_eq!(config.agents.model, "claude-haiku");
    }

    #[test]
    fn test_priority_cli_over_env_over_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guardrail.toml");
        std::fs::write(&path, "[exec]\ntimeout_ms = 1000\nmax_buffer = 10\n").unwrap();

        let overrides = CliOverrides {
            timeout_ms: Some(3000),
            ..Default::default()
        };
        let config = GuardrailConfig::load_with_env(
            path.to_str(),
            &overrides,
            &vars(&[("SKILL_EXEC_TIMEOUT_MS", "2000"), ("SKILL_EXEC_MAX_BUFFER", "20")]),
        )
        .unwrap();

        assert_eq!(config.exec.timeout_ms, 3000);
        assert_eq!(config.exec.max_buffer, 20);
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = GuardrailConfig::load_with_env(
            Some("/nonexistent/guardrail.toml"),
            &CliOverrides::default(),
            &HashMap::new(),
        );
        assert!(matches!(result, Err(GuardrailError::ConfigError(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guardrail.toml");
        std::fs::write(&path, "[exec]\ntimeout_ms = 0\n").unwrap();
        let result =
            GuardrailConfig::load_with_env(path.to_str(), &CliOverrides::default(), &HashMap::new());
        assert!(matches!(result, Err(GuardrailError::ConfigError(_))));
    }

    #[test]
    fn test_cli_disabled_rules_are_merged() {
        let mut config = GuardrailConfig::default();
        config.validation.disabled_rules = vec!["MISSING_RLS".to_string()];
        config.apply_cli(&CliOverrides {
            disabled_rules: Some(vec!["missing_rls".to_string(), "TYPE_CHANGE".to_string()]),
            ..Default::default()
        });
        assert_eq!(
            config.validation.disabled_rules,
            vec!["MISSING_RLS".to_string(), "TYPE_CHANGE".to_string()]
        );
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let config = GuardrailConfig::from_env_vars(&vars(&[("ANTHROPIC_API_KEY", "sk-secret")]));
        assert_eq!(config.agents.api_key.as_deref(), Some("sk-secret"));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
