//! Engine configuration
//!
//! Layered the usual way: [`EngineConfig::default`], then a TOML file,
//! then `HARDENING_*` environment overrides. Call
//! [`EngineConfig::validate`] before handing the result to the engine.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::runner::RunnerConfig;
use crate::scoring::ScoringPolicy;
use crate::ticket::Severity;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the council grows when the unanimity gate fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Initial council size (capped by the number of reviewers)
    pub council_size: usize,
    /// Members added per escalation
    pub council_growth: usize,
    /// Escalations allowed before the ticket is abandoned
    pub max_escalations: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            council_size: 3,
            council_growth: 1,
            max_escalations: 2,
        }
    }
}

/// Configuration for the hardening engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Findings below this severity are rejected at intake
    pub min_severity: Severity,
    /// PoC generation attempts before abandoning
    pub poc_attempts: u32,
    /// Hypothesis attempts before abandoning
    pub hypothesis_attempts: u32,
    /// Per-command timeout; also the ceiling for a PoC's own timeout
    pub command_timeout_secs: u64,
    /// Deadline for a single reviewer response
    pub provider_timeout_secs: u64,
    /// The existing test suite, run against every proposal
    pub regression_argv: Vec<String>,
    /// Source ref every workspace forks from
    pub source_ref: String,
    /// Bound on concurrent sub-operations per fan-out step
    pub max_concurrency: usize,
    /// Reload-and-retry budget for stale writes
    pub max_stale_retries: u32,
    /// Per-stream capture limit
    pub output_limit_bytes: usize,
    /// Grace period for reaping a killed process group
    pub reap_grace_ms: u64,
    /// Extra environment variables passed to commands
    pub env_passthrough: Vec<String>,
    /// Lines of context around the flagged location in prompts
    pub excerpt_radius: u32,
    pub escalation: EscalationPolicy,
    /// Objective fix scoring weights and acceptance threshold
    pub scoring: ScoringPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            min_severity: Severity::Info,
            poc_attempts: 3,
            hypothesis_attempts: 2,
            command_timeout_secs: 120,
            provider_timeout_secs: 300,
            regression_argv: vec!["make".to_string(), "test".to_string()],
            source_ref: "HEAD".to_string(),
            max_concurrency: 4,
            max_stale_retries: 3,
            output_limit_bytes: runner.output_limit_bytes,
            reap_grace_ms: runner.reap_grace_ms,
            env_passthrough: runner.env_passthrough,
            excerpt_radius: 10,
            escalation: EscalationPolicy::default(),
            scoring: ScoringPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with `HARDENING_*` environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Unparseable numbers are logged and ignored; a regression command
    /// that does not split into words is an error.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse_into<T: FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            slot: &mut T,
        ) {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse() {
                    Ok(value) => *slot = value,
                    Err(_) => warn!(key, value = %raw, "ignoring unparseable override"),
                }
            }
        }

        parse_into(&lookup, "HARDENING_MIN_SEVERITY", &mut self.min_severity);
        parse_into(&lookup, "HARDENING_POC_ATTEMPTS", &mut self.poc_attempts);
        parse_into(&lookup, "HARDENING_HYPOTHESIS_ATTEMPTS", &mut self.hypothesis_attempts);
        parse_into(&lookup, "HARDENING_COMMAND_TIMEOUT_SECS", &mut self.command_timeout_secs);
        parse_into(&lookup, "HARDENING_PROVIDER_TIMEOUT_SECS", &mut self.provider_timeout_secs);
        parse_into(&lookup, "HARDENING_MAX_CONCURRENCY", &mut self.max_concurrency);
        parse_into(&lookup, "HARDENING_MAX_STALE_RETRIES", &mut self.max_stale_retries);
        parse_into(&lookup, "HARDENING_OUTPUT_LIMIT_BYTES", &mut self.output_limit_bytes);
        parse_into(&lookup, "HARDENING_REAP_GRACE_MS", &mut self.reap_grace_ms);
        parse_into(&lookup, "HARDENING_EXCERPT_RADIUS", &mut self.excerpt_radius);
        parse_into(&lookup, "HARDENING_COUNCIL_SIZE", &mut self.escalation.council_size);
        parse_into(&lookup, "HARDENING_COUNCIL_GROWTH", &mut self.escalation.council_growth);
        parse_into(&lookup, "HARDENING_MAX_ESCALATIONS", &mut self.escalation.max_escalations);
        parse_into(
            &lookup,
            "HARDENING_ACCEPTANCE_THRESHOLD",
            &mut self.scoring.acceptance_threshold,
        );

        if let Some(source_ref) = lookup("HARDENING_SOURCE_REF") {
            self.source_ref = source_ref;
        }
        if let Some(cmd) = lookup("HARDENING_REGRESSION_CMD") {
            self.regression_argv = split_command(&cmd)?;
        }
        if let Some(vars) = lookup("HARDENING_ENV_PASSTHROUGH") {
            self.env_passthrough = vars
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.poc_attempts == 0 {
            return invalid("poc_attempts must be at least 1");
        }
        if self.hypothesis_attempts == 0 {
            return invalid("hypothesis_attempts must be at least 1");
        }
        if self.command_timeout_secs == 0 {
            return invalid("command_timeout_secs must be positive");
        }
        if self.provider_timeout_secs == 0 {
            return invalid("provider_timeout_secs must be positive");
        }
        if self.regression_argv.is_empty() {
            return invalid("regression_argv must name a command");
        }
        if self.source_ref.trim().is_empty() {
            return invalid("source_ref must not be empty");
        }
        if self.max_concurrency == 0 {
            return invalid("max_concurrency must be at least 1");
        }
        if self.output_limit_bytes == 0 {
            return invalid("output_limit_bytes must be positive");
        }
        if self.escalation.council_size == 0 {
            return invalid("escalation.council_size must be at least 1");
        }
        self.scoring.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Timeout for a PoC run. A contract may shorten the command timeout
    /// but never extend it.
    pub fn poc_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let limit = self.command_timeout();
        requested_secs
            .map(Duration::from_secs)
            .map_or(limit, |requested| requested.min(limit))
    }

    /// Runner settings derived from this config
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            output_limit_bytes: self.output_limit_bytes,
            reap_grace_ms: self.reap_grace_ms,
            env_passthrough: self.env_passthrough.clone(),
        }
    }
}

/// Split a shell-quoted command line into an argv.
fn split_command(cmd: &str) -> Result<Vec<String>, ConfigError> {
    match shlex::split(cmd) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        Some(_) => Err(ConfigError::Invalid(
            "HARDENING_REGRESSION_CMD is empty".to_string(),
        )),
        None => Err(ConfigError::Invalid(format!(
            "HARDENING_REGRESSION_CMD has unbalanced quoting: {cmd}"
        ))),
    }
}
