//! Core data model for hardening tickets
//!
//! These types are persisted as part of the ticket record and exchanged
//! with reviewers. Every struct tolerates unknown fields on load so older
//! engines can read records written by newer ones.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::runner::{ExecutionResult, Outcome};
use crate::scoring::FixScore;

/// Unique identifier for tickets
pub type TicketId = String;

/// Identity of one council member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(String);

impl ReviewerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe form used in workspace paths.
    pub fn path_component(&self) -> String {
        sanitize_component(&self.0)
    }
}

impl std::fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReviewerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Keep alphanumerics, `-` and `_`; everything else becomes `_`.
pub(crate) fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Finding
// ============================================================================

/// Severity reported by the static-analysis tool
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight used by the exploitability assessment
    pub fn factor(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.5,
            Self::Low => 0.2,
            Self::Info => 0.1,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A file and inclusive 1-based line range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeLocation {
    pub file: String,
    pub start_line: u32,
    #[serde(default)]
    pub end_line: Option<u32>,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, start_line: u32) -> Self {
        Self {
            file: file.into(),
            start_line,
            end_line: None,
        }
    }

    pub fn end(&self) -> u32 {
        self.end_line.unwrap_or(self.start_line).max(self.start_line)
    }

    /// Relative path that stays inside the workspace root.
    pub fn is_contained(&self) -> bool {
        is_contained_path(&self.file)
    }
}

impl std::fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end_line {
            Some(end) if end > self.start_line => {
                write!(f, "{}:{}-{}", self.file, self.start_line, end)
            }
            _ => write!(f, "{}:{}", self.file, self.start_line),
        }
    }
}

/// Relative, non-empty, and free of `..` or root components.
pub(crate) fn is_contained_path(raw: &str) -> bool {
    let path = Path::new(raw);
    !raw.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Structured finding produced by external static-analysis tooling
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    /// Where the issue was flagged
    pub location: CodeLocation,
    /// Rule identifier or category (e.g. `c.lang.security.strcpy`)
    pub category: String,
    pub severity: Severity,
    pub description: String,
    /// CWE identifier when the rule maps to one
    #[serde(default)]
    pub cwe: Option<String>,
    /// Snippet reported by the tool, if any
    #[serde(default)]
    pub code_snippet: Option<String>,
    /// Tool that produced the finding
    #[serde(default)]
    pub tool: Option<String>,
}

impl Finding {
    /// Exploitability estimate in 0..=100
    ///
    /// Mean of the severity factor, whether the rule maps to a known CWE,
    /// and whether a PoC has been confirmed.
    pub fn exploitability_score(&self, poc_confirmed: bool) -> f64 {
        let cwe_known = if self.cwe.is_some() { 1.0 } else { 0.7 };
        let poc = if poc_confirmed { 1.0 } else { 0.5 };
        let score = (self.severity.factor() + cwe_known + poc) / 3.0 * 100.0;
        (score * 100.0).round() / 100.0
    }
}

// ============================================================================
// Proof of concept
// ============================================================================

/// How a PoC declares the vulnerability to be observable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedFailure {
    /// Any non-zero exit code
    NonZeroExit,
    /// A specific exit code
    ExitCode { code: i32 },
    /// Output (stdout or stderr) contains a signature
    OutputContains { pattern: String },
}

/// Executable artifact plus its expected-failure contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocContract {
    pub argv: Vec<String>,
    pub expected: ExpectedFailure,
    /// Overrides the engine-wide command timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub description: String,
    pub author: ReviewerId,
    pub created_at: DateTime<Utc>,
}

impl PocContract {
    fn violation_observed(&self, result: &ExecutionResult) -> bool {
        match &self.expected {
            ExpectedFailure::NonZeroExit => result.exit_code.is_some_and(|c| c != 0),
            ExpectedFailure::ExitCode { code } => result.exit_code == Some(*code),
            ExpectedFailure::OutputContains { pattern } => {
                result.combined_output().contains(pattern.as_str())
            }
        }
    }

    /// The run completed and showed the declared failure.
    pub fn demonstrates(&self, result: &ExecutionResult) -> bool {
        result.outcome == Outcome::Completed && self.violation_observed(result)
    }

    /// The run completed cleanly and the failure signature is gone.
    pub fn passes(&self, result: &ExecutionResult) -> bool {
        result.succeeded() && !self.violation_observed(result)
    }
}

/// Root-cause hypothesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub root_cause: String,
    pub locations: Vec<CodeLocation>,
    pub author: ReviewerId,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Proposals and validation
// ============================================================================

/// Candidate change to the codebase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatchSet {
    /// A unified diff applied with `git apply`
    UnifiedDiff { diff: String },
    /// Whole-file replacements keyed by relative path
    FileReplacements { files: BTreeMap<String, String> },
}

impl PatchSet {
    /// Text shown to reviewers and emitted in decision records.
    pub fn render(&self) -> String {
        match self {
            Self::UnifiedDiff { diff } => diff.clone(),
            Self::FileReplacements { files } => files
                .iter()
                .map(|(path, content)| format!("=== {path} ===\n{content}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::UnifiedDiff { diff } => diff.trim().is_empty(),
            Self::FileReplacements { files } => files.is_empty(),
        }
    }
}

/// A reviewer's candidate fix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub author: ReviewerId,
    pub patch: PatchSet,
    pub rationale: String,
    /// Self-reported complexity, 1 (trivial) to 10
    pub complexity: u8,
    pub created_at: DateTime<Utc>,
}

/// Result of one council member re-running the PoC
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproductionRecord {
    pub reviewer: ReviewerId,
    /// Escalation level this run belongs to
    pub level: u32,
    /// `None` when the workspace could not be provisioned
    pub result: Option<ExecutionResult>,
    pub reproduced: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// One validation run for a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationRun {
    Executed { result: ExecutionResult },
    /// Could not run at all (provisioning or patch application failed)
    NotRun { reason: String },
}

impl ValidationRun {
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::Executed { result } => Some(result),
            Self::NotRun { .. } => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Executed { result } => result.summary(),
            Self::NotRun { reason } => format!("not run: {reason}"),
        }
    }
}

/// Post-validation record for one proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub reviewer: ReviewerId,
    /// "PoC now passes" run
    pub poc: ValidationRun,
    /// "Existing suite still passes" run
    pub regression: ValidationRun,
    pub poc_passed: bool,
    pub regression_passed: bool,
    /// Objective score of the applied patch; absent when it never applied
    #[serde(default)]
    pub score: Option<FixScore>,
}

/// A reviewer's ranking over anonymized proposal tokens, best first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: ReviewerId,
    pub ranking: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Why a proposal was removed before peer review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionGate {
    PocStillFails,
    RegressionFailed,
}

impl std::fmt::Display for ExclusionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PocStillFails => write!(f, "poc_still_fails"),
            Self::RegressionFailed => write!(f, "regression_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub reviewer: ReviewerId,
    pub gate: ExclusionGate,
    pub detail: String,
}

/// Persisted outcome of a consensus round
///
/// Only the winning token is linked back to its author; the rest of the
/// tally stays anonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub winning_token: Option<String>,
    pub winner: Option<ReviewerId>,
    /// Borda points per token
    pub tally: BTreeMap<String, u32>,
    pub exclusions: Vec<Exclusion>,
    pub votes_counted: usize,
    pub decided_at: DateTime<Utc>,
}

// ============================================================================
// Escalation and abandonment
// ============================================================================

/// Escalation bookkeeping for the unanimity gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    /// Number of escalations performed so far
    pub level: u32,
    /// Current council size
    pub council_size: usize,
}

/// Machine-readable reason a ticket was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// No PoC demonstrated the finding within the attempt budget
    PocNotReproduced,
    /// No valid hypothesis within the attempt budget
    HypothesisUnavailable,
    /// Unanimity gate kept failing after the last escalation
    EscalationExhausted,
    /// No council member supplied a valid proposal
    NoProposals,
    /// No proposal survived the correctness and regression gates
    NoAcceptableFix,
    /// Ticket-level cancellation
    Cancelled,
    /// Abandoned by an operator
    Operator,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PocNotReproduced => write!(f, "POC_NOT_REPRODUCED"),
            Self::HypothesisUnavailable => write!(f, "HYPOTHESIS_UNAVAILABLE"),
            Self::EscalationExhausted => write!(f, "ESCALATION_EXHAUSTED"),
            Self::NoProposals => write!(f, "NO_PROPOSALS"),
            Self::NoAcceptableFix => write!(f, "NO_ACCEPTABLE_FIX"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Operator => write!(f, "OPERATOR"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Abandonment {
    pub code: ReasonCode,
    pub summary: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Termination;

    fn result(code: Option<i32>, outcome: Outcome, stdout: &str) -> ExecutionResult {
        ExecutionResult {
            argv: vec!["./poc".into()],
            exit_code: code,
            stdout: stdout.into(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration_ms: 1,
            outcome,
            termination: (outcome == Outcome::TimedOut).then_some(Termination::Timeout),
            started_at: Utc::now(),
        }
    }

    fn contract(expected: ExpectedFailure) -> PocContract {
        PocContract {
            argv: vec!["./poc".into()],
            expected,
            timeout_secs: None,
            description: String::new(),
            author: ReviewerId::new("r1"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_non_zero_exit_contract() {
        let poc = contract(ExpectedFailure::NonZeroExit);
        assert!(poc.demonstrates(&result(Some(139), Outcome::Completed, "")));
        assert!(!poc.demonstrates(&result(Some(0), Outcome::Completed, "")));
        assert!(poc.passes(&result(Some(0), Outcome::Completed, "")));
    }

    #[test]
    fn test_timeout_never_demonstrates() {
        let poc = contract(ExpectedFailure::NonZeroExit);
        assert!(!poc.demonstrates(&result(None, Outcome::TimedOut, "")));
        assert!(!poc.passes(&result(None, Outcome::TimedOut, "")));
    }

    #[test]
    fn test_output_signature_contract() {
        let poc = contract(ExpectedFailure::OutputContains {
            pattern: "AddressSanitizer".into(),
        });
        let hit = result(Some(0), Outcome::Completed, "==1==ERROR: AddressSanitizer");
        assert!(poc.demonstrates(&hit));
        assert!(!poc.passes(&hit), "signature still present");
        assert!(poc.passes(&result(Some(0), Outcome::Completed, "clean")));
    }

    #[test]
    fn test_exit_code_contract() {
        let poc = contract(ExpectedFailure::ExitCode { code: 42 });
        assert!(poc.demonstrates(&result(Some(42), Outcome::Completed, "")));
        assert!(!poc.demonstrates(&result(Some(1), Outcome::Completed, "")));
    }

    #[test]
    fn test_exploitability_score() {
        let finding = Finding {
            location: CodeLocation::new("src/main.c", 42),
            category: "strcpy".into(),
            severity: Severity::Critical,
            description: "Buffer overflow in strcpy".into(),
            cwe: Some("CWE-120".into()),
            code_snippet: None,
            tool: None,
        };
        assert_eq!(finding.exploitability_score(true), 100.0);
        assert_eq!(finding.exploitability_score(false), 83.33);
    }

    #[test]
    fn test_contained_paths() {
        assert!(CodeLocation::new("src/lib.rs", 1).is_contained());
        assert!(!CodeLocation::new("../etc/passwd", 1).is_contained());
        assert!(!CodeLocation::new("/etc/passwd", 1).is_contained());
        assert!(!CodeLocation::new("", 1).is_contained());
    }

    #[test]
    fn test_reviewer_path_component() {
        assert_eq!(ReviewerId::new("gpt/5 mini").path_component(), "gpt_5_mini");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
    }
}
