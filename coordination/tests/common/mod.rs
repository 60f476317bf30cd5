//! Shared fixtures: a tiny "vulnerable" codebase and scripted reviewers.
//!
//! The codebase is a single `guard.txt`. The PoC fails (non-zero exit)
//! until the file contains `fixed`; the regression suite requires `api`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use hardening_coordination::provider::{PromptContext, ProviderError, ProviderGateway, Task};
use hardening_coordination::ticket::{CodeLocation, Finding, ReviewerId, Severity};
use hardening_coordination::{
    CommandRunner, EngineConfig, EscalationPolicy, MemoryTicketStore, Orchestrator,
    SharedProvider, SharedTicketStore, WorkspaceManager, WorkspaceSource,
};

pub const POC_SCRIPT: &str = "grep -q fixed guard.txt";
pub const REGRESSION_SCRIPT: &str = "grep -q api guard.txt";

/// Correct fix: closes the hole, keeps the API.
pub const FIX_GOOD: &str = "fixed api\n";
/// Closes the hole but breaks the regression suite.
pub const FIX_BREAKS_API: &str = "fixed\n";
/// Leaves the hole open.
pub const FIX_NOOP: &str = "vulnerable api\n";

pub fn finding(severity: Severity) -> Finding {
    Finding {
        location: CodeLocation::new("guard.txt", 1),
        category: "missing-bounds-check".into(),
        severity,
        description: "guard is not enforced".into(),
        cwe: Some("CWE-787".into()),
        code_snippet: None,
        tool: Some("scanner".into()),
    }
}

pub fn poc_response(script: &str) -> String {
    serde_json::json!({
        "argv": ["sh", "-c", script],
        "expected": { "kind": "non_zero_exit" },
        "description": "guard check fails while the file is unpatched",
    })
    .to_string()
}

pub fn hypothesis_response() -> String {
    format!(
        "The root cause:\n```json\n{}\n```",
        serde_json::json!({
            "root_cause": "guard.txt never enables the guard",
            "locations": [{ "file": "guard.txt", "start_line": 1 }],
        })
    )
}

pub fn proposal_response(contents: &str, rationale: &str, complexity: u8) -> String {
    serde_json::json!({
        "patch": { "kind": "file_replacements", "files": { "guard.txt": contents } },
        "rationale": rationale,
        "complexity": complexity,
    })
    .to_string()
}

/// A reviewer that answers from a script.
pub struct ScriptedReviewer {
    id: ReviewerId,
    poc: Option<String>,
    proposal: Option<String>,
    /// Votes put proposals whose rationale contains this first
    prefers: Option<String>,
    pub calls: Mutex<Vec<Task>>,
}

impl ScriptedReviewer {
    pub fn new(id: &str) -> Self {
        Self {
            id: ReviewerId::new(id),
            poc: Some(poc_response(POC_SCRIPT)),
            proposal: None,
            prefers: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn poc(mut self, raw: impl Into<String>) -> Self {
        self.poc = Some(raw.into());
        self
    }

    pub fn proposes(mut self, contents: &str, rationale: &str, complexity: u8) -> Self {
        self.proposal = Some(proposal_response(contents, rationale, complexity));
        self
    }

    pub fn raw_proposal(mut self, raw: impl Into<String>) -> Self {
        self.proposal = Some(raw.into());
        self
    }

    pub fn prefers(mut self, needle: &str) -> Self {
        self.prefers = Some(needle.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn count(&self, task: Task) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| **t == task).count()
    }
}

#[async_trait]
impl ProviderGateway for ScriptedReviewer {
    fn reviewer_id(&self) -> ReviewerId {
        self.id.clone()
    }

    async fn invoke(&self, ctx: &PromptContext) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(ctx.task);
        match ctx.task {
            Task::ProofOfConcept => self
                .poc
                .clone()
                .ok_or_else(|| ProviderError::Unavailable("no PoC scripted".into())),
            Task::Hypothesis => Ok(hypothesis_response()),
            Task::Proposal => self
                .proposal
                .clone()
                .ok_or_else(|| ProviderError::RequestFailed("no proposal scripted".into())),
            Task::Vote => {
                let mut ranked: Vec<(bool, String)> = ctx
                    .proposals
                    .iter()
                    .map(|p| {
                        let liked = self
                            .prefers
                            .as_deref()
                            .is_some_and(|needle| p.rationale.contains(needle));
                        (!liked, p.token.clone())
                    })
                    .collect();
                ranked.sort();
                let ranking: Vec<String> = ranked.into_iter().map(|(_, token)| token).collect();
                Ok(serde_json::json!({ "ranking": ranking }).to_string())
            }
        }
    }
}

pub fn as_shared(reviewers: &[Arc<ScriptedReviewer>]) -> Vec<SharedProvider> {
    reviewers
        .iter()
        .map(|r| r.clone() as SharedProvider)
        .collect()
}

/// A plain-directory codebase plus somewhere to put workspaces.
pub struct Fixture {
    pub codebase: TempDir,
    pub scratch: TempDir,
    pub store: SharedTicketStore,
}

impl Fixture {
    pub fn new() -> Self {
        let codebase = tempfile::tempdir().unwrap();
        std::fs::write(codebase.path().join("guard.txt"), FIX_NOOP).unwrap();
        Self {
            codebase,
            scratch: tempfile::tempdir().unwrap(),
            store: Arc::new(MemoryTicketStore::new()),
        }
    }

    pub fn with_store(mut self, store: SharedTicketStore) -> Self {
        self.store = store;
        self
    }

    pub fn workspace_base(&self) -> std::path::PathBuf {
        self.scratch.path().join("workspaces")
    }

    pub fn workspaces(&self) -> WorkspaceManager {
        WorkspaceManager::new(
            self.workspace_base(),
            WorkspaceSource::Directory {
                root: self.codebase.path().to_path_buf(),
            },
        )
        .unwrap()
    }

    pub fn engine(&self, reviewers: &[Arc<ScriptedReviewer>], config: EngineConfig) -> Orchestrator {
        let runner = CommandRunner::new(config.runner_config());
        Orchestrator::builder(self.store.clone(), self.workspaces(), runner, as_shared(reviewers))
            .config(config)
            .consensus_salt(b"fixed-salt".to_vec())
            .build()
            .unwrap()
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        command_timeout_secs: 10,
        provider_timeout_secs: 10,
        regression_argv: vec!["sh".into(), "-c".into(), REGRESSION_SCRIPT.into()],
        max_concurrency: 4,
        escalation: EscalationPolicy {
            council_size: 3,
            council_growth: 1,
            max_escalations: 1,
        },
        ..EngineConfig::default()
    }
}

/// Leftover entries under the workspace base, ignoring empty ticket dirs.
pub fn leftover_workspaces(base: &Path) -> Vec<std::path::PathBuf> {
    let Ok(tickets) = std::fs::read_dir(base) else {
        return Vec::new();
    };
    tickets
        .flatten()
        .filter(|e| e.path().is_dir())
        .flat_map(|ticket| std::fs::read_dir(ticket.path()).into_iter().flatten().flatten())
        .map(|e| e.path())
        .collect()
}
