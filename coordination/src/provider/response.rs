//! Strict parsing of reviewer responses
//!
//! Responses are JSON, optionally inside a fenced code block. Anything that
//! does not deserialize into the expected shape, carries unknown fields, or
//! violates the domain checks below is rejected (fail-closed).

use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use super::Task;
use crate::ticket::types::is_contained_path;
use crate::ticket::{
    CodeLocation, ExpectedFailure, Hypothesis, PatchSet, PocContract, Proposal, ReviewerId, Vote,
};

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("no JSON object found in response")]
    NoJson,

    #[error("response does not match schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("response rejected: {0}")]
    Invalid(String),
}

/// PoC generation response
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PocResponse {
    /// Command that exercises the vulnerability, run from the workspace root
    pub argv: Vec<String>,
    /// How the failure is observed
    pub expected: ExpectedFailure,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub description: String,
}

/// Root-cause hypothesis response
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HypothesisResponse {
    pub root_cause: String,
    pub locations: Vec<CodeLocation>,
}

/// Fix proposal response
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProposalResponse {
    pub patch: PatchSet,
    pub rationale: String,
    /// 1 (trivial) to 10
    pub complexity: u8,
}

/// Peer-review response: every token, best first
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct VoteResponse {
    pub ranking: Vec<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// JSON schema a response to `task` must satisfy
pub fn schema_for_task(task: Task) -> serde_json::Value {
    let schema = match task {
        Task::ProofOfConcept => schemars::schema_for!(PocResponse),
        Task::Hypothesis => schemars::schema_for!(HypothesisResponse),
        Task::Proposal => schemars::schema_for!(ProposalResponse),
        Task::Vote => schemars::schema_for!(VoteResponse),
    };
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)```").ok())
        .as_ref()
}

/// The JSON payload of a raw response.
///
/// Prefers a fenced block; otherwise the outermost `{ ... }` span.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(captures) = fence_regex().and_then(|re| re.captures(raw)) {
        if let Some(body) = captures.get(1) {
            return Some(body.as_str().trim());
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Deserialize the JSON payload of `raw` into `T`.
pub fn parse<T: DeserializeOwned>(raw: &str) -> Result<T, ResponseError> {
    let json = extract_json(raw).ok_or(ResponseError::NoJson)?;
    Ok(serde_json::from_str(json)?)
}

fn invalid(msg: impl Into<String>) -> ResponseError {
    ResponseError::Invalid(msg.into())
}

pub fn parse_poc(raw: &str, author: &ReviewerId) -> Result<PocContract, ResponseError> {
    let response: PocResponse = parse(raw)?;
    match response.argv.first() {
        None => return Err(invalid("argv is empty")),
        Some(program) if program.trim().is_empty() => return Err(invalid("argv[0] is blank")),
        Some(_) => {}
    }
    if response.timeout_secs == Some(0) {
        return Err(invalid("timeout_secs must be positive"));
    }
    if let ExpectedFailure::OutputContains { pattern } = &response.expected {
        if pattern.is_empty() {
            return Err(invalid("output signature is empty"));
        }
    }
    Ok(PocContract {
        argv: response.argv,
        expected: response.expected,
        timeout_secs: response.timeout_secs,
        description: response.description,
        author: author.clone(),
        created_at: Utc::now(),
    })
}

pub fn parse_hypothesis(raw: &str, author: &ReviewerId) -> Result<Hypothesis, ResponseError> {
    let response: HypothesisResponse = parse(raw)?;
    if response.root_cause.trim().is_empty() {
        return Err(invalid("root_cause is empty"));
    }
    if response.locations.is_empty() {
        return Err(invalid("at least one location is required"));
    }
    if let Some(bad) = response.locations.iter().find(|l| !l.is_contained()) {
        return Err(invalid(format!("location outside the codebase: {}", bad.file)));
    }
    Ok(Hypothesis {
        root_cause: response.root_cause.trim().to_string(),
        locations: response.locations,
        author: author.clone(),
        created_at: Utc::now(),
    })
}

pub fn parse_proposal(raw: &str, author: &ReviewerId) -> Result<Proposal, ResponseError> {
    let response: ProposalResponse = parse(raw)?;
    if !(1..=10).contains(&response.complexity) {
        return Err(invalid(format!(
            "complexity {} outside 1..=10",
            response.complexity
        )));
    }
    if response.rationale.trim().is_empty() {
        return Err(invalid("rationale is empty"));
    }
    if response.patch.is_empty() {
        return Err(invalid("patch is empty"));
    }
    if let PatchSet::FileReplacements { files } = &response.patch {
        if let Some(bad) = files.keys().find(|p| !is_contained_path(p)) {
            return Err(invalid(format!("path outside the codebase: {bad}")));
        }
    }
    Ok(Proposal {
        author: author.clone(),
        patch: response.patch,
        rationale: response.rationale,
        complexity: response.complexity,
        created_at: Utc::now(),
    })
}

/// Structural check only; token membership is checked by the consensus round.
pub fn parse_vote(raw: &str, voter: &ReviewerId) -> Result<Vote, ResponseError> {
    let response: VoteResponse = parse(raw)?;
    Ok(Vote {
        voter: voter.clone(),
        ranking: response.ranking,
        comment: response.comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> ReviewerId {
        ReviewerId::new("reviewer-a")
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here is the PoC:\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(raw), Some("{\"a\": 1}"));
        let bare = "```\n{\"b\": 2}\n```";
        assert_eq!(extract_json(bare), Some("{\"b\": 2}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_poc() {
        let raw = r#"```json
{"argv": ["sh", "-c", "./poc.sh"], "expected": {"kind": "non_zero_exit"}, "description": "overflow"}
```"#;
        let poc = parse_poc(raw, &me()).unwrap();
        assert_eq!(poc.argv[0], "sh");
        assert_eq!(poc.expected, ExpectedFailure::NonZeroExit);
        assert_eq!(poc.author, me());
    }

    #[test]
    fn test_poc_rejects_unknown_fields_and_empty_argv() {
        let extra = r#"{"argv": ["x"], "expected": {"kind": "non_zero_exit"}, "description": "", "shell": true}"#;
        assert!(matches!(parse_poc(extra, &me()), Err(ResponseError::Schema(_))));
        let empty = r#"{"argv": [], "expected": {"kind": "non_zero_exit"}, "description": ""}"#;
        assert!(matches!(parse_poc(empty, &me()), Err(ResponseError::Invalid(_))));
    }

    #[test]
    fn test_hypothesis_requires_location() {
        let none = r#"{"root_cause": "unchecked length", "locations": []}"#;
        assert!(parse_hypothesis(none, &me()).is_err());
        let blank = r#"{"root_cause": "  ", "locations": [{"file": "a.c", "start_line": 3}]}"#;
        assert!(parse_hypothesis(blank, &me()).is_err());
        let ok = r#"{"root_cause": "unchecked length", "locations": [{"file": "a.c", "start_line": 3}]}"#;
        let hypothesis = parse_hypothesis(ok, &me()).unwrap();
        assert_eq!(hypothesis.locations.len(), 1);
    }

    #[test]
    fn test_proposal_bounds() {
        let too_complex = r#"{"patch": {"kind": "unified_diff", "diff": "x"}, "rationale": "r", "complexity": 11}"#;
        assert!(parse_proposal(too_complex, &me()).is_err());
        let escaping = r#"{"patch": {"kind": "file_replacements", "files": {"../x": "y"}}, "rationale": "r", "complexity": 2}"#;
        assert!(parse_proposal(escaping, &me()).is_err());
        let ok = r#"{"patch": {"kind": "file_replacements", "files": {"src/a.c": "y"}}, "rationale": "bounds check", "complexity": 2}"#;
        assert_eq!(parse_proposal(ok, &me()).unwrap().complexity, 2);
    }

    #[test]
    fn test_vote_shape() {
        let vote = parse_vote(r#"{"ranking": ["t1", "t2"]}"#, &me()).unwrap();
        assert_eq!(vote.ranking, vec!["t1", "t2"]);
        assert!(matches!(
            parse_vote("I prefer the first one", &me()),
            Err(ResponseError::NoJson)
        ));
    }

    #[test]
    fn test_schemas_are_objects() {
        for task in [Task::ProofOfConcept, Task::Hypothesis, Task::Proposal, Task::Vote] {
            assert!(schema_for_task(task).is_object());
        }
    }
}
