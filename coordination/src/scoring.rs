//! Objective fix scoring
//!
//! Every validated proposal gets a 0-100 score from the code it touches,
//! independent of the votes: how much control flow it adds, what new
//! imports it pulls in, how many lines it moves, whether it carries tests
//! and how readable the new lines are. Consensus uses the score as the
//! first tie-break after Borda points; the acceptance threshold is
//! advisory and only logged.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Libraries whose introduction is penalized as a heavy dependency
const HEAVY_LIBS: &[&str] = &[
    "tensorflow",
    "torch",
    "pandas",
    "numpy",
    "scipy",
    "windows.h",
    "mach/mach.h",
    "complex.h",
    "boost",
    "qt",
    "wx",
    "opencv2",
];

const TEST_INDICATORS: &[&str] = &[
    "assert",
    "unittest",
    "pytest",
    "def test_",
    "TEST(",
    "CHECK(",
    "CU_ASSERT",
    "BOOST_TEST",
    "@Test",
    "#[test]",
];

/// Relative weight of each criterion; must sum to 1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub complexity: f64,
    pub dependencies: f64,
    pub loc_delta: f64,
    pub test_coverage: f64,
    pub beauty: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            complexity: 0.25,
            dependencies: 0.20,
            loc_delta: 0.15,
            test_coverage: 0.25,
            beauty: 0.15,
        }
    }
}

impl ScoreWeights {
    fn all(&self) -> [f64; 5] {
        [
            self.complexity,
            self.dependencies,
            self.loc_delta,
            self.test_coverage,
            self.beauty,
        ]
    }
}

/// Weights plus the score a fix should reach to count as acceptable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub weights: ScoreWeights,
    pub acceptance_threshold: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            acceptance_threshold: 70.0,
        }
    }
}

impl ScoringPolicy {
    /// Check weights and threshold; the error names the offending field.
    pub fn validate(&self) -> Result<(), String> {
        let weights = self.weights.all();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("scoring weights must be non-negative".to_string());
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(format!("scoring weights must sum to 1, got {sum:.3}"));
        }
        if !(0.0..=100.0).contains(&self.acceptance_threshold) {
            return Err("scoring.acceptance_threshold must be within 0..=100".to_string());
        }
        Ok(())
    }
}

/// Per-criterion scores and their weighted total
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixScore {
    pub total: f64,
    pub complexity: f64,
    pub dependencies: f64,
    pub loc_delta: f64,
    pub test_coverage: f64,
    pub beauty: f64,
    /// Total reached the acceptance threshold
    pub passed: bool,
}

/// The code a patch replaces and the code it introduces
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSides {
    pub before: String,
    pub after: String,
}

impl PatchSides {
    /// Removed and added lines of a unified diff, file headers skipped.
    pub fn from_diff(diff: &str) -> Self {
        let mut sides = Self::default();
        let mut lines = diff.lines().peekable();
        while let Some(line) = lines.next() {
            if line.starts_with("--- ") && lines.peek().is_some_and(|n| n.starts_with("+++ ")) {
                lines.next();
                continue;
            }
            if let Some(removed) = line.strip_prefix('-') {
                sides.before.push_str(removed);
                sides.before.push('\n');
            } else if let Some(added) = line.strip_prefix('+') {
                sides.after.push_str(added);
                sides.after.push('\n');
            }
        }
        sides
    }

    /// Append another file's sides.
    pub fn extend(&mut self, before: &str, after: &str) {
        push_block(&mut self.before, before);
        push_block(&mut self.after, after);
    }
}

fn push_block(buf: &mut String, block: &str) {
    buf.push_str(block);
    if !block.is_empty() && !block.ends_with('\n') {
        buf.push('\n');
    }
}

/// Score a patch against `policy`.
pub fn score_fix(sides: &PatchSides, policy: &ScoringPolicy) -> FixScore {
    let complexity = complexity_score(&sides.after);
    let dependencies = dependency_score(&sides.before, &sides.after);
    let loc_delta = loc_delta_score(&sides.before, &sides.after);
    let test_coverage = test_coverage_score(&sides.after);
    let beauty = beauty_score(&sides.after);

    let w = &policy.weights;
    let raw = complexity * w.complexity
        + dependencies * w.dependencies
        + loc_delta * w.loc_delta
        + test_coverage * w.test_coverage
        + beauty * w.beauty;
    let total = (raw * 100.0).round() / 100.0;

    FixScore {
        total,
        complexity,
        dependencies,
        loc_delta,
        test_coverage,
        beauty,
        passed: total >= policy.acceptance_threshold,
    }
}

/// 100 for values at or under the first bound, stepping down by 20.
fn tiered(value: f64, bounds: [f64; 4]) -> f64 {
    bounds
        .iter()
        .position(|bound| value <= *bound)
        .map_or(20.0, |i| 100.0 - 20.0 * i as f64)
}

fn control_flow_regex() -> Option<&'static Regex> {
    static CONTROL: OnceLock<Option<Regex>> = OnceLock::new();
    CONTROL
        .get_or_init(|| {
            Regex::new(
                r"\b(if|elif|else|for|while|loop|match|switch|case|try|except|catch|finally|with)\b",
            )
            .ok()
        })
        .as_ref()
}

fn import_regex() -> Option<&'static Regex> {
    static IMPORT: OnceLock<Option<Regex>> = OnceLock::new();
    IMPORT
        .get_or_init(|| {
            Regex::new(
                r#"(?m)^\s*(?:import\s+([^;\s]+)|from\s+([A-Za-z0-9_.]+)\s+import|#\s*include\s*[<"]([^>"]+)[>"]|require\s*\(\s*['"]([^'"]+)['"]\s*\)|using\s+([^;\s]+);|use\s+([^;\s]+)|extern\s+crate\s+([^;\s]+);)"#,
            )
            .ok()
        })
        .as_ref()
}

fn magic_number_regex() -> Option<&'static Regex> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    NUMBER.get_or_init(|| Regex::new(r"\b\d+\b").ok()).as_ref()
}

/// Control-flow lines per ten lines of new code.
fn complexity_score(code: &str) -> f64 {
    let Some(control) = control_flow_regex() else {
        return 100.0;
    };
    let lines: Vec<&str> = code.lines().collect();
    let branches = lines.iter().filter(|l| control.is_match(l)).count() as f64;
    let density = branches / (lines.len() as f64 / 10.0).max(1.0);
    tiered(density, [5.0, 10.0, 15.0, 20.0])
}

fn imports(code: &str) -> BTreeSet<String> {
    let Some(re) = import_regex() else {
        return BTreeSet::new();
    };
    re.captures_iter(code)
        .filter_map(|caps| caps.iter().skip(1).flatten().next())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// New imports and includes, with heavy libraries penalized.
fn dependency_score(before: &str, after: &str) -> f64 {
    let existing = imports(before);
    let added: Vec<String> = imports(after)
        .into_iter()
        .filter(|i| !existing.contains(i))
        .collect();
    let heavy = added
        .iter()
        .any(|i| HEAVY_LIBS.iter().any(|lib| i.contains(lib)));
    match added.len() {
        0 => 100.0,
        n if n <= 2 && !heavy => 80.0,
        n if n <= 5 && !heavy => 60.0,
        n if n <= 10 => 40.0,
        _ => 20.0,
    }
}

fn loc_delta_score(before: &str, after: &str) -> f64 {
    let delta = before.lines().count().abs_diff(after.lines().count()) as f64;
    tiered(delta, [5.0, 10.0, 20.0, 50.0])
}

/// Share of new lines that look like test code.
fn test_coverage_score(code: &str) -> f64 {
    let total = code.lines().count();
    if total == 0 {
        return 0.0;
    }
    let tests = code
        .lines()
        .filter(|l| TEST_INDICATORS.iter().any(|t| l.contains(t)))
        .count();
    let density = tests as f64 / total as f64;
    match density {
        d if d >= 0.10 => 100.0,
        d if d >= 0.05 => 80.0,
        d if d >= 0.02 => 60.0,
        d if d >= 0.01 => 40.0,
        _ => 20.0,
    }
}

fn nesting_depth(code: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for c in code.chars() {
        match c {
            '{' | '[' | '(' => {
                depth += 1;
                max = max.max(depth);
            }
            '}' | ']' | ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Long lines, deep nesting and magic numbers each cost points.
fn beauty_score(code: &str) -> f64 {
    let mut beauty = 100.0;
    for line in code.lines() {
        let width = line.chars().count();
        if width > 100 {
            beauty -= 5.0;
        } else if width > 80 {
            beauty -= 2.0;
        }
    }

    beauty -= match nesting_depth(code) {
        d if d > 4 => 20.0,
        d if d > 3 => 10.0,
        d if d > 2 => 5.0,
        _ => 0.0,
    };

    let numbers = magic_number_regex().map_or(0, |re| re.find_iter(code).count());
    beauty -= match numbers {
        n if n > 5 => 10.0,
        n if n > 3 => 5.0,
        _ => 0.0,
    };
    f64::clamp(beauty, 0.0, 100.0)
}
