use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Language;

// =============================================================================
// Inputs
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub statement: String,
    pub dir: PathBuf,
    /// Entry point of the test suite for the language the problem was loaded for.
    pub test_suite: PathBuf,
    #[serde(default)]
    pub has_rubric: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub language: Language,
    pub raw_output: String,
    pub solution: String,
}

impl Candidate {
    pub fn new(language: Language, raw_output: impl Into<String>, solution: impl Into<String>) -> Self {
        Self {
            language,
            raw_output: raw_output.into(),
            solution: solution.into(),
        }
    }
}

// =============================================================================
// Execution and scoring
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    /// Absent when the executor produced no machine-readable summary.
    #[serde(default)]
    pub counts: Option<TestCounts>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub duration_ms: u64,
}

impl TestOutcome {
    pub fn passed_tests(&self) -> u32 {
        self.counts.map(|c| c.passed).unwrap_or(0)
    }

    pub fn total_tests(&self) -> u32 {
        self.counts.map(|c| c.total).unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub correctness: f64,
    pub complexity: u32,
    pub quality: u32,
    pub total: u32,
    pub rubric: bool,
}

// =============================================================================
// Per-problem result
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Generation,
    Execution,
}

impl FailureStage {
    pub fn label(&self) -> &'static str {
        match self {
            FailureStage::Generation => "generation",
            FailureStage::Execution => "execution",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProblemOutcome {
    Evaluated {
        candidate: Candidate,
        test_outcome: TestOutcome,
        score: ScoreBreakdown,
    },
    Error {
        stage: FailureStage,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProblemResult {
    pub problem_id: String,
    pub outcome: ProblemOutcome,
}

impl ProblemResult {
    pub fn evaluated(
        problem_id: impl Into<String>,
        candidate: Candidate,
        test_outcome: TestOutcome,
        score: ScoreBreakdown,
    ) -> Self {
        Self {
            problem_id: problem_id.into(),
            outcome: ProblemOutcome::Evaluated {
                candidate,
                test_outcome,
                score,
            },
        }
    }

    pub fn failed(problem_id: impl Into<String>, stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            problem_id: problem_id.into(),
            outcome: ProblemOutcome::Error {
                stage,
                message: message.into(),
            },
        }
    }

    /// Error-marked results count as zero.
    pub fn total_score(&self) -> u32 {
        match &self.outcome {
            ProblemOutcome::Evaluated { score, .. } => score.total,
            ProblemOutcome::Error { .. } => 0,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ProblemOutcome::Error { .. })
    }

    pub fn timed_out(&self) -> bool {
        match &self.outcome {
            ProblemOutcome::Evaluated { test_outcome, .. } => test_outcome.timed_out,
            ProblemOutcome::Error { .. } => false,
        }
    }

    pub fn test_outcome(&self) -> Option<&TestOutcome> {
        match &self.outcome {
            ProblemOutcome::Evaluated { test_outcome, .. } => Some(test_outcome),
            ProblemOutcome::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ProblemOutcome::Error { message, .. } => Some(message),
            ProblemOutcome::Evaluated { .. } => None,
        }
    }
}
