// Domain modules
pub mod aggregate;
pub mod code;
pub mod config;
pub mod error;
pub mod scoring;

pub use aggregate::summarize;
pub use code::{
    BenchmarkRun, Candidate, FailureStage, Language, Problem, ProblemOutcome, ProblemResult,
    RunBuilder, RunRecord, RunSummary, ScoreBreakdown, TestCounts, TestOutcome,
};
pub use config::{CodeBurnConfig, DefaultsConfig, ExecutorSpec, OllamaConfig};
pub use error::{CodeBurnError, Result};
pub use scoring::{score, OPTIMAL_THRESHOLD, PASS_THRESHOLD};
