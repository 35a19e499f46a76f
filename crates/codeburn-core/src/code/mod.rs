mod language;
mod run;
mod types;

pub use language::Language;
pub use run::{BenchmarkRun, RunBuilder, RunRecord, RunSummary};
pub use types::{
    Candidate, FailureStage, Problem, ProblemOutcome, ProblemResult, ScoreBreakdown, TestCounts,
    TestOutcome,
};
