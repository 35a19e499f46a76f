use crate::scoring::{OPTIMAL_THRESHOLD, PASS_THRESHOLD};
use crate::{ProblemResult, RunSummary};

/// Folds per-problem results into run statistics.
///
/// Error-marked results are included with a score of zero. An empty slice
/// yields all-zero statistics.
pub fn summarize(results: &[ProblemResult]) -> RunSummary {
    let total_problems = results.len();
    let errored = results.iter().filter(|r| r.is_error()).count();
    let timed_out = results.iter().filter(|r| r.timed_out()).count();

    if total_problems == 0 {
        return RunSummary::default();
    }

    let n = total_problems as f64;
    let score_sum: u64 = results.iter().map(|r| r.total_score() as u64).sum();
    let count_at_least =
        |threshold: u32| results.iter().filter(|r| r.total_score() >= threshold).count();

    RunSummary {
        total_problems,
        average_score: score_sum as f64 / n,
        pass_rate: count_at_least(PASS_THRESHOLD) as f64 / n,
        optimal_rate: count_at_least(OPTIMAL_THRESHOLD) as f64 / n,
        errored,
        timed_out,
    }
}
