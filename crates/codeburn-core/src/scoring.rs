//! Converts a [`TestOutcome`] into a bounded [`ScoreBreakdown`].
//!
//! Without a rubric the score is binary. With a rubric it is split into
//! correctness (share of passing tests, up to 60), complexity (30, awarded
//! only when the whole suite passes) and quality (10 on a pass, 5 for the
//! attempt). Complexity is a pass/fail proxy; no algorithmic analysis is done.

use crate::{ScoreBreakdown, TestOutcome};

/// Minimum total score for a problem to count as passed in run statistics.
pub const PASS_THRESHOLD: u32 = 60;
/// Minimum total score for a problem to count as optimally solved.
pub const OPTIMAL_THRESHOLD: u32 = 90;

const MAX_SCORE: u32 = 100;
const CORRECTNESS_WEIGHT: f64 = 60.0;
const COMPLEXITY_POINTS: u32 = 30;
const QUALITY_PASS_POINTS: u32 = 10;
const QUALITY_ATTEMPT_POINTS: u32 = 5;

pub fn score(outcome: &TestOutcome, has_rubric: bool) -> ScoreBreakdown {
    match has_rubric {
        false => binary_score(outcome.passed),
        true => rubric_score(outcome),
    }
}

fn binary_score(passed: bool) -> ScoreBreakdown {
    let total = if passed { MAX_SCORE } else { 0 };
    ScoreBreakdown {
        correctness: total as f64,
        complexity: 0,
        quality: 0,
        total,
        rubric: false,
    }
}

fn rubric_score(outcome: &TestOutcome) -> ScoreBreakdown {
    let total_tests = outcome.total_tests();
    // A report claiming more passes than tests is capped at the test count.
    let passed_tests = outcome.passed_tests().min(total_tests);

    let correctness = match total_tests {
        0 => 0.0,
        total => (passed_tests as f64 * CORRECTNESS_WEIGHT) / total as f64,
    };
    let complexity = if outcome.passed { COMPLEXITY_POINTS } else { 0 };
    let quality = if outcome.passed {
        QUALITY_PASS_POINTS
    } else {
        QUALITY_ATTEMPT_POINTS
    };

    let sum = (correctness + complexity as f64 + quality as f64).floor();
    let total = (sum.max(0.0) as u32).min(MAX_SCORE);

    ScoreBreakdown {
        correctness,
        complexity,
        quality,
        total,
        rubric: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestCounts;

    fn outcome(passed: bool, passed_tests: u32, total_tests: u32) -> TestOutcome {
        TestOutcome {
            passed,
            counts: Some(TestCounts {
                total: total_tests,
                passed: passed_tests,
                failed: total_tests.saturating_sub(passed_tests),
            }),
            exit_code: Some(if passed { 0 } else { 1 }),
            ..Default::default()
        }
    }

    #[test]
    fn test_binary_scoring() {
        assert_eq!(score(&outcome(true, 0, 0), false).total, 100);
        assert_eq!(score(&outcome(false, 9, 10), false).total, 0);
        assert!(!score(&outcome(true, 1, 1), false).rubric);
    }

    #[test]
    fn test_rubric_full_pass() {
        let breakdown = score(&outcome(true, 10, 10), true);
        assert_eq!(breakdown.correctness, 60.0);
        assert_eq!(breakdown.complexity, 30);
        assert_eq!(breakdown.quality, 10);
        assert_eq!(breakdown.total, 100);
    }

    #[test]
    fn test_rubric_partial_failure() {
        let breakdown = score(&outcome(false, 3, 10), true);
        assert_eq!(breakdown.correctness, 18.0);
        assert_eq!(breakdown.complexity, 0);
        assert_eq!(breakdown.quality, 5);
        assert_eq!(breakdown.total, 23);
    }

    #[test]
    fn test_rubric_floors_fractional_correctness() {
        // 1/7 * 60 = 8.57..., 2/3 * 60 = 40
        assert_eq!(score(&outcome(false, 1, 7), true).total, 13);
        assert_eq!(score(&outcome(false, 2, 3), true).total, 45);
    }

    #[test]
    fn test_rubric_zero_tests_guards_division() {
        let breakdown = score(&outcome(false, 0, 0), true);
        assert_eq!(breakdown.correctness, 0.0);
        assert_eq!(breakdown.total, 5);

        let no_counts = TestOutcome {
            passed: true,
            ..Default::default()
        };
        assert_eq!(score(&no_counts, true).total, 40);
    }

    #[test]
    fn test_rubric_monotonic_in_passed_tests() {
        for total in 1..=20 {
            let mut last = -1.0;
            for passed in 0..=total {
                let breakdown = score(&outcome(false, passed, total), true);
                assert!(breakdown.correctness >= last);
                last = breakdown.correctness;
            }
        }
    }

    #[test]
    fn test_total_always_bounded() {
        for has_rubric in [false, true] {
            for passed_flag in [false, true] {
                for total in 0..=12 {
                    for passed in 0..=total + 2 {
                        let breakdown = score(&outcome(passed_flag, passed, total), has_rubric);
                        assert!(breakdown.total <= 100);
                    }
                }
            }
        }
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let input = outcome(false, 4, 9);
        assert_eq!(score(&input, true), score(&input, true));
    }
}
