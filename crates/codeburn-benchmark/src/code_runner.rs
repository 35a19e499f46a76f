use std::sync::Arc;

use codeburn_core::{
    score, BenchmarkRun, Candidate, FailureStage, Language, Problem, ProblemResult, RunBuilder,
    RunSummary,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::code_executor::CodeExecutor;
use crate::extractor::{extract_solution, fence_language};
use crate::generator::Generator;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvalEvent {
    Started {
        generator: String,
        language: Language,
        total: usize,
    },
    ProblemStarted {
        current: usize,
        total: usize,
        problem_id: String,
    },
    ProblemComplete {
        current: usize,
        total: usize,
        result: ProblemResult,
    },
    Cancelled {
        completed: usize,
    },
    Done {
        summary: RunSummary,
    },
}

/// Generate, extract, execute and score each problem, sealing the results
/// into a [`BenchmarkRun`].
pub struct EvaluationPipeline {
    generator: Arc<dyn Generator>,
    executor: CodeExecutor,
    concurrency: usize,
}

impl EvaluationPipeline {
    pub fn new(generator: Arc<dyn Generator>, executor: CodeExecutor) -> Self {
        Self {
            generator,
            executor,
            concurrency: 1,
        }
    }

    /// Number of problems evaluated at once. Results keep input order either way.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn language(&self) -> Language {
        self.executor.language()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[instrument(skip_all, fields(generator = %self.generator.id(), language = %self.language()))]
    pub async fn run(
        &self,
        problems: &[Problem],
        cancel: CancellationToken,
        events: Option<mpsc::Sender<EvalEvent>>,
    ) -> BenchmarkRun {
        let total = problems.len();
        let language = self.language();
        let events = events.as_ref();

        info!(
            "Evaluating {} problems (concurrency {})",
            total, self.concurrency
        );
        emit(
            events,
            EvalEvent::Started {
                generator: self.generator.id().to_string(),
                language,
                total,
            },
        )
        .await;

        let mut builder = RunBuilder::new(self.generator.id(), language);

        let mut results = stream::iter(problems.iter().enumerate())
            .map(|(idx, problem)| {
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    emit(
                        events,
                        EvalEvent::ProblemStarted {
                            current: idx + 1,
                            total,
                            problem_id: problem.id.clone(),
                        },
                    )
                    .await;
                    // Dropping an in-flight evaluation drops its child process, which kills it.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.evaluate(problem) => Some(result),
                    }
                }
            })
            .buffered(self.concurrency);

        let mut aborted = false;
        while let Some(result) = results.next().await {
            let Some(result) = result else {
                aborted = true;
                break;
            };
            emit(
                events,
                EvalEvent::ProblemComplete {
                    current: builder.len() + 1,
                    total,
                    result: result.clone(),
                },
            )
            .await;
            builder.push(result);
        }
        drop(results);

        if aborted {
            warn!(
                "Run aborted after {}/{} problems",
                builder.len(),
                total
            );
            emit(
                events,
                EvalEvent::Cancelled {
                    completed: builder.len(),
                },
            )
            .await;
        }

        let run = builder.seal(aborted);
        let summary = run.summary();
        info!(
            average_score = summary.average_score,
            pass_rate = summary.pass_rate,
            errored = summary.errored,
            "Run complete"
        );
        emit(
            events,
            EvalEvent::Done {
                summary: summary.clone(),
            },
        )
        .await;
        run
    }

    /// One problem end to end. Never fails; infrastructure errors become
    /// error-marked results.
    #[instrument(skip_all, fields(problem = %problem.id))]
    pub async fn evaluate(&self, problem: &Problem) -> ProblemResult {
        let language = self.language();

        let raw_output = match self.generator.generate(problem, language).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Generation failed");
                return ProblemResult::failed(&problem.id, FailureStage::Generation, e.to_string());
            }
        };

        let solution = extract_solution(&raw_output);
        if let Some(tag) = fence_language(&raw_output) {
            if Language::from_fence_tag(tag) != Some(language) {
                debug!(tag, "Fence tag does not name the target language");
            }
        }

        let outcome = match self.executor.run(problem, &solution).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Execution failed");
                return ProblemResult::failed(&problem.id, FailureStage::Execution, e.to_string());
            }
        };

        let breakdown = score(&outcome, problem.has_rubric);
        info!(
            passed = outcome.passed,
            timed_out = outcome.timed_out,
            score = breakdown.total,
            "Problem evaluated"
        );

        ProblemResult::evaluated(
            &problem.id,
            Candidate::new(language, raw_output, solution),
            outcome,
            breakdown,
        )
    }
}

async fn emit(events: Option<&mpsc::Sender<EvalEvent>>, event: EvalEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::generator::{GeneratorError, Result as GenResult};
    use async_trait::async_trait;
    use codeburn_core::ExecutorSpec;
    use std::path::PathBuf;
    use std::time::Duration;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn id(&self) -> &str {
            "echo"
        }

        async fn generate(&self, problem: &Problem, _language: Language) -> GenResult<String> {
            match problem.statement.as_str() {
                "offline" => Err(GeneratorError::Http("connection refused".to_string())),
                text => Ok(format!("Here you go:\n```python\n{text}\n```\n")),
            }
        }
    }

    fn problem(dir: &std::path::Path, id: &str, statement: &str) -> Problem {
        Problem {
            id: id.to_string(),
            statement: statement.to_string(),
            dir: dir.to_path_buf(),
            test_suite: dir.join("suite.sh"),
            has_rubric: false,
        }
    }

    fn pipeline(dir: &std::path::Path) -> EvaluationPipeline {
        // The suite passes when the solution contains "ok".
        std::fs::write(dir.join("suite.sh"), "grep -q ok \"$CODEBURN_SOLUTION_FILE\"\n").unwrap();
        let executor = CodeExecutor::new(
            Language::Python,
            ExecutorSpec::new("sh", &["{test_file}"]),
            Duration::from_secs(10),
        );
        EvaluationPipeline::new(Arc::new(EchoGenerator), executor)
    }

    #[tokio::test]
    async fn test_evaluate_scores_extracted_solution() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());

        let result = pipeline.evaluate(&problem(dir.path(), "p01", "ok = True")).await;
        assert_eq!(result.total_score(), 100);
        match &result.outcome {
            codeburn_core::ProblemOutcome::Evaluated { candidate, .. } => {
                assert_eq!(candidate.solution, "ok = True");
                assert!(candidate.raw_output.starts_with("Here you go"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let result = pipeline.evaluate(&problem(dir.path(), "p02", "nope")).await;
        assert_eq!(result.total_score(), 0);
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_generation_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let problems = vec![
            problem(dir.path(), "p01", "ok"),
            problem(dir.path(), "p02", "offline"),
            problem(dir.path(), "p03", "ok"),
        ];

        let run = pipeline.run(&problems, CancellationToken::new(), None).await;
        let ids: Vec<_> = run.results().iter().map(|r| r.problem_id.as_str()).collect();
        assert_eq!(ids, ["p01", "p02", "p03"]);
        assert!(!run.aborted());
        assert_eq!(run.summary().errored, 1);
        match &run.results()[1].outcome {
            codeburn_core::ProblemOutcome::Error { stage, message } => {
                assert_eq!(*stage, FailureStage::Generation);
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_suite_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let mut p = problem(dir.path(), "p01", "ok");
        p.test_suite = PathBuf::from("/nonexistent/suite.sh");

        let result = pipeline.evaluate(&p).await;
        assert!(result.is_error());
        assert!(matches!(
            result.outcome,
            codeburn_core::ProblemOutcome::Error {
                stage: FailureStage::Execution,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_seals_empty_aborted_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let problems = vec![problem(dir.path(), "p01", "ok")];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, mut rx) = mpsc::channel(16);
        let run = pipeline.run(&problems, cancel, Some(tx)).await;
        assert!(run.aborted());
        assert!(run.results().is_empty());
        assert_eq!(run.summary().total_problems, 0);

        let mut saw_cancelled = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, EvalEvent::Cancelled { completed: 0 }) {
                saw_cancelled = true;
            }
        }
        assert!(saw_cancelled);
    }

    #[tokio::test]
    async fn test_events_follow_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path()).with_concurrency(3);
        let problems = vec![
            problem(dir.path(), "p01", "ok"),
            problem(dir.path(), "p02", "bad"),
            problem(dir.path(), "p03", "ok"),
        ];

        let (tx, mut rx) = mpsc::channel(64);
        let run = pipeline.run(&problems, CancellationToken::new(), Some(tx)).await;
        assert_eq!(run.summary().total_problems, 3);

        let mut completed = Vec::new();
        let mut done = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                EvalEvent::ProblemComplete { result, .. } => completed.push(result.problem_id),
                EvalEvent::Done { summary } => {
                    done = true;
                    assert_eq!(summary.total_problems, 3);
                }
                _ => {}
            }
        }
        assert!(done);
        assert_eq!(completed, ["p01", "p02", "p03"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let value = serde_json::to_value(EvalEvent::Cancelled { completed: 2 }).unwrap();
        assert_eq!(value["type"], "cancelled");
        assert_eq!(value["completed"], 2);
    }
}
