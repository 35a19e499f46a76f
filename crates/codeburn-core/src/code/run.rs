use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Language, ProblemResult};
use crate::aggregate::summarize;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_problems: usize,
    pub average_score: f64,
    pub pass_rate: f64,
    pub optimal_rate: f64,
    #[serde(default)]
    pub errored: usize,
    #[serde(default)]
    pub timed_out: usize,
}

/// An open run. Results are appended in problem input order and the run is
/// sealed into an immutable [`BenchmarkRun`] once evaluation stops.
#[derive(Debug)]
pub struct RunBuilder {
    generator: String,
    language: Language,
    timestamp: DateTime<Utc>,
    results: Vec<ProblemResult>,
}

impl RunBuilder {
    pub fn new(generator: impl Into<String>, language: Language) -> Self {
        Self::with_timestamp(generator, language, Utc::now())
    }

    pub fn with_timestamp(
        generator: impl Into<String>,
        language: Language,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            generator: generator.into(),
            language,
            timestamp,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, result: ProblemResult) {
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn seal(self, aborted: bool) -> BenchmarkRun {
        let summary = summarize(&self.results);
        BenchmarkRun {
            generator: self.generator,
            language: self.language,
            timestamp: self.timestamp,
            aborted,
            problems: self.results,
            overall: summary,
        }
    }
}

/// A sealed run. Fields are read-only; `overall` is always derived from
/// `problems`, including when a run is deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RunRecord")]
pub struct BenchmarkRun {
    generator: String,
    language: Language,
    timestamp: DateTime<Utc>,
    aborted: bool,
    problems: Vec<ProblemResult>,
    overall: RunSummary,
}

impl BenchmarkRun {
    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn results(&self) -> &[ProblemResult] {
        &self.problems
    }

    pub fn summary(&self) -> &RunSummary {
        &self.overall
    }

    pub fn result(&self, problem_id: &str) -> Option<&ProblemResult> {
        self.problems.iter().find(|r| r.problem_id == problem_id)
    }
}

/// On-disk shape of a run. The stored `overall` block is informational only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub generator: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub aborted: bool,
    pub problems: Vec<ProblemResult>,
    #[serde(default)]
    pub overall: Option<RunSummary>,
}

impl From<RunRecord> for BenchmarkRun {
    fn from(record: RunRecord) -> Self {
        let summary = summarize(&record.problems);
        if let Some(stored) = &record.overall {
            if *stored != summary {
                tracing::warn!(
                    generator = %record.generator,
                    language = %record.language,
                    stored_average = stored.average_score,
                    derived_average = summary.average_score,
                    "Stored run statistics differ from results; using derived values"
                );
            }
        }

        Self {
            generator: record.generator,
            language: record.language,
            timestamp: record.timestamp,
            aborted: record.aborted,
            problems: record.problems,
            overall: summary,
        }
    }
}
