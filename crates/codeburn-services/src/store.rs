use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use codeburn_core::{BenchmarkRun, Language, RunSummary};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse run record {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Result store is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Directory of immutable run records, one JSON file per run.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

/// Key and statistics of a stored run, as listed by [`ResultStore::list`].
#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub path: PathBuf,
    pub generator: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    pub aborted: bool,
    pub summary: RunSummary,
}

impl ResultStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        if !dir.is_dir() {
            return Err(StoreError::NotADirectory(dir));
        }
        Ok(Self { dir })
    }

    /// Writes `run` under a fresh file name. Existing records are never
    /// overwritten; a colliding name gets a numeric suffix.
    pub fn save(&self, run: &BenchmarkRun) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(run)?;
        let stem = record_stem(run);

        let mut attempt = 1;
        loop {
            let name = match attempt {
                1 => format!("{stem}.json"),
                n => format!("{stem}_{n}.json"),
            };
            let path = self.dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    file.write_all(b"\n")?;
                    tracing::info!("Saved run to {}", path.display());
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reads a record back. Statistics are re-derived from the results.
    pub fn load(&self, path: &Path) -> Result<BenchmarkRun> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_many(&self, paths: &[PathBuf]) -> Result<Vec<BenchmarkRun>> {
        paths.iter().map(|p| self.load(p)).collect()
    }

    /// Every readable record in the store, newest first.
    pub fn list(&self) -> Result<Vec<StoredRun>> {
        let mut runs = Vec::new();

        for entry in std::fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match self.load(&path) {
                Ok(run) => {
                    let attempt = save_attempt(&path, &record_stem(&run));
                    runs.push((
                        attempt,
                        StoredRun {
                            generator: run.generator().to_string(),
                            language: run.language(),
                            timestamp: run.timestamp(),
                            aborted: run.aborted(),
                            summary: run.summary().clone(),
                            path,
                        },
                    ));
                }
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        // Same-second saves differ only by their collision counter.
        runs.sort_by(|(attempt_a, a), (attempt_b, b)| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| attempt_b.cmp(attempt_a))
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(runs.into_iter().map(|(_, run)| run).collect())
    }

    /// The `n` most recent runs, newest first.
    pub fn latest(&self, n: usize) -> Result<Vec<BenchmarkRun>> {
        let paths: Vec<PathBuf> = self.list()?.into_iter().take(n).map(|r| r.path).collect();
        self.load_many(&paths)
    }
}

fn record_stem(run: &BenchmarkRun) -> String {
    format!(
        "{}_{}_{}",
        sanitize(run.generator()),
        run.language().name(),
        run.timestamp().format("%Y%m%d_%H%M%S")
    )
}

/// The collision counter `save` appended after `stem`; 1 when there is none.
fn save_attempt(path: &Path, stem: &str) -> u32 {
    path.file_stem()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(stem))
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .filter(|n| *n >= 2)
        .unwrap_or(1)
}

/// Model ids like `llama3.1:8b` or `org/model` are not valid file names everywhere.
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            true => c,
            false => '_',
        })
        .collect();
    match cleaned.trim_matches('.').is_empty() {
        true => "run".to_string(),
        false => cleaned,
    }
}

// =============================================================================
// Comparison
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub generator: String,
    pub language: Language,
    pub timestamp: DateTime<Utc>,
    pub aborted: bool,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProblemScores {
    pub problem_id: String,
    /// One entry per compared run; `None` when that run has no result for the problem.
    pub scores: Vec<Option<u32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub runs: Vec<ComparisonRow>,
    pub problems: Vec<ProblemScores>,
}

/// Side-by-side view of several runs. Problem ids keep first-seen order.
pub fn compare(runs: &[BenchmarkRun]) -> Comparison {
    let rows = runs
        .iter()
        .map(|run| ComparisonRow {
            generator: run.generator().to_string(),
            language: run.language(),
            timestamp: run.timestamp(),
            aborted: run.aborted(),
            summary: run.summary().clone(),
        })
        .collect();

    let mut ids: Vec<&str> = Vec::new();
    for result in runs.iter().flat_map(|run| run.results()) {
        if !ids.contains(&result.problem_id.as_str()) {
            ids.push(&result.problem_id);
        }
    }

    let problems = ids
        .into_iter()
        .map(|id| ProblemScores {
            problem_id: id.to_string(),
            scores: runs
                .iter()
                .map(|run| run.result(id).map(|r| r.total_score()))
                .collect(),
        })
        .collect();

    Comparison {
        runs: rows,
        problems,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use codeburn_core::{
        Candidate, FailureStage, ProblemResult, RunBuilder, ScoreBreakdown, TestOutcome,
    };

    fn scored(id: &str, total: u32) -> ProblemResult {
        ProblemResult::evaluated(
            id,
            Candidate::new(Language::Python, "```python\npass\n```", "pass"),
            TestOutcome {
                passed: total >= 60,
                ..Default::default()
            },
            ScoreBreakdown {
                correctness: total as f64,
                total,
                ..Default::default()
            },
        )
    }

    fn run_at(generator: &str, secs: i64, results: Vec<ProblemResult>) -> BenchmarkRun {
        let ts = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let mut builder = RunBuilder::with_timestamp(generator, Language::Python, ts);
        for r in results {
            builder.push(r);
        }
        builder.seal(false)
    }

    #[test]
    fn test_save_then_load_rederives_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("results")).unwrap();
        let run = run_at(
            "llama3.1:8b",
            0,
            vec![
                scored("p01", 100),
                scored("p02", 0),
                ProblemResult::failed("p03", FailureStage::Generation, "connection refused"),
            ],
        );

        let path = store.save(&run).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("llama3.1_8b_python_"), "{name}");
        assert!(name.ends_with(".json"));

        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded, run);
        assert_eq!(loaded.summary().errored, 1);
    }

    #[test]
    fn test_save_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let run = run_at("model", 0, vec![scored("p01", 100)]);

        let first = store.save(&run).unwrap();
        let second = store.save(&run).unwrap();
        let third = store.save(&run).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert!(second.to_string_lossy().ends_with("_2.json"));
        assert!(third.to_string_lossy().ends_with("_3.json"));
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn test_tampered_summary_is_rederived() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let run = run_at("model", 0, vec![scored("p01", 100), scored("p02", 0)]);
        let path = store.save(&run).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["overall"]["average_score"] = serde_json::json!(99.0);
        std::fs::write(&path, value.to_string()).unwrap();

        let loaded = store.load(&path).unwrap();
        assert!((loaded.summary().average_score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_list_newest_first_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        store.save(&run_at("old", 0, vec![scored("p01", 10)])).unwrap();
        store.save(&run_at("new", 60, vec![scored("p01", 90)])).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = store.list().unwrap();
        let generators: Vec<&str> = listed.iter().map(|r| r.generator.as_str()).collect();
        assert_eq!(generators, ["new", "old"]);

        let latest = store.latest(1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].generator(), "new");
    }

    #[test]
    fn test_list_orders_same_second_saves_by_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let run = run_at("model", 0, vec![scored("p01", 100)]);

        let mut last = PathBuf::new();
        for _ in 0..11 {
            last = store.save(&run).unwrap();
        }
        assert!(last.to_string_lossy().ends_with("_11.json"));

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 11);
        assert_eq!(listed[0].path, last);
        assert!(listed[1].path.to_string_lossy().ends_with("_10.json"));
        assert!(listed[9].path.to_string_lossy().ends_with("_2.json"));
        assert_eq!(listed[10].path.file_stem().unwrap().to_str().unwrap(), record_stem(&run));

        let latest = store.latest(1).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0], run);
    }

    #[test]
    fn test_save_attempt_ignores_timestamp_digits() {
        let stem = "m_python_20250101_120000";
        assert_eq!(save_attempt(Path::new("m_python_20250101_120000.json"), stem), 1);
        assert_eq!(save_attempt(Path::new("m_python_20250101_120000_7.json"), stem), 7);
        assert_eq!(save_attempt(Path::new("renamed.json"), stem), 1);
    }

    #[test]
    fn test_load_reports_path_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path()).unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[]").unwrap();
        let err = store.load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_compare_builds_score_matrix() {
        let a = run_at("a", 0, vec![scored("p01", 100), scored("p02", 40)]);
        let b = run_at("b", 1, vec![scored("p02", 80), scored("p03", 100)]);

        let comparison = compare(&[a, b]);
        assert_eq!(comparison.runs.len(), 2);
        assert_eq!(comparison.runs[1].generator, "b");

        let ids: Vec<&str> = comparison.problems.iter().map(|p| p.problem_id.as_str()).collect();
        assert_eq!(ids, ["p01", "p02", "p03"]);
        assert_eq!(comparison.problems[0].scores, [Some(100), None]);
        assert_eq!(comparison.problems[1].scores, [Some(40), Some(80)]);
        assert_eq!(comparison.problems[2].scores, [None, Some(100)]);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("llama3.1:8b"), "llama3.1_8b");
        assert_eq!(sanitize("org/model name"), "org_model_name");
        assert_eq!(sanitize(".."), "run");
    }
}
