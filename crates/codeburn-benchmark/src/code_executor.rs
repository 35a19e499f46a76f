use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use codeburn_core::{CodeBurnConfig, ExecutorSpec, Language, Problem, TestCounts, TestOutcome};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Captured stdout/stderr beyond this many bytes is cut off.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;
/// How long pipes may stay open once the process group is gone.
const PIPE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CodeExecutorError {
    #[error("Test suite not found: {}", .0.display())]
    TestSuiteMissing(PathBuf),
    #[error("No executor configured for {0}")]
    ExecutorNotConfigured(Language),
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to prepare solution workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodeExecutorError>;

/// Runs a language's test suite against one solution at a time.
///
/// Every call gets its own temporary work directory, its own subprocess and
/// its own timeout, so calls may run concurrently.
#[derive(Debug, Clone)]
pub struct CodeExecutor {
    language: Language,
    spec: ExecutorSpec,
    timeout: Duration,
}

struct ExecutionPaths<'a> {
    test_file: &'a Path,
    solution_file: &'a Path,
    work_dir: &'a Path,
    report_file: &'a Path,
    problem_dir: &'a Path,
}

impl ExecutionPaths<'_> {
    fn expand(&self, template: &str) -> String {
        template
            .replace("{test_file}", &self.test_file.to_string_lossy())
            .replace("{solution_file}", &self.solution_file.to_string_lossy())
            .replace("{work_dir}", &self.work_dir.to_string_lossy())
            .replace("{report_file}", &self.report_file.to_string_lossy())
            .replace("{problem_dir}", &self.problem_dir.to_string_lossy())
    }
}

impl CodeExecutor {
    pub fn new(language: Language, spec: ExecutorSpec, timeout: Duration) -> Self {
        Self {
            language,
            spec,
            timeout,
        }
    }

    /// Fails when no executor is configured or built in for the language.
    pub fn from_config(config: &CodeBurnConfig, language: Language, timeout: Duration) -> Result<Self> {
        let spec = config
            .executor(language)
            .ok_or(CodeExecutorError::ExecutorNotConfigured(language))?;
        Ok(Self::new(language, spec, timeout))
    }

    pub fn language(&self) -> Language {
        self.language
    }

    #[instrument(skip(self, problem, solution), fields(problem = %problem.id, language = %self.language))]
    pub async fn run(&self, problem: &Problem, solution: &str) -> Result<TestOutcome> {
        if !problem.test_suite.is_file() {
            return Err(CodeExecutorError::TestSuiteMissing(problem.test_suite.clone()));
        }

        let work_dir = tempfile::Builder::new()
            .prefix(&format!("codeburn-{}-", path_safe(&problem.id)))
            .tempdir()
            .map_err(CodeExecutorError::Workspace)?;

        let solution_file = work_dir
            .path()
            .join(format!("solution.{}", self.language.file_extension()));
        tokio::fs::write(&solution_file, solution)
            .await
            .map_err(CodeExecutorError::Workspace)?;
        let report_file = work_dir.path().join("report.json");

        let paths = ExecutionPaths {
            test_file: &problem.test_suite,
            solution_file: &solution_file,
            work_dir: work_dir.path(),
            report_file: &report_file,
            problem_dir: &problem.dir,
        };

        let outcome = self.execute(&paths).await;

        if let Err(e) = work_dir.close() {
            warn!(error = %e, "Failed to remove solution workspace");
        }

        outcome
    }

    async fn execute(&self, paths: &ExecutionPaths<'_>) -> Result<TestOutcome> {
        let mut cmd = self.build_command(paths);
        debug!(program = %self.spec.program, "Spawning test executor");

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| CodeExecutorError::Spawn {
            program: self.spec.program.clone(),
            source,
        })?;

        // Also fires if this future is dropped mid-run (e.g. run cancellation).
        let mut group = ProcessGroup::new(child.id());
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let status = tokio::time::timeout(self.timeout, child.wait()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        // Leftover background processes would otherwise hold the pipes open.
        group.kill();
        if status.is_err() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(PIPE_GRACE, child.wait()).await;
        }

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        match status {
            Ok(Ok(status)) => {
                let counts = read_report(paths.report_file).await;
                Ok(TestOutcome {
                    passed: status.success(),
                    counts,
                    exit_code: status.code(),
                    timed_out: false,
                    stdout,
                    stderr,
                    duration_ms,
                })
            }
            Ok(Err(e)) => Err(CodeExecutorError::Io(e)),
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Test executor timed out; killed"
                );
                Ok(TestOutcome {
                    passed: false,
                    counts: None,
                    exit_code: None,
                    timed_out: true,
                    stdout,
                    stderr: timeout_message(&stderr, self.timeout),
                    duration_ms,
                })
            }
        }
    }

    fn build_command(&self, paths: &ExecutionPaths<'_>) -> Command {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(self.spec.args.iter().map(|a| paths.expand(a)))
            .current_dir(paths.problem_dir)
            .env("CODEBURN_SOLUTION_FILE", paths.solution_file)
            .env("CODEBURN_WORK_DIR", paths.work_dir)
            .env("CODEBURN_REPORT_FILE", paths.report_file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if self.language == Language::Python {
            cmd.env("PYTHONPATH", python_path(paths.work_dir));
        }

        for (key, value) in &self.spec.env {
            cmd.env(key, paths.expand(value));
        }

        cmd
    }
}

/// pytest-json-report shape: `{"summary": {"total": .., "passed": .., "failed": ..}}`.
#[derive(Debug, Deserialize)]
struct JsonReport {
    summary: ReportSummary,
}

#[derive(Debug, Deserialize)]
struct ReportSummary {
    #[serde(default)]
    total: Option<u32>,
    #[serde(default)]
    passed: u32,
    #[serde(default)]
    failed: u32,
    #[serde(default)]
    error: u32,
}

async fn read_report(path: &Path) -> Option<TestCounts> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match parse_report(&content) {
        Some(counts) => Some(counts),
        None => {
            warn!("Executor report is not a recognised summary; falling back to exit code");
            None
        }
    }
}

fn parse_report(content: &str) -> Option<TestCounts> {
    let report: JsonReport = serde_json::from_str(content).ok()?;
    let summary = report.summary;
    let failed = summary.failed.saturating_add(summary.error);
    Some(TestCounts {
        total: summary.total.unwrap_or(summary.passed.saturating_add(failed)),
        passed: summary.passed,
        failed,
    })
}

/// The child's process group (unix). Killed explicitly once the suite is
/// done, or on drop.
struct ProcessGroup {
    leader: Option<u32>,
}

impl ProcessGroup {
    fn new(leader: Option<u32>) -> Self {
        Self { leader }
    }

    fn kill(&mut self) {
        if let Some(pid) = self.leader.take() {
            kill_group(pid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes plain integers; an already-empty group yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Reads a pipe to EOF, keeping at most one byte past the capture limit so
/// truncation can still be detected.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = (MAX_CAPTURE_BYTES + 1).saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}

async fn collect(task: JoinHandle<Vec<u8>>) -> String {
    let abort = task.abort_handle();
    match tokio::time::timeout(PIPE_GRACE, task).await {
        Ok(Ok(bytes)) => capture(&bytes),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            warn!("Executor output pipe still open after the process group was killed");
            String::new()
        }
    }
}

fn timeout_message(stderr: &str, timeout: Duration) -> String {
    let note = format!("timeout after {}ms", timeout.as_millis());
    match stderr.trim_end() {
        "" => note,
        partial => format!("{partial}\n{note}"),
    }
}

fn python_path(work_dir: &Path) -> std::ffi::OsString {
    let mut entries = vec![work_dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).unwrap_or_else(|_| work_dir.as_os_str().to_owned())
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_CAPTURE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &text[..end])
}

fn path_safe(id: &str) -> String {
    id.chars()
        .map(|c| match c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            true => c,
            false => '_',
        })
        .collect()
}
