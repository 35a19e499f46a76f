use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codeburn_benchmark::{
    CodeExecutor, EvalEvent, EvaluationPipeline, Generator, OllamaClient, OllamaGenerator,
    ReplayGenerator,
};
use codeburn_core::{BenchmarkRun, CodeBurnConfig, Language, ProblemOutcome};
use codeburn_services::{compare, load_problems, problem_ids, test_suite_path, ResultStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codeburn")]
#[command(about = "CodeBurn - code generation benchmark", long_about = None)]
struct Cli {
    /// Config file (defaults to ./codeburn.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, test and score solutions for a problem set
    Run {
        /// Generator id (Ollama model name, or a label for replayed output)
        #[arg(short, long)]
        generator: String,

        /// Where solutions come from
        #[arg(long, value_enum, default_value_t = Provider::Ollama)]
        provider: Provider,

        /// Directory of recorded responses (`<problem_id>.md`) for the replay provider
        #[arg(long)]
        responses_dir: Option<PathBuf>,

        /// Problems to run: `all` or a comma-separated list of ids
        #[arg(short, long, default_value = "all")]
        problems: String,

        /// Target language (python, javascript, java, cpp, rust, go)
        #[arg(short, long, default_value = "python")]
        language: Language,

        #[arg(long)]
        problems_dir: Option<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Per-problem test timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Problems evaluated at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Compare stored runs side by side
    Compare {
        /// Run files to compare
        files: Vec<PathBuf>,

        /// Compare the N most recent runs instead
        #[arg(long, conflicts_with = "files")]
        latest: Option<usize>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// List stored runs, newest first
    History {
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List problems found in the problems directory
    Problems {
        #[arg(long)]
        problems_dir: Option<PathBuf>,

        #[arg(short, long, default_value = "python")]
        language: Language,
    },

    /// List available Ollama models
    Models,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Provider {
    Ollama,
    Replay,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CodeBurnConfig::load(cli.config.as_deref()).context("failed to load config")?;
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Commands::Run {
            generator,
            provider,
            responses_dir,
            problems,
            language,
            problems_dir,
            output_dir,
            timeout_secs,
            jobs,
            output,
        } => {
            let opts = RunOptions {
                generator,
                provider,
                responses_dir,
                selection: parse_selection(&problems),
                language,
                problems_dir: problems_dir.unwrap_or_else(|| config.defaults.problems_dir.clone()),
                output_dir: output_dir.unwrap_or_else(|| config.defaults.output_dir.clone()),
                timeout: Duration::from_secs(timeout_secs.unwrap_or(config.defaults.timeout_secs)),
                jobs: jobs.unwrap_or(config.defaults.concurrency),
                output,
            };
            let run = cmd_run(&config, opts).await?;
            if run.aborted() {
                std::process::exit(130);
            }
        }
        Commands::Compare {
            files,
            latest,
            output_dir,
            output,
        } => {
            let dir = output_dir.unwrap_or_else(|| config.defaults.output_dir.clone());
            cmd_compare(&dir, &files, latest, output)?
        }
        Commands::History { output_dir } => {
            let dir = output_dir.unwrap_or_else(|| config.defaults.output_dir.clone());
            cmd_history(&dir)?
        }
        Commands::Problems {
            problems_dir,
            language,
        } => {
            let dir = problems_dir.unwrap_or_else(|| config.defaults.problems_dir.clone());
            cmd_problems(&dir, language)?
        }
        Commands::Models => cmd_models(&config).await?,
    }

    Ok(())
}

struct RunOptions {
    generator: String,
    provider: Provider,
    responses_dir: Option<PathBuf>,
    selection: Option<Vec<String>>,
    language: Language,
    problems_dir: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    jobs: usize,
    output: OutputFormat,
}

fn parse_selection(raw: &str) -> Option<Vec<String>> {
    match raw.trim() {
        "" | "all" => None,
        list => Some(
            list.split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        ),
    }
}

async fn cmd_run(config: &CodeBurnConfig, opts: RunOptions) -> Result<BenchmarkRun> {
    let problems = load_problems(&opts.problems_dir, opts.language, opts.selection.as_deref())?;
    let executor = CodeExecutor::from_config(config, opts.language, opts.timeout)?;
    let store = ResultStore::open(&opts.output_dir)
        .with_context(|| format!("result store {} is not writable", opts.output_dir.display()))?;

    let generator: Arc<dyn Generator> = match opts.provider {
        Provider::Ollama => Arc::new(
            OllamaGenerator::new(OllamaClient::new(&config.ollama.host), &opts.generator)
                .with_temperature(config.defaults.temperature)
                .with_max_tokens(config.defaults.max_tokens),
        ),
        Provider::Replay => {
            let Some(dir) = opts.responses_dir else {
                bail!("--responses-dir is required with --provider replay");
            };
            Arc::new(ReplayGenerator::new(&opts.generator, dir))
        }
    };

    let pipeline = EvaluationPipeline::new(generator, executor).with_concurrency(opts.jobs);

    eprintln!();
    eprintln!("Running benchmark...");
    eprintln!("  Generator: {}", opts.generator);
    eprintln!("  Language:  {}", opts.language.label());
    eprintln!("  Problems:  {}", problems.len());
    eprintln!("  Timeout:   {}s", opts.timeout.as_secs());
    eprintln!("  Jobs:      {}", pipeline.concurrency());
    eprintln!();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing with completed problems");
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(64);
    let progress = tokio::spawn(print_progress(rx));

    let run = pipeline.run(&problems, cancel, Some(tx)).await;
    progress.await.ok();

    let path = store
        .save(&run)
        .with_context(|| format!("failed to write results to {}", opts.output_dir.display()))?;

    print_run(&run, opts.output)?;
    eprintln!("Saved: {}", path.display());

    Ok(run)
}

async fn print_progress(mut rx: mpsc::Receiver<EvalEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            EvalEvent::ProblemComplete {
                current,
                total,
                result,
            } => {
                let status = match &result.outcome {
                    ProblemOutcome::Evaluated { test_outcome, .. } if test_outcome.timed_out => {
                        "TIMEOUT".to_string()
                    }
                    ProblemOutcome::Evaluated { test_outcome, .. } if test_outcome.passed => {
                        "PASS".to_string()
                    }
                    ProblemOutcome::Evaluated { .. } => "FAIL".to_string(),
                    ProblemOutcome::Error { stage, .. } => format!("ERROR ({})", stage.label()),
                };
                eprintln!(
                    "  [{}/{}] {:<30} {:<18} {:>3}",
                    current,
                    total,
                    result.problem_id,
                    status,
                    result.total_score()
                );
            }
            EvalEvent::Cancelled { completed } => {
                eprintln!("  Aborted after {} problems", completed);
            }
            _ => {}
        }
    }
}

fn print_run(run: &BenchmarkRun, format: OutputFormat) -> Result<()> {
    let summary = run.summary();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(run)?);
        }
        OutputFormat::Csv => {
            println!("problem_id,status,tests_passed,tests_total,score,timed_out");
            for result in run.results() {
                let (status, passed, total) = match &result.outcome {
                    ProblemOutcome::Evaluated { test_outcome, .. } => (
                        match test_outcome.passed {
                            true => "pass",
                            false => "fail",
                        },
                        test_outcome.passed_tests(),
                        test_outcome.total_tests(),
                    ),
                    ProblemOutcome::Error { .. } => ("error", 0, 0),
                };
                println!(
                    "{},{},{},{},{},{}",
                    result.problem_id,
                    status,
                    passed,
                    total,
                    result.total_score(),
                    result.timed_out()
                );
            }
        }
        OutputFormat::Table => {
            println!();
            println!("Results:");
            println!("{:-<65}", "");
            println!("  {:<30} {:<10} {:>8} {:>8}", "Problem", "Status", "Tests", "Score");
            println!("{:-<65}", "");
            for result in run.results() {
                let (status, tests) = match &result.outcome {
                    ProblemOutcome::Evaluated { test_outcome, .. } => (
                        match (test_outcome.timed_out, test_outcome.passed) {
                            (true, _) => "timeout",
                            (false, true) => "pass",
                            (false, false) => "fail",
                        },
                        match test_outcome.counts {
                            Some(c) => format!("{}/{}", c.passed, c.total),
                            None => "-".to_string(),
                        },
                    ),
                    ProblemOutcome::Error { .. } => ("error", "-".to_string()),
                };
                println!(
                    "  {:<30} {:<10} {:>8} {:>8}",
                    result.problem_id,
                    status,
                    tests,
                    result.total_score()
                );
                if let Some(message) = result.error_message() {
                    println!("      {}", message);
                }
            }
            println!("{:-<65}", "");
            println!("  Generator:     {}", run.generator());
            println!("  Language:      {}", run.language().label());
            println!("  Problems:      {}", summary.total_problems);
            println!("  Avg Score:     {:.2}", summary.average_score);
            println!("  Pass Rate:     {:.1}%", summary.pass_rate * 100.0);
            println!("  Optimal Rate:  {:.1}%", summary.optimal_rate * 100.0);
            println!("  Errors:        {}", summary.errored);
            println!("  Timeouts:      {}", summary.timed_out);
            if run.aborted() {
                println!("  Status:        aborted");
            }
            println!();
        }
    }

    Ok(())
}

fn cmd_compare(
    dir: &std::path::Path,
    files: &[PathBuf],
    latest: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let store = ResultStore::open(dir)?;
    let runs = match (files.is_empty(), latest) {
        (false, _) => store.load_many(files)?,
        (true, Some(n)) => store.latest(n)?,
        (true, None) => store.latest(2)?,
    };
    if runs.is_empty() {
        bail!("no stored runs to compare in {}", dir.display());
    }

    let comparison = compare(&runs);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        OutputFormat::Csv => {
            let headers: Vec<String> = comparison
                .runs
                .iter()
                .map(|r| format!("{}@{}", r.generator, r.timestamp.format("%Y%m%d_%H%M%S")))
                .collect();
            println!("problem_id,{}", headers.join(","));
            for row in &comparison.problems {
                let cells: Vec<String> = row
                    .scores
                    .iter()
                    .map(|s| s.map(|v| v.to_string()).unwrap_or_default())
                    .collect();
                println!("{},{}", row.problem_id, cells.join(","));
            }
        }
        OutputFormat::Table => {
            let width = 30 + comparison.runs.len() * 22;
            println!();
            println!("Comparison:");
            println!("{:-<1$}", "", width);
            print!("  {:<28}", "");
            for run in &comparison.runs {
                print!("{:>22}", truncate(&run.generator, 20));
            }
            println!();
            print!("  {:<28}", "");
            for run in &comparison.runs {
                print!("{:>22}", run.timestamp.format("%Y-%m-%d %H:%M").to_string());
            }
            println!();
            println!("{:-<1$}", "", width);
            for row in &comparison.problems {
                print!("  {:<28}", truncate(&row.problem_id, 28));
                for score in &row.scores {
                    let cell = score.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
                    print!("{:>22}", cell);
                }
                println!();
            }
            println!("{:-<1$}", "", width);
            print!("  {:<28}", "Avg Score");
            for run in &comparison.runs {
                print!("{:>22.2}", run.summary.average_score);
            }
            println!();
            print!("  {:<28}", "Pass Rate");
            for run in &comparison.runs {
                print!("{:>21.1}%", run.summary.pass_rate * 100.0);
            }
            println!();
            print!("  {:<28}", "Optimal Rate");
            for run in &comparison.runs {
                print!("{:>21.1}%", run.summary.optimal_rate * 100.0);
            }
            println!();
            println!();
        }
    }

    Ok(())
}

fn cmd_history(dir: &std::path::Path) -> Result<()> {
    let store = ResultStore::open(dir)?;
    let runs = store.list()?;

    println!();
    println!("Stored Runs ({}):", dir.display());
    println!("{:-<90}", "");
    println!(
        "  {:<20} {:<24} {:<12} {:>8} {:>9} {:>8}",
        "Timestamp", "Generator", "Language", "Problems", "Avg Score", "Pass"
    );
    println!("{:-<90}", "");
    for run in &runs {
        println!(
            "  {:<20} {:<24} {:<12} {:>8} {:>9.2} {:>7.1}%{}",
            run.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            truncate(&run.generator, 24),
            run.language.name(),
            run.summary.total_problems,
            run.summary.average_score,
            run.summary.pass_rate * 100.0,
            if run.aborted { "  (aborted)" } else { "" }
        );
    }
    if runs.is_empty() {
        println!("  No runs yet.");
    }
    println!();

    Ok(())
}

fn cmd_problems(dir: &std::path::Path, language: Language) -> Result<()> {
    let ids = problem_ids(dir)?;

    println!();
    println!("Problems in {} ({}):", dir.display(), language.label());
    println!("{:-<65}", "");
    println!("  {:<4} {:<36} {:<8} {}", "#", "ID", "Rubric", "Tests");
    println!("{:-<65}", "");
    for (i, id) in ids.iter().enumerate() {
        let problem_dir = dir.join(id);
        let rubric = match problem_dir.join("rubric.md").is_file() {
            true => "yes",
            false => "-",
        };
        let tests = match test_suite_path(&problem_dir, language).is_file() {
            true => "found",
            false => "missing",
        };
        println!("  {:<4} {:<36} {:<8} {}", i + 1, id, rubric, tests);
    }
    println!();

    Ok(())
}

async fn cmd_models(config: &CodeBurnConfig) -> Result<()> {
    let client = OllamaClient::new(&config.ollama.host);
    let models = client
        .list_models()
        .await
        .with_context(|| format!("failed to reach Ollama at {}", client.host()))?;

    println!();
    println!("Available Models:");
    println!("{:-<65}", "");
    println!("  {:<4} {:<40} {}", "#", "ID", "Quantization");
    println!("{:-<65}", "");
    for (i, m) in models.iter().enumerate() {
        let quant = m.quantization.as_deref().unwrap_or("-");
        println!("  {:<4} {:<40} {}", i + 1, m.id, quant);
    }
    println!();
    println!("  Use: codeburn run --generator <ID>");
    println!();

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.chars().count() > max {
        true => {
            let kept: String = s.chars().take(max.saturating_sub(1)).collect();
            format!("{kept}…")
        }
        false => s.to_string(),
    }
}
