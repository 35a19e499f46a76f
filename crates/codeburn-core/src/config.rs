use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{CodeBurnError, Language, Result};

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "codeburn.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBurnConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    /// Per-language overrides of the built-in executor commands.
    #[serde(default)]
    pub executors: BTreeMap<Language, ExecutorSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub timeout_secs: u64,
    pub concurrency: usize,
    pub problems_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            concurrency: 1,
            problems_dir: PathBuf::from("problems"),
            output_dir: PathBuf::from("results"),
            temperature: 0.1,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
        }
    }
}

/// Command used to run a language's test suite.
///
/// `args` may contain the placeholders `{test_file}`, `{solution_file}`,
/// `{work_dir}`, `{report_file}` and `{problem_dir}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ExecutorSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    /// Executors that work out of the box. Other languages need an entry in
    /// the config file.
    pub fn builtin(language: Language) -> Option<ExecutorSpec> {
        match language {
            Language::Python => Some(ExecutorSpec::new(
                "python3",
                &[
                    "-m",
                    "pytest",
                    "{test_file}",
                    "-q",
                    "-p",
                    "no:cacheprovider",
                    "--json-report",
                    "--json-report-file={report_file}",
                ],
            )),
            Language::JavaScript => Some(ExecutorSpec::new("node", &["--test", "{test_file}"])),
            Language::Java | Language::Cpp | Language::Rust | Language::Go => None,
        }
    }
}

impl CodeBurnConfig {
    /// Load from an explicit path, else from `codeburn.json` if present, else
    /// defaults. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                match default_path.exists() {
                    true => Self::from_file(default_path)?,
                    false => Self::default(),
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CodeBurnError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let config: CodeBurnConfig = serde_json::from_str(&content)
            .map_err(|e| CodeBurnError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `OLLAMA_HOST`, `CODEBURN_TIMEOUT_SECS` and `CODEBURN_CONCURRENCY`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.ollama.host = host;
        }
        if let Some(raw) = lookup("CODEBURN_TIMEOUT_SECS") {
            self.defaults.timeout_secs = raw.trim().parse().map_err(|_| {
                CodeBurnError::Config(format!("CODEBURN_TIMEOUT_SECS is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = lookup("CODEBURN_CONCURRENCY") {
            self.defaults.concurrency = raw.trim().parse().map_err(|_| {
                CodeBurnError::Config(format!("CODEBURN_CONCURRENCY is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    /// Configured executor for a language, falling back to the built-in one.
    pub fn executor(&self, language: Language) -> Option<ExecutorSpec> {
        self.executors
            .get(&language)
            .cloned()
            .or_else(|| ExecutorSpec::builtin(language))
    }
}
