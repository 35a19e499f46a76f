use std::path::{Path, PathBuf};

use codeburn_core::{Language, Problem};

const STATEMENT_FILE: &str = "problem.md";
const RUBRIC_FILE: &str = "rubric.md";

#[derive(Debug, thiserror::Error)]
pub enum ProblemLoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Problems directory not found: {}", .0.display())]
    DirNotFound(PathBuf),
    #[error("No problems found in {}", .0.display())]
    NoProblems(PathBuf),
    #[error("Unknown problem id: {0}")]
    UnknownProblem(String),
}

/// Ids of every problem under `dir`, sorted. Directories without a
/// statement file are skipped.
pub fn problem_ids(dir: &Path) -> Result<Vec<String>, ProblemLoaderError> {
    if !dir.is_dir() {
        return Err(ProblemLoaderError::DirNotFound(dir.to_path_buf()));
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!("Skipping problem directory with non-UTF-8 name: {:?}", path);
            continue;
        };
        if !path.join(STATEMENT_FILE).is_file() {
            tracing::warn!("Skipping {}: no {}", path.display(), STATEMENT_FILE);
            continue;
        }
        ids.push(id.to_string());
    }

    ids.sort();
    Ok(ids)
}

/// Loads problems for `language`, either all of them or the selected ids in
/// the order given. An empty result is an error.
pub fn load_problems(
    dir: &Path,
    language: Language,
    selection: Option<&[String]>,
) -> Result<Vec<Problem>, ProblemLoaderError> {
    let available = problem_ids(dir)?;

    let ids: Vec<String> = match selection {
        None => available,
        Some(selected) => {
            for id in selected {
                if !available.contains(id) {
                    return Err(ProblemLoaderError::UnknownProblem(id.clone()));
                }
            }
            selected.to_vec()
        }
    };

    if ids.is_empty() {
        return Err(ProblemLoaderError::NoProblems(dir.to_path_buf()));
    }

    let problems = ids
        .iter()
        .map(|id| load_problem(&dir.join(id), id, language))
        .collect::<Result<Vec<_>, _>>()?;

    tracing::info!(
        "Loaded {} problems from {} for {}",
        problems.len(),
        dir.display(),
        language
    );
    Ok(problems)
}

fn load_problem(dir: &Path, id: &str, language: Language) -> Result<Problem, ProblemLoaderError> {
    let statement = std::fs::read_to_string(dir.join(STATEMENT_FILE))?;
    let test_suite = test_suite_path(dir, language);
    if !test_suite.is_file() {
        // Reported per problem by the executor; the rest of the run goes on.
        tracing::warn!("{}: no test suite at {}", id, test_suite.display());
    }

    Ok(Problem {
        id: id.to_string(),
        statement,
        dir: dir.to_path_buf(),
        test_suite,
        has_rubric: dir.join(RUBRIC_FILE).is_file(),
    })
}

/// `tests/test_<language>.<ext>`, e.g. `tests/test_python.py`.
pub fn test_suite_path(problem_dir: &Path, language: Language) -> PathBuf {
    problem_dir.join("tests").join(format!(
        "test_{}.{}",
        language.name(),
        language.file_extension()
    ))
}
