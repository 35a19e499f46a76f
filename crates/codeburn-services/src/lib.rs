mod problem_loader;
mod store;

pub use problem_loader::{load_problems, problem_ids, test_suite_path, ProblemLoaderError};
pub use store::{
    compare, Comparison, ComparisonRow, ProblemScores, ResultStore, StoreError, StoredRun,
};
