pub mod code_executor;
pub mod code_runner;
pub mod extractor;
pub mod generator;
pub mod ollama;

pub use code_executor::{CodeExecutor, CodeExecutorError};
pub use code_runner::{EvalEvent, EvaluationPipeline};
pub use extractor::{extract_solution, fence_language};
pub use generator::{system_prompt, Generator, GeneratorError, ReplayGenerator};
pub use ollama::{OllamaClient, OllamaGenerator, OllamaModel};
