use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeBurnError {
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CodeBurnError>;
