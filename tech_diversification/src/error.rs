use des::parallel::{TaskFailure, ThreadPoolBuildError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Task failure: {0}")]
    Task(#[from] TaskFailure),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ModelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ModelError::Configuration(message.into())
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        ModelError::Numerical(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
