//! Error types for the Brickflow framework

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrickflowError {
    #[error("rate limit must be greater than 0, got {0}")]
    InvalidRate(f64),

    #[error("invalid sliding window geometry: {0}")]
    WindowGeometry(String),

    #[error("pipeline event loop failed to start")]
    LoopStart,

    #[error("pipeline has already run and cannot be restarted")]
    PipelineSpent,

    #[error("invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrickflowError>;
