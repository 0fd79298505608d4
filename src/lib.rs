use thiserror::Error;

pub type Result<T> = std::result::Result<T, SliceError>;

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod retriever;
pub mod schema;
