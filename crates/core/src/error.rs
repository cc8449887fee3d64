use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("converter `{program}` was not found on PATH")]
    ConverterNotFound { program: String },

    #[error("converter exited with {status}: {stderr}")]
    ConverterFailed { status: String, stderr: String },

    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("captioning endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("captioning endpoint returned an empty description")]
    Empty,

    #[error("unable to read image: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding endpoint returned {status}: {body}")]
    Embedding { status: u16, body: String },

    #[error("generation endpoint returned {status}: {body}")]
    Generation { status: u16, body: String },

    #[error("invalid request: {0}")]
    Request(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
