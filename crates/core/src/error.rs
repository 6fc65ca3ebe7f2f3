use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported document type `{extension}`: {path}")]
    Unsupported { path: PathBuf, extension: String },

    #[error("unreadable document {path}: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

impl LoadError {
    pub(crate) fn corrupt(path: &std::path::Path, details: impl ToString) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            details: details.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned {status}: {details}")]
    Service { status: u16, details: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service returned {status}: {details}")]
    Service { status: u16, details: String },

    #[error("invalid model response: {0}")]
    InvalidResponse(String),

    #[error("tool `{tool}` failed: {details}")]
    Tool { tool: String, details: String },

    #[error("model request failed: {0}")]
    Request(String),
}

/// Model output that is neither a tool call nor a final answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Could not parse LLM output: `{output}`")]
pub struct ParseError {
    pub output: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk max length must be positive")]
    ZeroMaxLength,

    #[error("chunk overlap must be positive")]
    ZeroOverlap,

    #[error("chunk overlap {overlap} must be smaller than max length {max}")]
    OverlapTooLarge { overlap: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("embedding failed during rebuild: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking config: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_mentions_raw_output() {
        let error = ParseError {
            output: "garbled".to_string(),
        };
        assert_eq!(error.to_string(), "Could not parse LLM output: `garbled`");
    }

    #[test]
    fn rebuild_error_wraps_embedding_error() {
        let error: RebuildError = EmbeddingError::Service {
            status: 503,
            details: "overloaded".to_string(),
        }
        .into();
        assert!(error.to_string().contains("503"));
        assert!(matches!(error, RebuildError::Embedding(_)));
    }
}
