use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;

/// Identity of a document inside a session: the uploaded file name.
pub type DocumentId = String;

/// A file as reported by the UI: its name plus the full byte content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Raw text produced by a loader for one document, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub document_id: DocumentId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: DocumentId,
    pub chunk_index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// What an agent turn produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub retrieval_top_k: usize,
    pub retrieval_tool_name: String,
    pub memory_window: usize,
    pub parse_error_max_chars: usize,
    pub max_agent_iterations: usize,
    pub stream_pace: Duration,
}

impl SessionOptions {
    pub fn chunking(&self) -> Result<ChunkingConfig, ConfigError> {
        Ok(ChunkingConfig::new(
            self.chunk_max_chars,
            self.chunk_overlap_chars,
        )?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking()?;
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidArgument(
                "retrieval top-k must be positive".to_string(),
            ));
        }
        if self.max_agent_iterations == 0 {
            return Err(ConfigError::InvalidArgument(
                "agent iteration limit must be positive".to_string(),
            ));
        }
        if self.retrieval_tool_name.trim().is_empty() {
            return Err(ConfigError::InvalidArgument(
                "retrieval tool name is empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_500,
            chunk_overlap_chars: 200,
            retrieval_top_k: 4,
            retrieval_tool_name: "vector-tool".to_string(),
            memory_window: 5,
            parse_error_max_chars: 50,
            max_agent_iterations: 15,
            stream_pace: Duration::from_millis(20),
        }
    }
}
