use crate::error::{AgentError, LoadError};
use crate::models::{DocumentId, Segment};
use async_trait::async_trait;
use std::path::Path;

/// Turns files into text segments and keeps them until removed.
///
/// Documents are identified by the file name of the path they were added from.
pub trait SegmentLoader: Send {
    fn supported_extensions(&self) -> &[&'static str];

    fn add(&mut self, path: &Path) -> Result<(), LoadError>;

    /// Unknown paths are ignored.
    fn remove(&mut self, path: &Path);

    fn all_segments(&self) -> Vec<Segment>;

    fn document_ids(&self) -> Vec<DocumentId>;

    fn document_count(&self) -> usize;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Completes `prompt`; generation stops before any of `stop`.
    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String, AgentError>;
}

/// A named capability the agent may call with free text.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn call(&self, input: &str) -> Result<String, AgentError>;
}
