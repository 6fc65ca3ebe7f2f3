use crate::embeddings::Embedder;
use crate::error::AgentError;
use crate::index::VectorIndex;
use crate::models::DocumentId;
use crate::traits::Tool;
use async_trait::async_trait;
use std::sync::Arc;

/// Separator placed between retrieved chunk texts.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Similarity search over one index, exposed to the agent as a tool.
pub struct RetrievalTool {
    name: String,
    description: String,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl RetrievalTool {
    pub fn new(
        name: impl Into<String>,
        documents: &[DocumentId],
        index: VectorIndex,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
    ) -> Self {
        Self {
            name: name.into(),
            description: describe_documents(documents),
            index,
            embedder,
            top_k,
        }
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

/// "Useful for searching information about a, b" built from file stems.
pub fn describe_documents(documents: &[DocumentId]) -> String {
    let stems = documents
        .iter()
        .map(|name| name.split('.').next().unwrap_or(name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("Useful for searching information about {stems}")
}

#[async_trait]
impl Tool for RetrievalTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, input: &str) -> Result<String, AgentError> {
        let query_vector = self
            .embedder
            .embed(input)
            .await
            .map_err(|error| AgentError::Tool {
                tool: self.name.clone(),
                details: error.to_string(),
            })?;

        Ok(self
            .index
            .search(&query_vector, self.top_k)
            .into_iter()
            .map(|hit| hit.chunk.text)
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR))
    }
}
