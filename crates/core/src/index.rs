use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::EmbeddingError;
use crate::models::{Chunk, ScoredChunk};

/// Immutable snapshot of one chunk set and its embeddings.
///
/// There is no insert or delete: a new document set means a new index.
#[derive(Debug)]
pub struct VectorIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embeds every chunk and builds the index, all or nothing.
    ///
    /// The first embedding failure aborts the build; no partial index is
    /// ever returned.
    pub async fn build(chunks: Vec<Chunk>, embedder: &dyn Embedder) -> Result<Self, EmbeddingError> {
        if chunks.is_empty() {
            return Err(EmbeddingError::Request(
                "cannot build an index from zero chunks".to_string(),
            ));
        }

        let expected = embedder.dimensions();
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = embedder.embed(&chunk.text).await?;
            if vector.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            vectors.push(vector);
        }

        Ok(Self { chunks, vectors })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Nearest chunks by descending cosine similarity; equal scores keep input order.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, cosine_similarity(query_vector, vector)))
            .collect();

        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        scored
            .into_iter()
            .take(top_k)
            .map(|(position, score)| ScoredChunk {
                chunk: self.chunks[position].clone(),
                score,
            })
            .collect()
    }
}
