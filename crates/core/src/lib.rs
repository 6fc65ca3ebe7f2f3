pub mod agent;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod loader;
pub mod models;
pub mod openai;
pub mod session;
pub mod stream;
pub mod tool;
pub mod traits;

pub use agent::{
    compose_agent, parse_output, truncate_chars, Agent, AgentSettings, AgentStep,
    ConversationMemory, Exchange, SharedMemory, ITERATION_LIMIT_OUTPUT,
};
pub use chunking::{split_segments, split_text, ChunkingConfig};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    AgentError, ChunkingError, ConfigError, EmbeddingError, LoadError, ParseError, RebuildError,
};
pub use index::VectorIndex;
pub use loader::{discover_documents, is_supported, FileSegmentLoader, SUPPORTED_EXTENSIONS};
pub use models::{
    AgentOutput, ChatMessage, ChatRole, Chunk, DocumentId, ScoredChunk, Segment, SessionOptions,
    UploadedFile,
};
pub use openai::{OpenAiChatModel, OpenAiConfig, OpenAiEmbedder, CHAT_MODELS};
pub use session::{FailedUpload, RebuildOutcome, ReconcileReport, Session};
pub use stream::stream_words;
pub use tool::{describe_documents, RetrievalTool};
pub use traits::{ChatModel, SegmentLoader, Tool};
