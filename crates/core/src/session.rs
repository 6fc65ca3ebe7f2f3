use crate::agent::{compose_agent, Agent, AgentSettings, ConversationMemory, SharedMemory};
use crate::chunking::{split_segments, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::{AgentError, ConfigError, LoadError, RebuildError};
use crate::index::VectorIndex;
use crate::models::{AgentOutput, ChatMessage, ChatRole, DocumentId, SessionOptions, UploadedFile};
use crate::stream::stream_words;
use crate::tool::RetrievalTool;
use crate::traits::{ChatModel, SegmentLoader, Tool};
use futures::Stream;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct FailedUpload {
    pub name: String,
    pub error: LoadError,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub added: Vec<DocumentId>,
    pub removed: Vec<DocumentId>,
    pub failed: Vec<FailedUpload>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Clean,
    Rebuilt {
        documents: usize,
        chunks: usize,
        tools: usize,
    },
}

pub struct Session<L: SegmentLoader> {
    options: SessionOptions,
    chunking: ChunkingConfig,
    staging: TempDir,
    loader: L,
    tracked: Vec<DocumentId>,
    dirty: bool,
    published: Arc<Agent>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    memory: SharedMemory,
    transcript: Vec<ChatMessage>,
}

impl<L: SegmentLoader> Session<L> {
    pub fn new(
        loader: L,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        options: SessionOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let chunking = options.chunking()?;
        let staging = tempfile::Builder::new()
            .prefix("doc-assistant-")
            .tempdir()?;
        let memory = ConversationMemory::shared(options.memory_window);
        let published = Arc::new(compose_agent(
            llm.clone(),
            memory.clone(),
            Vec::new(),
            AgentSettings::from(&options),
        ));

        debug!(staging = %staging.path().display(), "session started");

        Ok(Self {
            options,
            chunking,
            staging,
            loader,
            tracked: Vec::new(),
            dirty: false,
            published,
            embedder,
            llm,
            memory,
            transcript: Vec::new(),
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn tracked_files(&self) -> &[DocumentId] {
        &self.tracked
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.tracked.iter().any(|tracked| tracked == name)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Returns `false` if the name is already tracked.
    pub fn add(&mut self, file: &UploadedFile) -> Result<bool, LoadError> {
        if self.is_tracked(&file.name) {
            return Ok(false);
        }

        let path = self.staged_path(&file.name)?;
        fs::write(&path, &file.bytes)?;

        if let Err(error) = self.loader.add(&path) {
            discard_staged(&path);
            warn!(file = %file.name, %error, "upload rejected");
            return Err(error);
        }

        self.tracked.push(file.name.clone());
        self.dirty = true;
        info!(file = %file.name, bytes = file.bytes.len(), "file added");
        Ok(true)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let Some(position) = self.tracked.iter().position(|tracked| tracked == name) else {
            return false;
        };

        let path = self.staging.path().join(name);
        self.loader.remove(&path);
        discard_staged(&path);

        self.tracked.remove(position);
        self.dirty = true;
        info!(file = %name, "file removed");
        true
    }

    /// Per-file load failures are reported, never abort the batch.
    pub fn reconcile(&mut self, uploads: &[UploadedFile]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for file in uploads {
            if !seen.insert(file.name.as_str()) || self.is_tracked(&file.name) {
                continue;
            }
            match self.add(file) {
                Ok(true) => report.added.push(file.name.clone()),
                Ok(false) => {}
                Err(error) => report.failed.push(FailedUpload {
                    name: file.name.clone(),
                    error,
                }),
            }
        }

        let stale: Vec<DocumentId> = self
            .tracked
            .iter()
            .filter(|tracked| !seen.contains(tracked.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if self.remove(&name) {
                report.removed.push(name);
            }
        }

        if report.changed() || !report.failed.is_empty() {
            info!(
                added = report.added.len(),
                removed = report.removed.len(),
                failed = report.failed.len(),
                dirty = self.dirty,
                "reconciled uploads"
            );
        }
        report
    }

    /// On failure the published agent and the dirty flag are left untouched.
    pub async fn rebuild_if_dirty(&mut self) -> Result<RebuildOutcome, RebuildError> {
        if !self.dirty {
            debug!("rebuild skipped, file set unchanged");
            return Ok(RebuildOutcome::Clean);
        }

        let segments = self.loader.all_segments();
        let chunks = split_segments(&segments, self.chunking);
        let chunk_count = chunks.len();

        let tools: Vec<Arc<dyn Tool>> = if chunks.is_empty() {
            Vec::new()
        } else {
            let index = VectorIndex::build(chunks, self.embedder.as_ref())
                .await
                .map_err(|error| {
                    warn!(%error, chunks = chunk_count, "index build failed, keeping previous agent");
                    error
                })?;
            let tool: Arc<dyn Tool> = Arc::new(RetrievalTool::new(
                self.options.retrieval_tool_name.clone(),
                &self.tracked,
                index,
                self.embedder.clone(),
                self.options.retrieval_top_k,
            ));
            vec![tool]
        };

        let tool_count = tools.len();
        let agent = compose_agent(
            self.llm.clone(),
            self.memory.clone(),
            tools,
            AgentSettings::from(&self.options),
        );
        self.published = Arc::new(agent);
        self.dirty = false;

        info!(
            documents = self.tracked.len(),
            chunks = chunk_count,
            tools = tool_count,
            "agent rebuilt"
        );
        Ok(RebuildOutcome::Rebuilt {
            documents: self.tracked.len(),
            chunks: chunk_count,
            tools: tool_count,
        })
    }

    /// The last published agent. Never waits for, or triggers, a rebuild.
    pub fn current_agent(&self) -> Arc<Agent> {
        Arc::clone(&self.published)
    }

    pub async fn ask(&mut self, prompt: &str) -> Result<AgentOutput, AgentError> {
        self.transcript.push(ChatMessage::new(ChatRole::User, prompt));
        let agent = self.current_agent();
        let answer = agent.invoke(prompt).await?;
        self.transcript
            .push(ChatMessage::new(ChatRole::Assistant, answer.output.clone()));
        Ok(answer)
    }

    pub fn stream_answer(&self, answer: &AgentOutput) -> impl Stream<Item = String> {
        stream_words(&answer.output, self.options.stream_pace)
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Clears the displayed messages; the agent's memory is kept.
    pub fn clear_history(&mut self) {
        self.transcript.clear();
    }

    fn staged_path(&self, name: &str) -> Result<PathBuf, LoadError> {
        let is_plain_name = Path::new(name)
            .file_name()
            .and_then(|file_name| file_name.to_str())
            == Some(name);
        if name.is_empty() || !is_plain_name {
            return Err(LoadError::InvalidName(name.to_string()));
        }
        Ok(self.staging.path().join(name))
    }
}

fn discard_staged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => warn!(path = %path.display(), %error, "failed to delete staged file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::loader::FileSegmentLoader;
    use async_trait::async_trait;

    struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        async fn complete(&self, _prompt: &str, _stop: &[&str]) -> Result<String, AgentError> {
            Ok("AI: ok".to_string())
        }
    }

    fn session() -> Session<FileSegmentLoader> {
        Session::new(
            FileSegmentLoader::new(),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(SilentModel),
            SessionOptions::default(),
        )
        .expect("session")
    }

    #[test]
    fn add_stages_bytes_and_marks_dirty() {
        let mut session = session();
        let added = session
            .add(&UploadedFile::new("a.txt", "hello world"))
            .unwrap();

        assert!(added);
        assert!(session.is_dirty());
        assert_eq!(session.tracked_files(), ["a.txt".to_string()]);
        assert_eq!(
            fs::read_to_string(session.staging_dir().join("a.txt")).unwrap(),
            "hello world"
        );
    }

    #[test]
    fn adding_a_tracked_name_is_a_noop() {
        let mut session = session();
        session.add(&UploadedFile::new("a.txt", "one")).unwrap();
        let again = session.add(&UploadedFile::new("a.txt", "two")).unwrap();

        assert!(!again);
        assert_eq!(session.loader().document_count(), 1);
    }

    #[test]
    fn rejected_upload_is_not_tracked_or_staged() {
        let mut session = session();
        let result = session.add(&UploadedFile::new("photo.png", vec![0u8, 1, 2]));

        assert!(matches!(result, Err(LoadError::Unsupported { .. })));
        assert!(!session.is_dirty());
        assert!(session.tracked_files().is_empty());
        assert!(!session.staging_dir().join("photo.png").exists());
    }

    #[test]
    fn names_with_directories_are_rejected() {
        let mut session = session();
        for name in ["../escape.txt", "nested/a.txt", "", ".."] {
            let result = session.add(&UploadedFile::new(name, "x"));
            assert!(matches!(result, Err(LoadError::InvalidName(_))), "{name}");
        }
    }

    #[test]
    fn remove_unstages_and_ignores_unknown_names() {
        let mut session = session();
        session.add(&UploadedFile::new("a.txt", "x")).unwrap();

        assert!(!session.remove("missing.txt"));
        assert!(session.remove("a.txt"));
        assert!(!session.staging_dir().join("a.txt").exists());
        assert_eq!(session.loader().document_count(), 0);
    }

    #[test]
    fn reconcile_reports_failures_without_aborting_the_batch() {
        let mut session = session();
        let report = session.reconcile(&[
            UploadedFile::new("bad.bin", "x"),
            UploadedFile::new("good.txt", "fine"),
        ]);

        assert_eq!(report.added, vec!["good.txt".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "bad.bin");
        assert!(session.is_dirty());
    }

    #[test]
    fn reconcile_removes_files_no_longer_uploaded() {
        let mut session = session();
        session.reconcile(&[
            UploadedFile::new("a.txt", "a"),
            UploadedFile::new("b.txt", "b"),
        ]);
        let report = session.reconcile(&[UploadedFile::new("b.txt", "b")]);

        assert_eq!(report.removed, vec!["a.txt".to_string()]);
        assert_eq!(session.tracked_files(), ["b.txt".to_string()]);
        assert_eq!(session.loader().document_ids(), vec!["b.txt".to_string()]);
    }

    #[tokio::test]
    async fn empty_documents_compose_a_toolless_agent() {
        let mut session = session();
        session.add(&UploadedFile::new("empty.txt", "")).unwrap();

        let outcome = session.rebuild_if_dirty().await.unwrap();

        assert_eq!(
            outcome,
            RebuildOutcome::Rebuilt {
                documents: 1,
                chunks: 0,
                tools: 0
            }
        );
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn ask_records_both_sides_and_clear_keeps_memory() {
        let mut session = session();
        let answer = session.ask("hello?").await.unwrap();

        assert_eq!(answer.output, "ok");
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[0].role, ChatRole::User);

        session.clear_history();
        assert!(session.transcript().is_empty());
        assert_eq!(session.current_agent().memory().lock().unwrap().len(), 1);
    }

    #[test]
    fn invalid_options_refuse_to_start() {
        let options = SessionOptions {
            chunk_overlap_chars: 2_000,
            ..SessionOptions::default()
        };
        let result = Session::new(
            FileSegmentLoader::new(),
            Arc::new(CharacterNgramEmbedder::default()),
            Arc::new(SilentModel),
            options,
        );
        assert!(matches!(result, Err(ConfigError::Chunking(_))));
    }
}
