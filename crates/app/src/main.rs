use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use doc_assistant_core::{
    discover_documents, CharacterNgramEmbedder, Embedder, FileSegmentLoader, OpenAiChatModel,
    OpenAiConfig, OpenAiEmbedder, RebuildOutcome, Session, SessionOptions, UploadedFile,
    CHAT_MODELS,
};
use futures::StreamExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-assistant", version)]
struct Cli {
    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = doc_assistant_core::openai::DEFAULT_BASE_URL)]
    base_url: String,

    /// Chat model
    #[arg(long, default_value = CHAT_MODELS[0], value_parser = CHAT_MODELS)]
    model: String,

    /// Sampling temperature (0.0 - 1.0)
    #[arg(long, default_value = "0.2")]
    temperature: f32,

    /// Embedding model
    #[arg(long, default_value = doc_assistant_core::openai::DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Dimensionality of the embedding model's vectors
    #[arg(long, default_value = "1536")]
    embedding_dimensions: usize,

    /// File to upload at startup (repeatable).
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Folder whose supported documents are uploaded at startup.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Maximum characters per chunk.
    #[arg(long, default_value = "1500")]
    chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Number of chunks handed to the model per lookup.
    #[arg(long, default_value = "4")]
    top_k: usize,

    /// Name the retrieval tool is offered to the model under.
    #[arg(long, default_value = "vector-tool")]
    tool_name: String,

    /// Past exchanges included in each prompt.
    #[arg(long, default_value = "5")]
    memory_window: usize,

    /// Characters of an unparseable model reply shown as the answer.
    #[arg(long, default_value = "50")]
    parse_error_chars: usize,

    /// Model calls allowed per chat turn.
    #[arg(long, default_value = "15")]
    max_iterations: usize,

    /// Delay between streamed words, in milliseconds.
    #[arg(long, default_value = "20")]
    stream_pace_ms: u64,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Retries for rate-limited or failed HTTP requests.
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Embed documents locally with character n-grams instead of the embeddings API.
    #[arg(long)]
    offline: bool,
}

impl Cli {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            chunk_max_chars: self.chunk_size,
            chunk_overlap_chars: self.chunk_overlap,
            retrieval_top_k: self.top_k,
            retrieval_tool_name: self.tool_name.clone(),
            memory_window: self.memory_window,
            parse_error_max_chars: self.parse_error_chars,
            max_agent_iterations: self.max_iterations,
            stream_pace: Duration::from_millis(self.stream_pace_ms),
        }
    }

    fn provider_config(&self, api_key: String) -> OpenAiConfig {
        let mut provider = OpenAiConfig::new(api_key);
        provider.base_url = self.base_url.clone();
        provider.chat_model = self.model.clone();
        provider.temperature = self.temperature;
        provider.embedding_model = self.embedding_model.clone();
        provider.embedding_dimensions = self.embedding_dimensions;
        provider.timeout_secs = self.timeout_secs;
        provider.max_retries = self.max_retries;
        provider
    }

    fn embedder(&self, provider: &OpenAiConfig) -> anyhow::Result<Arc<dyn Embedder>> {
        if self.offline {
            return Ok(Arc::new(CharacterNgramEmbedder::default()));
        }
        Ok(Arc::new(OpenAiEmbedder::new(provider.clone())?))
    }
}

const HELP: &str = "commands: /add <path>  /remove <name>  /files  /clear  /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let api_key = cli
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("please provide an OpenAI API key with --api-key or OPENAI_API_KEY")?;

    let provider = cli.provider_config(api_key);
    let options = cli.session_options();

    let embedder = cli.embedder(&provider)?;
    let llm = Arc::new(OpenAiChatModel::new(provider)?);
    let mut session = Session::new(FileSegmentLoader::new(), embedder, llm, options)?;

    info!(
        version = app_version,
        model = %cli.model,
        offline = cli.offline,
        started_at = %Utc::now().to_rfc3339(),
        "doc-assistant boot"
    );

    let mut startup = cli.files.clone();
    if let Some(dir) = &cli.dir {
        startup.extend(discover_documents(dir));
    }

    let mut uploads = Vec::new();
    for path in &startup {
        match read_upload(path).await {
            Ok(file) => uploads.push(file),
            Err(error) => warn!(path = %path.display(), %error, "skipped file"),
        }
    }

    sync_uploads(&mut session, &mut uploads).await;
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/files", _) => {
                if session.tracked_files().is_empty() {
                    println!("no files uploaded");
                }
                for name in session.tracked_files() {
                    println!("  {name}");
                }
            }
            ("/clear", _) => {
                session.clear_history();
                println!("chat history cleared");
            }
            ("/add", path) => match read_upload(Path::new(path.trim())).await {
                Ok(file) => {
                    uploads.retain(|existing| existing.name != file.name);
                    uploads.push(file);
                }
                Err(error) => println!("could not read {path}: {error}"),
            },
            ("/remove", name) => uploads.retain(|existing| existing.name != name.trim()),
            (command, _) if command.starts_with('/') => println!("{HELP}"),
            _ => {
                sync_uploads(&mut session, &mut uploads).await;
                chat_turn(&mut session, line).await?;
                continue;
            }
        }

        sync_uploads(&mut session, &mut uploads).await;
    }

    Ok(())
}

async fn read_upload(path: &Path) -> anyhow::Result<UploadedFile> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("path has no file name: {}", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(UploadedFile::new(name, bytes))
}

/// One interaction cycle: reconcile the upload list, then rebuild if needed.
async fn sync_uploads(session: &mut Session<FileSegmentLoader>, uploads: &mut Vec<UploadedFile>) {
    let report = session.reconcile(uploads);
    for failed in &report.failed {
        println!("failed to upload {}: {}", failed.name, failed.error);
    }
    uploads.retain(|file| !report.failed.iter().any(|failed| failed.name == file.name));

    if !session.is_dirty() {
        return;
    }

    println!("Uploading files...");
    match session.rebuild_if_dirty().await {
        Ok(RebuildOutcome::Rebuilt { documents, chunks, .. }) => {
            println!("Files were updated successfully. ({documents} documents, {chunks} chunks)");
        }
        Ok(RebuildOutcome::Clean) => {}
        Err(error) => {
            warn!(%error, "rebuild failed");
            println!("could not update files: {error}; answers use the previous documents");
        }
    }
}

async fn chat_turn(session: &mut Session<FileSegmentLoader>, prompt: &str) -> anyhow::Result<()> {
    match session.ask(prompt).await {
        Ok(answer) => {
            let mut tokens = Box::pin(session.stream_answer(&answer));
            while let Some(token) = tokens.next().await {
                print!("{token}");
                std::io::stdout().flush()?;
            }
            println!();
        }
        Err(error) => println!("assistant failed to answer: {error}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_assistant_core::DEFAULT_EMBEDDING_DIMENSIONS;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("doc-assistant").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults_match_session_defaults() {
        let cli = parse(&[]);
        let options = cli.session_options();
        let defaults = SessionOptions::default();

        assert_eq!(options.chunk_max_chars, defaults.chunk_max_chars);
        assert_eq!(options.chunk_overlap_chars, defaults.chunk_overlap_chars);
        assert_eq!(options.retrieval_top_k, defaults.retrieval_top_k);
        assert_eq!(options.retrieval_tool_name, defaults.retrieval_tool_name);
        assert_eq!(options.memory_window, defaults.memory_window);
        assert_eq!(options.parse_error_max_chars, defaults.parse_error_max_chars);
        assert_eq!(options.max_agent_iterations, defaults.max_agent_iterations);
        assert_eq!(options.stream_pace, defaults.stream_pace);
        assert!(!cli.offline);
    }

    #[test]
    fn every_setting_is_configurable() {
        let cli = parse(&[
            "--tool-name",
            "manuals",
            "--memory-window",
            "2",
            "--parse-error-chars",
            "10",
            "--max-iterations",
            "4",
            "--stream-pace-ms",
            "0",
            "--timeout-secs",
            "5",
            "--max-retries",
            "1",
        ]);
        let options = cli.session_options();
        assert_eq!(options.retrieval_tool_name, "manuals");
        assert_eq!(options.memory_window, 2);
        assert_eq!(options.parse_error_max_chars, 10);
        assert_eq!(options.max_agent_iterations, 4);
        assert_eq!(options.stream_pace, Duration::ZERO);

        let provider = cli.provider_config("sk-test".to_string());
        assert_eq!(provider.timeout_secs, 5);
        assert_eq!(provider.max_retries, 1);
    }

    #[test]
    fn offline_uses_the_local_embedder() {
        let cli = parse(&["--offline"]);
        let embedder = cli
            .embedder(&cli.provider_config("sk-test".to_string()))
            .unwrap();
        assert_eq!(embedder.dimensions(), DEFAULT_EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn online_embedder_uses_the_configured_dimensions() {
        let cli = parse(&["--embedding-dimensions", "8"]);
        let embedder = cli
            .embedder(&cli.provider_config("sk-test".to_string()))
            .unwrap();
        assert_eq!(embedder.dimensions(), 8);
    }

    #[test]
    fn unknown_chat_models_are_rejected() {
        let result = Cli::try_parse_from(["doc-assistant", "--model", "gpt-2"]);
        assert!(result.is_err());
    }
}
