use crate::embeddings::Embedder;
use crate::error::{AgentError, ConfigError, EmbeddingError};
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const ADA_002_DIMENSIONS: usize = 1_536;
pub const CHAT_MODELS: [&str; 3] = ["gpt-3.5-turbo", "gpt-4-turbo-preview", "gpt-4"];

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub temperature: f32,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: CHAT_MODELS[0].to_string(),
            temperature: 0.2,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: ADA_002_DIMENSIONS,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::InvalidArgument(
                "an OpenAI API key is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidArgument(format!(
                "temperature {} is outside 0.0..=1.0",
                self.temperature
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::InvalidArgument(
                "embedding dimensions must be positive".to_string(),
            ));
        }
        Url::parse(&self.base_url)?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn client(&self) -> Result<Client, ConfigError> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?)
    }
}

enum Attempt<T> {
    Done(T),
    Retry(String),
    Fail { status: u16, details: String },
}

async fn post_with_retry<B, R>(
    client: &Client,
    config: &OpenAiConfig,
    url: &str,
    body: &B,
) -> Result<Attempt<R>, reqwest::Error>
where
    B: Serialize + Sync,
    R: DeserializeOwned,
{
    let mut last_error = String::from("no attempt made");

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(url, attempt, reason = %last_error, "retrying request");
            tokio::time::sleep(delay).await;
        }

        let response = client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                last_error = error.to_string();
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(Attempt::Done(response.json::<R>().await?));
        }

        let details = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            last_error = format!("{status}: {details}");
            continue;
        }

        return Ok(Attempt::Fail {
            status: status.as_u16(),
            details,
        });
    }

    Ok(Attempt::Retry(last_error))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = config.client()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.embedding_dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
        };
        let url = self.config.endpoint("embeddings");

        match post_with_retry::<_, EmbeddingResponse>(&self.client, &self.config, &url, &request)
            .await?
        {
            Attempt::Done(response) => response
                .data
                .into_iter()
                .next()
                .map(|item| item.embedding)
                .ok_or_else(|| EmbeddingError::InvalidResponse("missing data array".to_string())),
            Attempt::Retry(reason) => Err(EmbeddingError::Request(format!(
                "gave up after {} retries: {reason}",
                self.config.max_retries
            ))),
            Attempt::Fail { status, details } => Err(EmbeddingError::Service { status, details }),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatRequestMessage<'a>>,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [&'a str],
}

fn no_stop_sequences(stop: &&[&str]) -> bool {
    stop.is_empty()
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChatModel {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiChatModel {
    pub fn new(config: OpenAiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = config.client()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, prompt: &str, stop: &[&str]) -> Result<String, AgentError> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            temperature: self.config.temperature,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: prompt,
            }],
            stop,
        };
        let url = self.config.endpoint("chat/completions");

        match post_with_retry::<_, ChatResponse>(&self.client, &self.config, &url, &request).await?
        {
            Attempt::Done(response) => response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content.unwrap_or_default())
                .ok_or_else(|| AgentError::InvalidResponse("no choices returned".to_string())),
            Attempt::Retry(reason) => Err(AgentError::Request(format!(
                "gave up after {} retries: {reason}",
                self.config.max_retries
            ))),
            Attempt::Fail { status, details } => Err(AgentError::Service { status, details }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_missing_key_and_bad_temperature() {
        assert!(OpenAiConfig::new("  ").validate().is_err());

        let mut config = OpenAiConfig::new("sk-test");
        config.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_unparseable_base_url() {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = "not a url".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Url(_))));
    }

    #[test]
    fn endpoints_join_without_double_slash() {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_url = "http://localhost:8080/v1/".to_string();
        assert_eq!(
            config.endpoint("embeddings"),
            "http://localhost:8080/v1/embeddings"
        );
    }

    #[test]
    fn chat_request_omits_empty_stop_list() {
        let request = ChatRequest {
            model: "gpt-4",
            temperature: 0.2,
            messages: vec![ChatRequestMessage {
                role: "user",
                content: "hi",
            }],
            stop: &[],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["messages"][0]["content"], "hi");
    }
}
