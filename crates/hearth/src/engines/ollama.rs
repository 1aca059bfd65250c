use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::base::{DeltaStream, EngineHandle, InferenceEngine, InitProgress, ProgressSender};
use super::utils::{
    messages_to_openai_spec, parse_stream_payload, tools_to_openai_spec, LineBuffer,
    SseDataParser,
};
use crate::errors::{EngineError, EngineResult};
use crate::models::delta::DeltaFragment;
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OLLAMA_HOST: &str = "http://localhost:11434";

const STREAM_BUFFER_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct OllamaEngineConfig {
    pub host: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    /// Download the model before loading it
    pub pull: bool,
    /// How long the server keeps the model in memory, e.g. "5m"
    pub keep_alive: Option<String>,
}

impl Default for OllamaEngineConfig {
    fn default() -> Self {
        Self {
            host: OLLAMA_HOST.to_string(),
            temperature: None,
            max_tokens: None,
            pull: true,
            keep_alive: None,
        }
    }
}

impl OllamaEngineConfig {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host.trim_end_matches('/'), path)
    }
}

/// Runs models on a local Ollama server
pub struct OllamaEngine {
    client: Client,
    config: Arc<OllamaEngineConfig>,
}

impl OllamaEngine {
    pub fn new(config: OllamaEngineConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Models already present on the server
    pub async fn list_models(&self) -> EngineResult<Vec<String>> {
        #[derive(Deserialize)]
        struct Tags {
            #[serde(default)]
            models: Vec<TagModel>,
        }
        #[derive(Deserialize)]
        struct TagModel {
            name: String,
        }

        let response = self.client.get(self.config.url("api/tags")).send().await?;
        let tags: Tags = check_status(response)
            .await?
            .json()
            .await
            .map_err(|error| EngineError::ResponseParse(error.to_string()))?;
        Ok(tags.models.into_iter().map(|model| model.name).collect())
    }

    async fn pull(&self, model: &str, progress: &ProgressSender) -> EngineResult<()> {
        let mut response = check_status(
            self.client
                .post(self.config.url("api/pull"))
                .json(&json!({"model": model, "stream": true}))
                .send()
                .await?,
        )
        .await?;

        let mut lines = LineBuffer::default();
        let mut reporter = PullReporter::default();
        while let Some(chunk) = response.chunk().await? {
            for line in lines.push_chunk(&chunk) {
                reporter.report(&line, progress)?;
            }
        }
        if let Some(line) = lines.finish() {
            reporter.report(&line, progress)?;
        }
        Ok(())
    }

    async fn load(&self, model: &str) -> EngineResult<()> {
        let mut payload = json!({"model": model, "stream": false});
        if let Some(keep_alive) = &self.config.keep_alive {
            payload["keep_alive"] = json!(keep_alive);
        }
        let response = self
            .client
            .post(self.config.url("api/generate"))
            .json(&payload)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn prepare(&self, model: &str, progress: &ProgressSender) -> EngineResult<()> {
        if self.config.pull {
            self.pull(model, progress).await?;
        }
        let _ = progress.send(InitProgress::new(0.95, "Loading model into memory..."));
        self.load(model).await
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn initialize(
        &self,
        model: &str,
        progress: ProgressSender,
    ) -> EngineResult<Arc<dyn EngineHandle>> {
        tracing::info!(model, host = %self.config.host, "initializing ollama model");
        self.prepare(model, &progress)
            .await
            .map_err(|error| EngineError::Initialization {
                model: model.to_string(),
                message: error.to_string(),
            })?;

        Ok(Arc::new(OllamaHandle {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            model: model.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Turns pull status lines into progress. Each layer restarts its own byte count, so the
/// reported fraction only moves forward.
#[derive(Default)]
struct PullReporter {
    reached: f32,
}

impl PullReporter {
    fn report(&mut self, line: &str, progress: &ProgressSender) -> EngineResult<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let status: PullStatus = serde_json::from_str(line)
            .map_err(|error| EngineError::ResponseParse(format!("bad pull status: {}", error)))?;
        if let Some(error) = status.error {
            return Err(EngineError::ResponseParse(error));
        }

        let mut text = status.status.unwrap_or_default();
        if let (Some(completed), Some(total)) = (status.completed, status.total) {
            if total > 0 {
                let fraction = completed as f32 / total as f32;
                self.reached = self.reached.max(fraction * 0.9);
                text = format!("{} ({:.0}%)", text, fraction * 100.0);
            }
        }
        // The receiver only goes away once initialization is no longer being watched
        let _ = progress.send(InitProgress::new(self.reached, text));
        Ok(())
    }
}

async fn check_status(response: Response) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(EngineError::HttpStatus {
        status: status.as_u16(),
        message,
    })
}

/// A model loaded on the Ollama server
struct OllamaHandle {
    client: Client,
    config: Arc<OllamaEngineConfig>,
    model: String,
}

impl OllamaHandle {
    fn payload(&self, messages: &[Message], tools: &[Tool]) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages_to_openai_spec(messages),
            "stream": true,
        });

        let tools_spec = tools_to_openai_spec(tools);
        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if let Some(temperature) = self.config.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }
        payload
    }
}

#[async_trait]
impl EngineHandle for OllamaHandle {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[Tool],
    ) -> EngineResult<DeltaStream> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "sending streaming chat completion request"
        );
        let response = self
            .client
            .post(self.config.url("v1/chat/completions"))
            .json(&self.payload(messages, tools))
            .send()
            .await?;
        let response = check_status(response).await?;

        let (sender, receiver) = mpsc::channel(STREAM_BUFFER_SIZE);
        tokio::spawn(read_stream(response, sender));
        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    async fn unload(&self) -> EngineResult<()> {
        tracing::info!(model = %self.model, "unloading ollama model");
        let response = self
            .client
            .post(self.config.url("api/generate"))
            .json(&json!({"model": self.model, "keep_alive": 0}))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

type FragmentSender = mpsc::Sender<EngineResult<DeltaFragment>>;

enum Forwarded {
    More,
    Done,
    Stopped,
}

async fn read_stream(mut response: Response, sender: FragmentSender) {
    let mut parser = SseDataParser::default();
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(error) => {
                let _ = sender
                    .send(Err(EngineError::ConnectionLost(error.to_string())))
                    .await;
                return;
            }
        };
        match forward(parser.push_chunk(&chunk), &sender).await {
            Forwarded::More => {}
            Forwarded::Done | Forwarded::Stopped => return,
        }
    }

    if let Forwarded::More = forward(parser.finish(), &sender).await {
        let _ = sender
            .send(Err(EngineError::ConnectionLost(
                "stream ended before [DONE]".to_string(),
            )))
            .await;
    }
}

async fn forward(payloads: Vec<String>, sender: &FragmentSender) -> Forwarded {
    for payload in payloads {
        match parse_stream_payload(&payload) {
            Ok(Some(fragment)) if fragment.is_empty() => {}
            Ok(Some(fragment)) => {
                if sender.send(Ok(fragment)).await.is_err() {
                    // Consumer dropped the stream
                    return Forwarded::Stopped;
                }
            }
            Ok(None) => return Forwarded::Done,
            Err(error) => {
                let _ = sender.send(Err(error)).await;
                return Forwarded::Stopped;
            }
        }
    }
    Forwarded::More
}
