use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::types::{ChatMessage, Role, Usage};
use crate::config::ApiConfig;
use crate::error::{PalError, Result};

/// Events buffered between the network task and the consumer.
const STREAM_CAPACITY: usize = 32;

/// What the network-reading task reports to the consuming turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Fragment(String),
    Done(Option<Usage>),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
        }
    }
}

impl From<&ApiConfig> for SamplingParams {
    fn from(config: &ApiConfig) -> Self {
        SamplingParams {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        WireMessage {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Body of a streaming `/v1/chat/completions` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl GenerationRequest {
    pub fn new(model: &str, messages: Vec<WireMessage>, sampling: &SamplingParams) -> Self {
        GenerationRequest {
            model: model.to_string(),
            messages,
            stream: true,
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
        }
    }
}

/// Receiving half of a generation stream. Dropping it aborts the producer.
pub struct TokenStream {
    rx: mpsc::Receiver<StreamEvent>,
    task: JoinHandle<()>,
}

impl TokenStream {
    /// Runs `producer` on its own task, handing it the sending half of a
    /// bounded channel.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<StreamEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let task = tokio::spawn(producer(tx));
        TokenStream { rx, task }
    }

    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Anything that can stream a chat completion.
pub trait GenerationEndpoint: Send + Sync {
    fn start(&self, request: GenerationRequest) -> TokenStream;
}

/// Client for an OpenAI-compatible inference server.
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
}

impl GenerationClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        GenerationClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probes `GET /health`; returns the server-reported status.
    pub async fn health(&self) -> Result<String> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| PalError::GenerationFailed(format!("{} unreachable: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PalError::GenerationFailed(format!("{} returned {}", url, status)));
        }

        #[derive(Deserialize)]
        struct Health {
            status: Option<String>,
        }
        let body = response.text().await.unwrap_or_default();
        let reported = serde_json::from_str::<Health>(&body)
            .ok()
            .and_then(|h| h.status)
            .unwrap_or_else(|| "ok".to_string());
        Ok(reported)
    }
}

impl GenerationEndpoint for GenerationClient {
    fn start(&self, request: GenerationRequest) -> TokenStream {
        let client = self.client.clone();
        let url = format!("{}/v1/chat/completions", self.base_url);

        TokenStream::spawn(move |tx| async move {
            debug!("POST {} with {} messages", url, request.messages.len());
            let response = match client.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    error!("Generation request failed: {}", e);
                    let _ = tx.send(StreamEvent::Failed(format!("request failed: {}", e))).await;
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!("Generation endpoint returned {}: {}", status, body.trim());
                let _ = tx
                    .send(StreamEvent::Failed(format!("server returned {}: {}", status, body.trim())))
                    .await;
                return;
            }

            let events = sse_events(response.bytes_stream());
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                let terminal = !matches!(event, StreamEvent::Fragment(_));
                if tx.send(event).await.is_err() {
                    info!("Generation consumer went away, stopping stream");
                    return;
                }
                if terminal {
                    return;
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// What a single SSE line contributes.
#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Delta { content: Option<String>, usage: Option<Usage> },
    Done,
    Error(String),
}

fn parse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return SseLine::Skip;
    }
    if payload == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<CompletionChunk>(payload) {
        Ok(chunk) => {
            if let Some(err) = chunk.error {
                return SseLine::Error(err.to_string());
            }
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty());
            SseLine::Delta {
                content,
                usage: chunk.usage,
            }
        }
        Err(e) => {
            debug!("Ignoring unparseable SSE payload '{}': {}", payload, e);
            SseLine::Skip
        }
    }
}

/// Turns a raw SSE body into stream events. Lines may be split across
/// chunks; the stream always ends with `Done` or `Failed`.
pub fn sse_events<S, B, E>(body: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::stream! {
        futures::pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();
        let mut usage: Option<Usage> = None;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield StreamEvent::Failed(format!("stream interrupted: {}", e));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                match parse_line(&line) {
                    SseLine::Skip => {}
                    SseLine::Delta { content, usage: reported } => {
                        if reported.is_some() {
                            usage = reported;
                        }
                        if let Some(content) = content {
                            yield StreamEvent::Fragment(content);
                        }
                    }
                    SseLine::Done => {
                        yield StreamEvent::Done(usage);
                        return;
                    }
                    SseLine::Error(message) => {
                        yield StreamEvent::Failed(format!("endpoint reported an error: {}", message));
                        return;
                    }
                }
            }
        }

        if !buffer.is_empty() && parse_line(&String::from_utf8_lossy(&buffer)) == SseLine::Done {
            yield StreamEvent::Done(usage);
            return;
        }
        yield StreamEvent::Failed("stream ended without a completion marker".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(chunks: Vec<&'static str>) -> Vec<StreamEvent> {
        let body = stream::iter(chunks.into_iter().map(|c| Ok::<_, String>(c.as_bytes())));
        sse_events(body).collect().await
    }

    #[tokio::test]
    async fn fragments_survive_chunk_boundaries() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Fragment("Hel".to_string()),
                StreamEvent::Fragment("lo".to_string()),
                StreamEvent::Done(None),
            ]
        );
    }

    #[tokio::test]
    async fn usage_is_reported_with_done() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n",
            ": keep-alive\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3,\"total_tokens\":10}}\n",
            "data: [DONE]",
        ])
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::Done(Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10
            }))]
        );
    }

    #[tokio::test]
    async fn missing_marker_is_a_failure() {
        let events = collect(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Failed(_)));
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream() {
        let body = stream::iter(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".as_bytes()),
            Err("connection reset".to_string()),
        ]);
        let events: Vec<_> = sse_events(body).collect().await;
        assert_eq!(events[0], StreamEvent::Fragment("a".to_string()));
        assert!(matches!(&events[1], StreamEvent::Failed(r) if r.contains("connection reset")));
    }

    #[test]
    fn error_payloads_are_surfaced() {
        let line = parse_line("data: {\"error\":{\"message\":\"context too long\"}}");
        assert!(matches!(line, SseLine::Error(m) if m.contains("context too long")));
    }

    #[test]
    fn requests_serialize_as_openai_chat_completions() {
        let request = GenerationRequest::new(
            "phi",
            vec![WireMessage { role: Role::User, content: "hi".to_string() }],
            &SamplingParams::default(),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 2048);
    }
}
