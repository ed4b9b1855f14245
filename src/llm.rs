//! Streaming text generation
//!
//! [`TextGenerator`] is the seam between the pipeline and the language model.
//! [`ChatCompletionsGenerator`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint with server-sent events.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::prompt::{ChatMessage, Prompt};
use crate::{Error, Result};

/// Incremental reply text; single subscriber, ends when the reply is complete
pub type TextStream = BoxStream<'static, Result<String>>;

/// Produces a reply to a prompt as a stream of text fragments
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start generating a reply
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn generate_stream(&self, prompt: &Prompt) -> Result<TextStream>;
}

/// Drain a stream into one string
///
/// # Errors
///
/// Returns the first error the stream yields
pub async fn collect_text(mut stream: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

/// One parsed server-sent event line
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    /// A text delta
    Delta(String),
    /// The terminal `[DONE]` marker
    Done,
    /// Anything else (comments, role-only deltas, keep-alives)
    Skip,
}

/// Parse one line of an OpenAI-style SSE body
#[must_use]
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseLine::Skip;
    };

    let text: String = event
        .get("choices")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
        .filter_map(|choice| choice.pointer("/delta/content").and_then(|v| v.as_str()))
        .collect();

    if text.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Delta(text)
    }
}

/// OpenAI-compatible chat completions client
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ChatCompletionsGenerator {
    /// Create a generator
    ///
    /// `timeout` bounds connecting and the wait for response headers.
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the client cannot be built
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key required for LLM".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens,
            timeout,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    async fn generate_stream(&self, prompt: &Prompt) -> Result<TextStream> {
        let system = ChatMessage::system(&prompt.system);
        let messages = std::iter::once(&system)
            .filter(|m| !m.content.is_empty())
            .chain(&prompt.messages)
            .collect();

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat completions error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_sse(response, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Forward text deltas from an SSE body until `[DONE]`, an error, or the
/// receiver is dropped
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut body = response.bytes_stream();
    let mut line_buf: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "reply stream interrupted");
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        line_buf.extend_from_slice(&chunk);
        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);

            match parse_sse_line(line.trim_end_matches('\n')) {
                SseLine::Delta(text) => {
                    if tx.send(Ok(text)).await.is_err() {
                        tracing::debug!("reply stream dropped by consumer");
                        return;
                    }
                }
                SseLine::Done => return,
                SseLine::Skip => {}
            }
        }
    }

    if let SseLine::Delta(text) = parse_sse_line(&String::from_utf8_lossy(&line_buf)) {
        let _ = tx.send(Ok(text)).await;
    }
}
