//! LLM driver trait and Chat Completions implementation.
//!
//! The [`LlmDriver`] trait is the seam between the answer chain and the
//! model API: a streaming call for answer generation and a non-streaming
//! call for the question-condensing step. [`ChatCompletionsDriver`] talks
//! to the OpenAI Chat Completions API (`/v1/chat/completions`).

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// API key for authentication.
    pub api_key: String,
    /// Model identifier (e.g., `gpt-3.5-turbo-16k`).
    pub model: String,
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Streaming events emitted by an LLM driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// Incremental text delta from the assistant's response.
    Delta {
        /// The text fragment to append.
        text: String,
    },
    /// The stream finished.
    Done,
}

/// Boxed stream of LLM events.
pub type LlmStream = std::pin::Pin<Box<dyn Stream<Item = anyhow::Result<LlmEvent>> + Send>>;

/// Trait for LLM drivers.
///
/// # Errors
///
/// Both methods return an error if the request fails or the connection is
/// interrupted.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a chat response token by token.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<LlmStream>;

    /// Run a non-streaming chat completion and return the full text.
    async fn complete(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String>;
}

/// Driver for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "temperature": 0,
            "stream": stream,
            "messages": messages,
        })
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> anyhow::Result<LlmStream> {
        let body = self.request_body(&messages, true);
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        if !line.starts_with("data:") {
                            continue;
                        }
                        let data = line.trim_start_matches("data:").trim();

                        if data == "[DONE]" {
                            yield LlmEvent::Done;
                            continue;
                        }

                        let v: serde_json::Value = serde_json::from_str(data)?;
                        let delta = &v["choices"][0]["delta"];
                        if let Some(s) = delta.get("content").and_then(|x| x.as_str())
                            && !s.is_empty()
                        {
                            yield LlmEvent::Delta { text: s.to_string() };
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }

    async fn complete(&self, messages: Vec<ChatMessage>) -> anyhow::Result<String> {
        let body = self.request_body(&messages, false);
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let v: serde_json::Value = resp.json().await?;
        v["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("completion response missing message content"))
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
