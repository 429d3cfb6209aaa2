//! OpenAI-compatible Chat Completions and Images provider

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::{GeneratedImage, ImageProvider, ImageRequest, LlmProvider};
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{Message, Model, Usage},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for any endpoint speaking the OpenAI chat-completions dialect
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAIProvider {
    /// Create a provider against the default OpenAI base URL
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a provider against a custom base URL (trailing slash tolerated)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create from the `OPENAI_API_KEY` / `OPENAI_API_BASE` environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        let base_url =
            std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::with_base_url(api_key, base_url))
    }

    /// Per-request timeout for non-streaming calls
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn build_request(model: &Model, messages: &[Message], stream: bool) -> ChatRequest {
        ChatRequest {
            model: model.id.clone(),
            messages: messages.iter().map(Message::to_wire).collect(),
            stream,
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        Err(Error::from_status(status, body, retry_after))
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn complete(&self, model: &Model, messages: &[Message]) -> Result<String> {
        let request = Self::build_request(model, messages, false);
        tracing::debug!(model = %model.id, messages = messages.len(), "chat completion request");

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body: ChatResponse = response.json().await?;

        if let Some(usage) = body.usage {
            tracing::debug!(
                input = usage.prompt_tokens,
                output = usage.completion_tokens,
                "chat completion usage"
            );
        }

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        let request = Self::build_request(model, messages, true);
        let request_builder = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

#[async_trait]
impl ImageProvider for OpenAIProvider {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage> {
        let body = ImageApiRequest {
            model: &request.model,
            prompt: &request.prompt,
            size: &request.size,
            quality: &request.quality,
            style: &request.style,
            n: 1,
            response_format: "b64_json",
        };

        let response = self
            .client
            .post(self.endpoint("images/generations"))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: ImageApiResponse = response.json().await?;

        parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("image response contained no data".into()))
    }
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: StreamChunk = match serde_json::from_str(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            tracing::debug!("skipping undecodable stream chunk: {}", e);
                            continue;
                        }
                    };

                    for choice in &chunk.choices {
                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty() {
                                accumulated_text.push_str(content);
                                yield MessageEvent::TextDelta { delta: content.clone() };
                            }
                        }
                        if let Some(ref reason) = choice.finish_reason {
                            finish_reason = Some(reason.clone());
                        }
                    }

                    if let Some(ref stream_usage) = chunk.usage {
                        usage.input = stream_usage.prompt_tokens;
                        usage.output = stream_usage.completion_tokens;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield MessageEvent::Done {
            text: accumulated_text,
            finish_reason,
            usage,
        };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ImageApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    style: &'a str,
    n: u32,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageApiResponse {
    data: Vec<GeneratedImage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let p = OpenAIProvider::with_base_url("k", "http://localhost:8080/v1/");
        assert_eq!(p.endpoint("chat/completions"), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn test_request_has_no_tools_field() {
        let model = Model::new("gpt-4o").with_temperature(0.2);
        let req = OpenAIProvider::build_request(&model, &[Message::system("s"), Message::user("u")], false);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert!(json.get("tools").is_none());
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_chat_response_missing_content() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"role":"assistant"}}]}"#).unwrap();
        assert!(body.choices[0].message.content.is_none());
    }

    #[test]
    fn test_stream_chunk_decodes_delta() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_image_request_asks_for_base64() {
        let req = ImageApiRequest {
            model: "dall-e-3",
            prompt: "a cat",
            size: "1024x1024",
            quality: "standard",
            style: "vivid",
            n: 1,
            response_format: "b64_json",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"], "b64_json");
        assert_eq!(json["n"], 1);
    }
}
