//! LLM provider implementations

pub mod openai;

use crate::{
    Message, MessageEventStream, Model, Result,
    stream::MessageEvent,
    types::Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait for chat-completion providers.
///
/// Only `complete` is required; the default `stream` delivers the whole reply
/// as a single delta, which is enough for scripted providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request a full reply for the given messages
    async fn complete(&self, model: &Model, messages: &[Message]) -> Result<String>;

    /// Stream a reply as incremental text events
    async fn stream(&self, model: &Model, messages: &[Message]) -> Result<MessageEventStream> {
        let text = self.complete(model, messages).await?;
        let events = vec![
            MessageEvent::TextDelta {
                delta: text.clone(),
            },
            MessageEvent::Done {
                text,
                finish_reason: Some("stop".into()),
                usage: Usage::default(),
            },
        ];
        Ok(Box::pin(tokio_stream::iter(events)))
    }
}

/// Parameters for an image generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub style: String,
}

/// A generated image, base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub b64_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Trait for image generation backends
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate_image(&self, request: &ImageRequest) -> Result<GeneratedImage>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| crate::Error::InvalidApiKey)
}
