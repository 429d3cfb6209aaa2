//! slidesmith-ai: model endpoint client
//!
//! Plain-text chat completions (blocking and streamed) and image generation
//! against OpenAI-compatible endpoints. Tool use is not negotiated with the
//! endpoint; it is carried in message text by the agent layer.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::{GeneratedImage, ImageProvider, ImageRequest, LlmProvider};
pub use stream::{MessageEvent, MessageEventStream};
pub use types::*;
