//! Streaming event types and utilities

use crate::types::Usage;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Text content delta
    TextDelta { delta: String },
    /// Completion finished; `text` is the full accumulated reply
    Done {
        text: String,
        finish_reason: Option<String>,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

impl MessageEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. } | MessageEvent::Error { .. })
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Drain a stream into the final reply text.
///
/// Deltas are concatenated until a `Done` arrives; an `Error` event becomes
/// an `Err`. A stream that ends without a terminal event yields what was
/// accumulated so far.
pub async fn collect_text(mut stream: MessageEventStream) -> crate::Result<String> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            MessageEvent::TextDelta { delta } => text.push_str(&delta),
            MessageEvent::Done { text: full, .. } => return Ok(full),
            MessageEvent::Error { message } => return Err(crate::Error::Sse(message)),
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(events: Vec<MessageEvent>) -> MessageEventStream {
        Box::pin(tokio_stream::iter(events))
    }

    #[tokio::test]
    async fn test_collect_text_prefers_done_text() {
        let s = stream_of(vec![
            MessageEvent::TextDelta { delta: "Hel".into() },
            MessageEvent::TextDelta { delta: "lo".into() },
            MessageEvent::Done {
                text: "Hello".into(),
                finish_reason: Some("stop".into()),
                usage: Usage::default(),
            },
        ]);
        assert_eq!(collect_text(s).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_collect_text_without_done() {
        let s = stream_of(vec![
            MessageEvent::TextDelta { delta: "a".into() },
            MessageEvent::TextDelta { delta: "b".into() },
        ]);
        assert_eq!(collect_text(s).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_collect_text_error_event() {
        let s = stream_of(vec![MessageEvent::Error {
            message: "boom".into(),
        }]);
        assert!(collect_text(s).await.is_err());
    }

    #[test]
    fn test_is_terminal() {
        assert!(!MessageEvent::TextDelta { delta: "x".into() }.is_terminal());
        assert!(MessageEvent::Error { message: "x".into() }.is_terminal());
    }
}
