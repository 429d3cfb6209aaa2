//! Error types for slidesmith-agent

use thiserror::Error;

/// Result type alias using slidesmith-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end an agent invocation.
///
/// Tool failures never show up here; they are fed back to the model as
/// results. Only the model transport and cancellation abort a chat.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the model client
    #[error(transparent)]
    Ai(#[from] slidesmith_ai::Error),

    /// The invocation was aborted through its handle
    #[error("Agent run cancelled")]
    Cancelled,

    /// The agent is already running a chat
    #[error("Agent is already running")]
    Busy,
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            _ => false,
        }
    }
}
