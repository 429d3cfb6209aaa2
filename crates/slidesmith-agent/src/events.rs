//! Agent event types

use serde::{Deserialize, Serialize};

use crate::protocol::ToolCall;
use crate::tool::ToolResult;

/// Events emitted during an agent invocation.
///
/// Purely observational: nothing in the loop waits on a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Agent started processing a user message
    AgentStart,

    /// A new round started
    RoundStart { round: u32 },

    /// Streamed reply text
    TextDelta { delta: String },

    /// The model's full reply for the round
    MessageEnd { content: String },

    /// Call markers were present but no block could be parsed
    ParseFailed { errors: Vec<String> },

    /// Tool execution started
    ToolCallStart { call: ToolCall },

    /// Tool execution completed
    ToolCallEnd { call: ToolCall, result: ToolResult },

    /// A completion signal was accepted
    TaskCompleted { result: String },

    /// Round budget exhausted without completion
    MaxRoundsReached { rounds: u32 },

    /// Agent finished processing
    AgentEnd { rounds: u32 },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::AgentEnd { .. })
    }
}
