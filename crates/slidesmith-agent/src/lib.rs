//! slidesmith-agent: text-protocol agent runtime
//!
//! The model asks for tools by writing JSON between `<<<TOOL_CALL>>>` and
//! `<<<END_TOOL_CALL>>>` markers. This crate parses those blocks, runs the
//! requested tools with validation and bounded retry, and drives the
//! call-parse-execute-feedback loop until the model signals completion.

pub mod agent;
pub mod conversation;
pub mod error;
pub mod events;
pub mod executor;
pub mod handle;
pub mod protocol;
pub mod registry;
pub mod tool;

pub use agent::{Agent, AgentConfig, Language, MAX_ROUNDS_MESSAGE};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use executor::{ExecutionMode, ExecutorConfig, ToolExecutor};
pub use handle::AgentHandle;
pub use protocol::{ParseOutcome, TOOL_CALL_END, TOOL_CALL_START, ToolCall, ToolCallParser};
pub use registry::ToolRegistry;
pub use tool::{BoxedTool, Tool, ToolArguments, ToolError, ToolResult, ToolStatus};
