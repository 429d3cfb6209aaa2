//! Conversation history owned by a single agent

use serde::{Deserialize, Serialize};
use slidesmith_ai::{Message, Role};

/// Approximate characters per token used when no better estimate exists
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Ordered message history.
///
/// Index 0 is always the one system message. Everything after it is kept in
/// insertion order and never reordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    messages: Vec<Message>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    system_prompt: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Append a message. A system message replaces the prompt in place.
    pub fn add(&mut self, message: Message) {
        if message.role == Role::System {
            self.messages[0] = message;
        } else {
            self.messages.push(message);
        }
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.add(Message::user(content));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.add(Message::assistant(content));
    }

    pub fn add_tool(
        &mut self,
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
    ) {
        self.add(Message::tool(content, tool_call_id, name));
    }

    /// All messages, system prompt first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn system_prompt(&self) -> &str {
        &self.messages[0].content
    }

    pub fn update_system_prompt(&mut self, prompt: impl Into<String>) {
        self.messages[0] = Message::system(prompt);
    }

    /// Last `n` non-system messages
    pub fn last_n(&self, n: usize) -> &[Message] {
        let rest = &self.messages[1..];
        &rest[rest.len().saturating_sub(n)..]
    }

    pub fn by_role(&self, role: Role) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.role == role).collect()
    }

    /// Drop history, optionally keeping the system prompt.
    ///
    /// Without `keep_system` the prompt is reset to empty rather than removed,
    /// so index 0 stays a system message.
    pub fn clear(&mut self, keep_system: bool) {
        self.messages.truncate(1);
        if !keep_system {
            self.messages[0] = Message::system("");
        }
    }

    /// Number of non-system messages
    pub fn len(&self) -> usize {
        self.messages.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// chars / `chars_per_token` over every message, system included
    pub fn estimated_tokens(&self, chars_per_token: usize) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        chars / chars_per_token.max(1)
    }

    /// Keep the system prompt and the newest messages that fit `max_tokens`.
    ///
    /// Walks back from the newest message and stops at the first one that
    /// does not fit, so the kept history is always a contiguous suffix.
    pub fn truncate_to_tokens(&mut self, max_tokens: usize, chars_per_token: usize) {
        let budget = max_tokens.saturating_mul(chars_per_token.max(1));
        let mut remaining = budget.saturating_sub(self.messages[0].content.chars().count());

        let mut first_kept = self.messages.len();
        for (idx, msg) in self.messages.iter().enumerate().skip(1).rev() {
            let size = msg.content.chars().count();
            if size > remaining {
                break;
            }
            remaining -= size;
            first_kept = idx;
        }

        let dropped = first_kept - 1;
        if dropped > 0 {
            tracing::debug!(dropped, kept = self.messages.len() - first_kept, "truncated conversation");
            self.messages.drain(1..first_kept);
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let snapshot = Snapshot {
            system_prompt: self.system_prompt().to_string(),
            messages: self.messages[1..].to_vec(),
        };
        serde_json::to_string_pretty(&snapshot)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        let mut conversation = Self::new(snapshot.system_prompt);
        for message in snapshot.messages {
            conversation.add(message);
        }
        Ok(conversation)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new("")
    }
}
