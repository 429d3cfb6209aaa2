//! Agent implementation with the text-protocol tool loop

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slidesmith_ai::{LlmProvider, MessageEvent, Model};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::conversation::{Conversation, DEFAULT_CHARS_PER_TOKEN};
use crate::error::{Error, Result};
use crate::events::AgentEvent;
use crate::executor::{ExecutorConfig, ToolExecutor};
use crate::handle::{AgentHandle, RunGuard};
use crate::protocol::{self, ToolCall, TOOL_CALL_END, TOOL_CALL_START};
use crate::registry::ToolRegistry;
use crate::tool::ToolResult;

/// Returned when the round budget runs out without a completion signal
pub const MAX_ROUNDS_MESSAGE: &str = "Maximum tool execution rounds reached.";

/// Tool names whose successful result ends the invocation, with the argument
/// carrying the final text
const COMPLETION_SIGNALS: [(&str, &str); 2] = [
    ("task_completed", "result"),
    ("phase_complete", "summary"),
];

/// Language of the feedback the loop writes into the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    #[serde(alias = "chinese", alias = "zh-cn")]
    Zh,
    #[serde(alias = "english")]
    En,
}

impl Language {
    fn malformed_feedback(&self, errors: &[String]) -> String {
        let joined = errors.join("; ");
        match self {
            Language::Zh => format!(
                "工具调用格式错误，无法解析。错误信息：{joined}\n\n\
                 请使用正确的JSON格式重试。确保：\n\
                 1. JSON语法正确（使用双引号，无尾随逗号）\n\
                 2. 字符串中的特殊字符正确转义\n\
                 3. 工具调用格式为：{TOOL_CALL_START}\n   \
                 {{\"tool\": \"tool_name\", \"parameters\": {{...}}}}\n   \
                 {TOOL_CALL_END}"
            ),
            Language::En => format!(
                "The tool call could not be parsed. Errors: {joined}\n\n\
                 Retry with valid JSON. Make sure that:\n\
                 1. The JSON syntax is valid (double quotes, no trailing commas)\n\
                 2. Special characters inside strings are escaped\n\
                 3. The call looks like: {TOOL_CALL_START}\n   \
                 {{\"tool\": \"tool_name\", \"parameters\": {{...}}}}\n   \
                 {TOOL_CALL_END}"
            ),
        }
    }

    fn retrying_notice(&self) -> &'static str {
        match self {
            Language::Zh => "\n\n⚠️ 工具调用解析失败，正在重试...\n",
            Language::En => "\n\n⚠️ Tool call could not be parsed, retrying...\n",
        }
    }
}

/// Configuration for an agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Role prompt; the tool catalogue is appended to it
    pub system_prompt: String,
    pub model: Model,
    pub max_tool_rounds: u32,
    pub language: Language,
    /// Trim history to roughly this many tokens before each model call
    pub context_token_budget: Option<usize>,
    pub executor: ExecutorConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: Model::default(),
            max_tool_rounds: 10,
            language: Language::default(),
            context_token_budget: None,
            executor: ExecutorConfig::default(),
        }
    }
}

/// What one model reply amounted to
#[derive(Debug)]
enum RoundOutcome {
    /// Markers present but nothing parsed; feedback was queued
    Malformed,
    /// Plain reply, taken as the final answer
    Finished(String),
    /// Calls ran; results were fed back
    Executed(Vec<(ToolCall, ToolResult)>),
}

/// The agent: one conversation, one executor, one model client
pub struct Agent {
    config: AgentConfig,
    conversation: Conversation,
    executor: ToolExecutor,
    llm: Arc<dyn LlmProvider>,
    event_tx: broadcast::Sender<AgentEvent>,
    handle: AgentHandle,
    task_completed: bool,
    task_result: Option<String>,
}

impl Agent {
    pub fn new(config: AgentConfig, registry: Arc<ToolRegistry>, llm: Arc<dyn LlmProvider>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let conversation = Conversation::new(build_system_prompt(&config.system_prompt, &registry));
        let executor = ToolExecutor::with_config(registry, config.executor);

        Self {
            config,
            conversation,
            executor,
            llm,
            event_tx,
            handle: AgentHandle::new(),
            task_completed: false,
            task_result: None,
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Whether the last invocation ended on a completion signal
    pub fn task_completed(&self) -> bool {
        self.task_completed
    }

    pub fn task_result(&self) -> Option<&str> {
        self.task_result.as_deref()
    }

    /// Model used from the next round on
    pub fn set_model(&mut self, model: Model) {
        self.config.model = model;
    }

    /// Replace the role prompt, keeping the tool catalogue
    pub fn update_system_prompt(&mut self, prompt: impl Into<String>) {
        self.config.system_prompt = prompt.into();
        let full = build_system_prompt(&self.config.system_prompt, self.executor.registry());
        self.conversation.update_system_prompt(full);
    }

    pub fn clear_history(&mut self, keep_system: bool) {
        self.conversation.clear(keep_system);
        if !keep_system {
            let full = build_system_prompt(&self.config.system_prompt, self.executor.registry());
            self.conversation.update_system_prompt(full);
        }
    }

    pub fn history_json(&self) -> serde_json::Result<String> {
        self.conversation.to_json()
    }

    /// Run the loop with the configured round budget
    pub async fn chat(&mut self, message: &str) -> Result<String> {
        self.chat_with_rounds(message, self.config.max_tool_rounds).await
    }

    /// Run the loop until completion, a plain reply, or `max_rounds` rounds.
    ///
    /// Exhausting the budget is not an error: the result is
    /// [`MAX_ROUNDS_MESSAGE`] and `task_completed()` stays false.
    pub async fn chat_with_rounds(&mut self, message: &str, max_rounds: u32) -> Result<String> {
        let cancel = self.handle.begin().ok_or(Error::Busy)?;
        let _guard = RunGuard(self.handle.clone());
        self.start(message);

        for round in 1..=max_rounds {
            self.begin_round(round);

            let reply = self.complete(&cancel).await?;
            let _ = self.event_tx.send(AgentEvent::MessageEnd {
                content: reply.clone(),
            });

            match self.process_round(reply, &cancel).await? {
                RoundOutcome::Malformed => continue,
                RoundOutcome::Finished(text) => {
                    self.end(round);
                    return Ok(text);
                }
                RoundOutcome::Executed(_) => {
                    if self.task_completed {
                        self.end(round);
                        return Ok(self.task_result.clone().unwrap_or_default());
                    }
                }
            }
        }

        Ok(self.exhausted(max_rounds))
    }

    /// Same state machine as [`chat_with_rounds`](Self::chat_with_rounds), yielding
    /// reply tokens as they arrive plus short status lines for tool activity.
    pub fn chat_stream<'a>(
        &'a mut self,
        message: &'a str,
        max_rounds: u32,
    ) -> impl Stream<Item = Result<String>> + Send + 'a {
        async_stream::stream! {
            let cancel = match self.handle.begin() {
                Some(cancel) => cancel,
                None => {
                    yield Err(Error::Busy);
                    return;
                }
            };
            let _guard = RunGuard(self.handle.clone());
            self.start(message);

            for round in 1..=max_rounds {
                self.begin_round(round);

                let mut events = match self.open_stream(&cancel).await {
                    Ok(events) => events,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut reply = String::new();
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => None,
                        event = events.next() => Some(event),
                    };
                    let Some(event) = next else {
                        yield Err(Error::Cancelled);
                        return;
                    };
                    match event {
                        Some(MessageEvent::TextDelta { delta }) => {
                            reply.push_str(&delta);
                            let _ = self.event_tx.send(AgentEvent::TextDelta { delta: delta.clone() });
                            yield Ok(delta);
                        }
                        Some(MessageEvent::Done { text, .. }) => {
                            if !text.is_empty() {
                                reply = text;
                            }
                            break;
                        }
                        Some(MessageEvent::Error { message }) => {
                            yield Err(Error::Ai(slidesmith_ai::Error::Sse(message)));
                            return;
                        }
                        None => break,
                    }
                }
                let _ = self.event_tx.send(AgentEvent::MessageEnd { content: reply.clone() });

                match self.process_round(reply, &cancel).await {
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                    Ok(RoundOutcome::Malformed) => {
                        yield Ok(self.config.language.retrying_notice().to_string());
                    }
                    Ok(RoundOutcome::Finished(_)) => {
                        self.end(round);
                        return;
                    }
                    Ok(RoundOutcome::Executed(results)) => {
                        for (call, result) in &results {
                            yield Ok(status_line(call, result));
                        }
                        if self.task_completed {
                            let result = self.task_result.clone().unwrap_or_default();
                            yield Ok(format!("\n\n✅ {}\n", result));
                            self.end(round);
                            return;
                        }
                    }
                }
            }

            let sentinel = self.exhausted(max_rounds);
            yield Ok(format!("\n\n⚠️ {}\n", sentinel));
        }
    }

    fn start(&mut self, message: &str) {
        self.task_completed = false;
        self.task_result = None;
        self.conversation.add_user(message);
        let _ = self.event_tx.send(AgentEvent::AgentStart);
    }

    fn begin_round(&mut self, round: u32) {
        tracing::debug!(round, "agent round");
        let _ = self.event_tx.send(AgentEvent::RoundStart { round });
        if let Some(budget) = self.config.context_token_budget {
            self.conversation.truncate_to_tokens(budget, DEFAULT_CHARS_PER_TOKEN);
        }
    }

    fn end(&self, rounds: u32) {
        let _ = self.event_tx.send(AgentEvent::AgentEnd { rounds });
    }

    fn exhausted(&self, max_rounds: u32) -> String {
        tracing::warn!(max_rounds, "maximum tool execution rounds reached");
        let _ = self
            .event_tx
            .send(AgentEvent::MaxRoundsReached { rounds: max_rounds });
        self.end(max_rounds);
        MAX_ROUNDS_MESSAGE.to_string()
    }

    /// Blocking model call, dropped (and its connection closed) on cancel
    async fn complete(&self, cancel: &CancellationToken) -> Result<String> {
        let request = self
            .llm
            .complete(&self.config.model, self.conversation.messages());
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            reply = request => Ok(reply?),
        }
    }

    async fn open_stream(
        &self,
        cancel: &CancellationToken,
    ) -> Result<slidesmith_ai::MessageEventStream> {
        let request = self
            .llm
            .stream(&self.config.model, self.conversation.messages());
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            events = request => Ok(events?),
        }
    }

    /// Branch on one model reply: malformed, plain, or calls to run
    async fn process_round(&mut self, reply: String, cancel: &CancellationToken) -> Result<RoundOutcome> {
        let parsed = self.executor.parse_tool_calls(&reply);

        if parsed.is_malformed(&reply) {
            tracing::warn!("tool call markers found but parsing failed: {:?}", parsed.errors);
            let _ = self.event_tx.send(AgentEvent::ParseFailed {
                errors: parsed.errors.clone(),
            });
            self.conversation.add_assistant(reply);
            self.conversation
                .add_user(self.config.language.malformed_feedback(&parsed.errors));
            return Ok(RoundOutcome::Malformed);
        }

        if parsed.calls.is_empty() {
            self.conversation.add_assistant(reply.clone());
            self.complete_task(reply.clone());
            return Ok(RoundOutcome::Finished(reply));
        }

        if !parsed.errors.is_empty() {
            tracing::debug!("ignoring unparseable blocks next to valid calls: {:?}", parsed.errors);
        }

        self.conversation.add_assistant(reply);

        let mut results = Vec::with_capacity(parsed.calls.len());
        for call in parsed.calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            tracing::info!(tool = %call.name, id = %call.id, "tool call");
            let _ = self
                .event_tx
                .send(AgentEvent::ToolCallStart { call: call.clone() });

            let result = self.executor.execute_with_cancel(&call, cancel.clone()).await;

            let _ = self.event_tx.send(AgentEvent::ToolCallEnd {
                call: call.clone(),
                result: result.clone(),
            });

            if !self.task_completed && result.is_success() {
                if let Some(text) = completion_payload(&call) {
                    self.complete_task(text);
                }
            }
            results.push((call, result));
        }

        self.conversation
            .add_user(self.executor.format_results_for_llm(&results));

        Ok(RoundOutcome::Executed(results))
    }

    fn complete_task(&mut self, result: String) {
        self.task_completed = true;
        self.task_result = Some(result.clone());
        let _ = self.event_tx.send(AgentEvent::TaskCompleted { result });
    }
}

fn build_system_prompt(prompt: &str, registry: &ToolRegistry) -> String {
    let tools = protocol::render_tool_definitions(registry);
    match (prompt.is_empty(), tools.is_empty()) {
        (_, true) => prompt.to_string(),
        (true, false) => tools,
        (false, false) => format!("{}\n\n{}", prompt, tools),
    }
}

/// Final text carried by a completion signal, if this call is one
fn completion_payload(call: &ToolCall) -> Option<String> {
    let (_, key) = COMPLETION_SIGNALS
        .iter()
        .find(|(name, _)| *name == call.name)?;
    Some(match call.arguments.get(*key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn status_line(call: &ToolCall, result: &ToolResult) -> String {
    if result.is_success() {
        let text: String = result.to_string().chars().take(200).collect();
        format!("\n[🔧 {}] ✓ {}\n", call.name, text)
    } else {
        format!(
            "\n[🔧 {}] ✗ {}\n",
            call.name,
            result.error.as_deref().unwrap_or("Unknown error")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{BoxedTool, Tool, ToolArguments, ToolError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use slidesmith_ai::{Message, Role};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned replies; repeats the last one when the script runs out
    struct ScriptedProvider {
        replies: Mutex<VecDeque<String>>,
        last: Mutex<String>,
        calls: AtomicU32,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                last: Mutex::new(String::new()),
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _model: &Model, messages: &[Message]) -> slidesmith_ai::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(messages.to_vec());
            let next = self.replies.lock().pop_front();
            let reply = match next {
                Some(r) => {
                    *self.last.lock() = r.clone();
                    r
                }
                None => self.last.lock().clone(),
            };
            Ok(reply)
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn complete(&self, _model: &Model, _messages: &[Message]) -> slidesmith_ai::Result<String> {
            Err(slidesmith_ai::Error::api(500, "upstream exploded"))
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl LlmProvider for HangingProvider {
        async fn complete(&self, _model: &Model, _messages: &[Message]) -> slidesmith_ai::Result<String> {
            std::future::pending().await
        }
    }

    /// Records invocations and echoes its `path` argument
    struct NoopTool {
        name: &'static str,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "Does nothing"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"path": {"type": "string"}}})
        }
        async fn execute(
            &self,
            arguments: &ToolArguments,
            _cancel: CancellationToken,
        ) -> std::result::Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("");
            Ok(ToolResult::success(format!("contents of {}", path)))
        }
    }

    struct CompletionTool(&'static str, &'static str);

    #[async_trait]
    impl Tool for CompletionTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "Signal completion"
        }
        fn parameters_schema(&self) -> Value {
            let key = self.1;
            json!({
                "type": "object",
                "properties": { key: {"type": "string"} },
                "required": [key]
            })
        }
        async fn execute(
            &self,
            arguments: &ToolArguments,
            _cancel: CancellationToken,
        ) -> std::result::Result<ToolResult, ToolError> {
            Ok(ToolResult::success(arguments[self.1].clone()))
        }
    }

    fn call_block(tool: &str, params: Value) -> String {
        protocol::format_tool_call(tool, &params)
    }

    fn registry_with_counter() -> (Arc<ToolRegistry>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::with_tools([
            Arc::new(NoopTool {
                name: "read_file",
                calls: calls.clone(),
            }) as BoxedTool,
            Arc::new(CompletionTool("task_completed", "result")),
            Arc::new(CompletionTool("phase_complete", "summary")),
        ]);
        (Arc::new(registry), calls)
    }

    fn agent(llm: Arc<dyn LlmProvider>, registry: Arc<ToolRegistry>, max_rounds: u32) -> Agent {
        let config = AgentConfig {
            system_prompt: "You are a test agent.".into(),
            max_tool_rounds: max_rounds,
            executor: ExecutorConfig {
                max_retries: 0,
                retry_delay: std::time::Duration::ZERO,
            },
            ..Default::default()
        };
        Agent::new(config, registry, llm)
    }

    #[tokio::test]
    async fn test_plain_reply_is_implicit_completion() {
        let llm = ScriptedProvider::new(&["All done, no tools needed."]);
        let (registry, calls) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 5);

        let reply = agent.chat("hello").await.unwrap();

        assert_eq!(reply, "All done, no tools needed.");
        assert!(agent.task_completed());
        assert_eq!(agent.task_result(), Some("All done, no tools needed."));
        assert_eq!(llm.calls(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_round_cap_terminates_with_sentinel() {
        let looping = call_block("read_file", json!({"path": "a.txt"}));
        let llm = ScriptedProvider::new(&[&looping]);
        let (registry, calls) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 4);

        let reply = agent.chat("go").await.unwrap();

        assert_eq!(reply, MAX_ROUNDS_MESSAGE);
        assert!(!agent.task_completed());
        assert_eq!(llm.calls(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_two_round_completion() {
        let round1 = call_block("read_file", json!({"path": "a.txt"}));
        let round2 = r#"<<<TOOL_CALL>>>{"tool":"task_completed","parameters":{"result":"done"}}<<<END_TOOL_CALL>>>"#;
        let llm = ScriptedProvider::new(&[&round1, round2]);
        let (registry, calls) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 10);

        let reply = agent.chat("do it").await.unwrap();

        assert_eq!(reply, "done");
        assert!(agent.task_completed());
        assert_eq!(agent.task_result(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_call_gets_feedback_then_retries() {
        let broken = "<<<TOOL_CALL>>>\n{\"tool\": \"read_file\", \"parameters\": {\"path\": }\n<<<END_TOOL_CALL>>>";
        let llm = ScriptedProvider::new(&[broken, "Recovered."]);
        let (registry, calls) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 5);

        let reply = agent.chat("go").await.unwrap();
        assert_eq!(reply, "Recovered.");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // second request saw: system, user, broken assistant, feedback
        let seen = llm.seen.lock();
        let second = &seen[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[2].role, Role::Assistant);
        assert_eq!(second[2].content, broken);
        assert_eq!(second[3].role, Role::User);
        assert!(second[3].content.contains("Tool call block 1: JSON parse error"));
        assert!(second[3].content.contains(TOOL_CALL_START));
    }

    #[tokio::test]
    async fn test_english_feedback() {
        let llm = ScriptedProvider::new(&["<<<TOOL_CALL>>>nope<<<END_TOOL_CALL>>>", "ok"]);
        let (registry, _) = registry_with_counter();
        let mut agent = Agent::new(
            AgentConfig {
                language: Language::En,
                ..Default::default()
            },
            registry,
            llm.clone(),
        );

        agent.chat("go").await.unwrap();
        let feedback = &agent.conversation().messages()[3];
        assert!(feedback.content.starts_with("The tool call could not be parsed."));
    }

    #[tokio::test]
    async fn test_first_completion_wins_and_later_calls_still_run() {
        let reply = format!(
            "{}\n{}\n{}",
            call_block("phase_complete", json!({"phase": "architect", "summary": "plan ready"})),
            call_block("task_completed", json!({"result": "ignored"})),
            call_block("read_file", json!({"path": "after.txt"}))
        );
        let llm = ScriptedProvider::new(&[&reply]);
        let (registry, calls) = registry_with_counter();
        let mut agent = agent(llm, registry, 3);

        let result = agent.chat("go").await.unwrap();

        assert_eq!(result, "plan ready");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_completion_signal_does_not_complete() {
        // missing required `result` fails validation, so the loop continues
        let bad = call_block("task_completed", json!({}));
        let llm = ScriptedProvider::new(&[&bad, "fine, finished"]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 5);

        let result = agent.chat("go").await.unwrap();
        assert_eq!(result, "fine, finished");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_results_fed_back_as_single_user_message() {
        let reply = format!(
            "{}\n{}",
            call_block("read_file", json!({"path": "a"})),
            call_block("missing_tool", json!({}))
        );
        let llm = ScriptedProvider::new(&[&reply, "done"]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 5);

        agent.chat("go").await.unwrap();

        let msgs = agent.conversation().messages();
        // system, user, assistant(calls), user(results), assistant(done)
        assert_eq!(msgs.len(), 5);
        let feedback = &msgs[3];
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("Tool \"read_file\" result:"));
        assert!(feedback.content.contains("contents of a"));
        assert!(feedback.content.contains("Tool \"missing_tool\" result:"));
        assert!(feedback.content.contains("Unknown tool: missing_tool"));
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let (registry, _) = registry_with_counter();
        let mut agent = agent(Arc::new(FailingProvider), registry, 3);

        let err = agent.chat("go").await.unwrap_err();
        assert!(matches!(err, Error::Ai(_)));
        assert!(!agent.handle().is_running());
    }

    #[tokio::test]
    async fn test_abort_cancels_inflight_llm_call() {
        let (registry, _) = registry_with_counter();
        let mut agent = agent(Arc::new(HangingProvider), registry, 3);
        let handle = agent.handle();

        let aborter = tokio::spawn(async move {
            while !handle.is_running() {
                tokio::task::yield_now().await;
            }
            handle.abort();
        });

        let err = agent.chat("go").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        aborter.await.unwrap();
        assert!(!agent.handle().is_running());
    }

    #[tokio::test]
    async fn test_task_state_reset_per_invocation() {
        let llm = ScriptedProvider::new(&[
            r#"<<<TOOL_CALL>>>{"tool":"task_completed","parameters":{"result":"first"}}<<<END_TOOL_CALL>>>"#,
            &call_block("read_file", json!({"path": "x"})),
        ]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm, registry, 2);

        assert_eq!(agent.chat("one").await.unwrap(), "first");
        assert!(agent.task_completed());

        assert_eq!(agent.chat("two").await.unwrap(), MAX_ROUNDS_MESSAGE);
        assert!(!agent.task_completed());
        assert_eq!(agent.task_result(), None);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let round1 = call_block("read_file", json!({"path": "a"}));
        let llm = ScriptedProvider::new(&[&round1, "finished"]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm, registry, 5);
        let mut rx = agent.subscribe();

        agent.chat("go").await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                AgentEvent::AgentStart => "start",
                AgentEvent::RoundStart { .. } => "round",
                AgentEvent::MessageEnd { .. } => "message",
                AgentEvent::ToolCallStart { .. } => "tool_start",
                AgentEvent::ToolCallEnd { .. } => "tool_end",
                AgentEvent::TaskCompleted { .. } => "completed",
                AgentEvent::AgentEnd { .. } => "end",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "start", "round", "message", "tool_start", "tool_end", "round", "message",
                "completed", "end"
            ]
        );
    }

    #[tokio::test]
    async fn test_system_prompt_includes_tool_catalogue() {
        let llm = ScriptedProvider::new(&["hi"]);
        let (registry, _) = registry_with_counter();
        let agent = agent(llm, registry, 1);

        let prompt = agent.conversation().system_prompt();
        assert!(prompt.starts_with("You are a test agent."));
        assert!(prompt.contains("### read_file"));
        assert!(prompt.contains("### task_completed"));
    }

    #[tokio::test]
    async fn test_context_budget_trims_history() {
        let llm = ScriptedProvider::new(&["a", "b", "c"]);
        let mut agent = Agent::new(
            AgentConfig {
                context_token_budget: Some(2),
                ..Default::default()
            },
            Arc::new(ToolRegistry::new()),
            llm.clone(),
        );

        for msg in ["first message here", "second", "third"] {
            agent.chat(msg).await.unwrap();
        }

        // 2 tokens = 8 chars: only the newest user message fits when sent
        let seen = llm.seen.lock();
        let last = seen.last().unwrap();
        assert_eq!(last[0].role, Role::System);
        assert_eq!(last.last().unwrap().content, "third");
        assert!(last.len() < 6);
    }

    #[tokio::test]
    async fn test_chat_stream_yields_text_and_status() {
        let round1 = call_block("read_file", json!({"path": "a"}));
        let round2 = call_block("task_completed", json!({"result": "all good"}));
        let llm = ScriptedProvider::new(&[&round1, &round2]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm, registry, 5);

        let chunks: Vec<String> = agent
            .chat_stream("go", 5)
            .map(|c| c.unwrap())
            .collect()
            .await;
        let joined = chunks.concat();

        assert!(joined.contains("[🔧 read_file] ✓ contents of a"));
        assert!(joined.contains("[🔧 task_completed] ✓ all good"));
        assert!(joined.ends_with("\n\n✅ all good\n"));
        assert!(agent.task_completed());
    }

    #[tokio::test]
    async fn test_chat_stream_round_cap() {
        let looping = call_block("read_file", json!({"path": "a"}));
        let llm = ScriptedProvider::new(&[&looping]);
        let (registry, _) = registry_with_counter();
        let mut agent = agent(llm.clone(), registry, 2);

        let chunks: Vec<_> = agent.chat_stream("go", 2).collect().await;
        let last = chunks.last().unwrap().as_ref().unwrap();
        assert!(last.contains(MAX_ROUNDS_MESSAGE));
        assert_eq!(llm.calls(), 2);
    }

    #[test]
    fn test_completion_payload() {
        let call = |name: &str, args: Value| ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments: args.as_object().cloned().unwrap_or_default(),
        };
        assert_eq!(
            completion_payload(&call("task_completed", json!({"result": "r"}))),
            Some("r".into())
        );
        assert_eq!(
            completion_payload(&call("phase_complete", json!({"summary": "s"}))),
            Some("s".into())
        );
        assert_eq!(
            completion_payload(&call("task_completed", json!({}))),
            Some(String::new())
        );
        assert_eq!(completion_payload(&call("read_file", json!({}))), None);
    }

    #[test]
    fn test_language_deserializes_aliases() {
        let zh: Language = serde_json::from_str("\"zh-cn\"").unwrap();
        assert_eq!(zh, Language::Zh);
        let en: Language = serde_json::from_str("\"english\"").unwrap();
        assert_eq!(en, Language::En);
    }
}
