//! Tool execution: lookup, argument validation, bounded retry

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, ParseOutcome, ToolCall, ToolCallParser};
use crate::registry::ToolRegistry;
use crate::tool::{BoxedTool, ToolResult};

/// Retry policy for execution exceptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// How a batch of calls is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// Runs parsed calls against a registry.
///
/// Apart from the parser's id counter and the schema cache, the executor
/// holds no state between calls.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    parser: ToolCallParser,
    /// Compiled parameter validators keyed by tool name; `None` marks a schema
    /// that failed to compile and is skipped
    schema_cache: Mutex<HashMap<String, Option<Arc<jsonschema::Validator>>>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    pub fn with_config(registry: Arc<ToolRegistry>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            config,
            parser: ToolCallParser::new(),
            schema_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn config(&self) -> ExecutorConfig {
        self.config
    }

    pub fn parse_tool_calls(&self, text: &str) -> ParseOutcome {
        self.parser.parse(text)
    }

    pub fn has_tool_call_markers(&self, text: &str) -> bool {
        protocol::has_tool_call_markers(text)
    }

    pub fn has_complete_tool_blocks(&self, text: &str) -> bool {
        protocol::has_complete_tool_blocks(text)
    }

    pub fn strip_tool_calls(&self, text: &str) -> String {
        protocol::strip_tool_calls(text)
    }

    pub fn format_results_for_llm(&self, results: &[(ToolCall, ToolResult)]) -> String {
        protocol::format_tool_results(results)
    }

    /// Execute one call without cancellation
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        self.execute_with_cancel(call, CancellationToken::new()).await
    }

    /// Execute one call. Never panics and never returns an error: every
    /// outcome, including a crashing tool, becomes a `ToolResult`.
    pub async fn execute_with_cancel(&self, call: &ToolCall, cancel: CancellationToken) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            tracing::warn!(tool = %call.name, "unknown tool requested");
            return ToolResult::failure(format!("Unknown tool: {}", call.name))
                .with_meta("available_tools", self.registry.names());
        };

        if let Some(err) = self.validate(tool, call) {
            tracing::debug!(tool = %call.name, "argument validation failed: {}", err);
            return ToolResult::failure(err);
        }

        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            tracing::debug!(tool = %call.name, id = %call.id, attempt, "executing tool");

            let run = AssertUnwindSafe(tool.execute(&call.arguments, cancel.clone())).catch_unwind();
            match run.await {
                Ok(Ok(result)) => return result,
                Ok(Err(e)) => last_error = e.to_string(),
                Err(panic) => last_error = panic_message(panic.as_ref()),
            }

            tracing::warn!(
                tool = %call.name,
                attempt,
                attempts,
                "tool execution raised: {}",
                last_error
            );

            if attempt < attempts && !self.config.retry_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return ToolResult::failure(format!(
                            "Tool execution cancelled after {} of {} attempts: {}",
                            attempt, attempts, last_error
                        ));
                    }
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        ToolResult::failure(format!(
            "Tool execution failed after {} attempts: {}",
            attempts, last_error
        ))
    }

    /// Execute a batch; results come back in call order
    pub async fn execute_all(
        &self,
        calls: &[ToolCall],
        mode: ExecutionMode,
        cancel: CancellationToken,
    ) -> Vec<ToolResult> {
        match mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(calls.len());
                for call in calls {
                    results.push(self.execute_with_cancel(call, cancel.clone()).await);
                }
                results
            }
            ExecutionMode::Parallel => {
                let futures = calls.iter().map(|call| {
                    AssertUnwindSafe(self.execute_with_cancel(call, cancel.clone())).catch_unwind()
                });
                join_all(futures)
                    .await
                    .into_iter()
                    .map(|r| {
                        r.unwrap_or_else(|panic| {
                            ToolResult::failure(panic_message(panic.as_ref()))
                        })
                    })
                    .collect()
            }
        }
    }

    fn validate(&self, tool: &BoxedTool, call: &ToolCall) -> Option<String> {
        let validator = {
            let mut cache = self.schema_cache.lock();
            cache
                .entry(call.name.clone())
                .or_insert_with(|| compile_schema(tool))
                .clone()
        }?;

        let args = Value::Object(call.arguments.clone());
        validate_with_validator(&args, &validator)
            .map(|violation| format!("Invalid arguments for {}: {}", call.name, violation))
    }
}

fn compile_schema(tool: &BoxedTool) -> Option<Arc<jsonschema::Validator>> {
    let schema = tool.parameters_schema();
    match jsonschema::validator_for(&schema) {
        Ok(validator) => Some(Arc::new(validator)),
        Err(e) => {
            tracing::warn!(
                "Invalid tool parameter schema for '{}', skipping validation: {}",
                tool.name(),
                e
            );
            None
        }
    }
}

/// First schema violation, if any
fn validate_with_validator(args: &Value, validator: &jsonschema::Validator) -> Option<String> {
    validator.iter_errors(args).next().map(|e| {
        let path = e.instance_path.to_string();
        if path.is_empty() {
            e.to_string()
        } else {
            format!("{}: {}", path, e)
        }
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("tool panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("tool panicked: {}", s)
    } else {
        "tool panicked".to_string()
    }
}
