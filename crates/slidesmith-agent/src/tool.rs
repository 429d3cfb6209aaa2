//! Tool trait and results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Arguments handed to a tool: the `parameters` object of a parsed call
pub type ToolArguments = Map<String, Value>;

/// Outcome status of a tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
    Pending,
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    /// Output handed back to the model
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            output: output.into(),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Create a handled failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: Value::Null,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn pending() -> Self {
        Self {
            status: ToolStatus::Pending,
            output: Value::Null,
            error: None,
            metadata: Map::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// String output, if the output is a JSON string
    pub fn output_str(&self) -> Option<&str> {
        self.output.as_str()
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            ToolStatus::Success => match &self.output {
                Value::Null => f.write_str("Success"),
                Value::String(s) if s.is_empty() => f.write_str("Success"),
                Value::String(s) => f.write_str(s),
                other => write!(f, "{}", other),
            },
            ToolStatus::Error => write!(
                f,
                "Error: {}",
                self.error.as_deref().unwrap_or("Unknown error")
            ),
            ToolStatus::Pending => f.write_str("Pending"),
        }
    }
}

/// An execution exception.
///
/// Returning `Err` from [`Tool::execute`] means the attempt itself blew up and
/// the executor may retry it. Expected failures (bad path, command exited
/// non-zero) are `Ok(ToolResult::failure(..))` and are never retried.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ai(#[from] slidesmith_ai::Error),

    #[error("{0}")]
    Failed(String),
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, as the model writes it in a call block
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        arguments: &ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError>;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Argument accessors that turn a missing or mistyped value into a failure result
pub mod args {
    use super::{ToolArguments, ToolResult};

    pub fn str<'a>(args: &'a ToolArguments, key: &str) -> Result<&'a str, ToolResult> {
        args.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolResult::failure(format!("Missing required parameter: {}", key)))
    }

    pub fn opt_str<'a>(args: &'a ToolArguments, key: &str) -> Option<&'a str> {
        args.get(key).and_then(|v| v.as_str())
    }

    pub fn opt_bool(args: &ToolArguments, key: &str) -> Option<bool> {
        args.get(key).and_then(|v| v.as_bool())
    }

    pub fn opt_u64(args: &ToolArguments, key: &str) -> Option<u64> {
        args.get(key).and_then(|v| v.as_u64())
    }

    /// Either an array under `plural` or a single string under `singular`
    pub fn str_list(args: &ToolArguments, plural: &str, singular: &str) -> Vec<String> {
        if let Some(items) = args.get(plural).and_then(|v| v.as_array()) {
            return items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
        opt_str(args, singular)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                }
            })
        }
        async fn execute(
            &self,
            arguments: &ToolArguments,
            _cancel: CancellationToken,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(
                args::opt_str(arguments, "text").unwrap_or("(empty)"),
            ))
        }
    }

    #[tokio::test]
    async fn test_echo_tool_executes() {
        let mut a = ToolArguments::new();
        a.insert("text".into(), json!("hello"));
        let result = EchoTool.execute(&a, CancellationToken::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.to_string(), "hello");
    }

    #[test]
    fn test_display_variants() {
        assert_eq!(ToolResult::success(Value::Null).to_string(), "Success");
        assert_eq!(ToolResult::failure("bad").to_string(), "Error: bad");
        assert_eq!(ToolResult::success(json!({"a": 1})).to_string(), r#"{"a":1}"#);
    }

    #[test]
    fn test_with_meta() {
        let r = ToolResult::success("ok").with_meta("size", 3);
        assert_eq!(r.metadata["size"], 3);
    }

    #[test]
    fn test_result_serializes_status_lowercase() {
        let v = serde_json::to_value(ToolResult::failure("x")).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "x");
    }

    #[test]
    fn test_str_list_accepts_plural_or_singular() {
        let plural = json!({"paths": ["a", "b"]});
        let plural = plural.as_object().unwrap();
        assert_eq!(args::str_list(plural, "paths", "path"), vec!["a", "b"]);

        let single = json!({"path": "c"});
        let single = single.as_object().unwrap();
        assert_eq!(args::str_list(single, "paths", "path"), vec!["c"]);

        assert!(args::str_list(&ToolArguments::new(), "paths", "path").is_empty());
    }

    #[test]
    fn test_required_str_missing() {
        let err = args::str(&ToolArguments::new(), "path").unwrap_err();
        assert_eq!(err.error.as_deref(), Some("Missing required parameter: path"));
    }
}
