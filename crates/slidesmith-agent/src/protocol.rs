//! Boundary-marker tool-call protocol.
//!
//! The model never sees a native function-calling API. Instead it writes
//! each invocation as a JSON object between two literal markers:
//!
//! ```text
//! <<<TOOL_CALL>>>
//! {"tool": "read_file", "parameters": {"path": "a.txt"}}
//! <<<END_TOOL_CALL>>>
//! ```
//!
//! This module finds those blocks, turns them into [`ToolCall`]s, and renders
//! the tool catalogue and result feedback that travel the other way.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::registry::ToolRegistry;
use crate::tool::{ToolArguments, ToolResult};

pub const TOOL_CALL_START: &str = "<<<TOOL_CALL>>>";
pub const TOOL_CALL_END: &str = "<<<END_TOOL_CALL>>>";

const NAME_KEYS: [&str; 2] = ["tool", "name"];
const PARAM_KEYS: [&str; 3] = ["parameters", "args", "arguments"];

static BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<<<TOOL_CALL>>>\s*(.*?)\s*<<<END_TOOL_CALL>>>")
        .expect("tool call block pattern is valid")
});

static BLANK_RUNS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").expect("blank-run pattern is valid")
});

/// A single parsed invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

/// Everything recovered from one piece of model output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub calls: Vec<ToolCall>,
    pub errors: Vec<String>,
}

impl ParseOutcome {
    /// The model tried to call a tool but no block survived parsing.
    ///
    /// This is the retry-with-feedback case, as opposed to a plain reply
    /// that never intended a tool call.
    pub fn is_malformed(&self, text: &str) -> bool {
        self.calls.is_empty() && !self.errors.is_empty() && has_tool_call_markers(text)
    }
}

/// Stateful parser that hands out `call_<n>` ids.
///
/// The counter only moves forward, so ids stay unique for the parser's
/// whole lifetime, not just within one `parse`.
#[derive(Debug, Default)]
pub struct ToolCallParser {
    counter: AtomicU64,
}

impl ToolCallParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("call_{}", n)
    }

    pub fn parse(&self, text: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for (i, caps) in BLOCK_RE.captures_iter(text).enumerate() {
            let block = i + 1;
            let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

            match parse_block(body) {
                Ok((name, arguments)) => outcome.calls.push(ToolCall {
                    id: self.next_id(),
                    name,
                    arguments,
                }),
                Err(reason) => {
                    tracing::debug!("tool call block {} rejected: {}", block, reason);
                    outcome
                        .errors
                        .push(format!("Tool call block {}: {}", block, reason));
                }
            }
        }

        outcome
    }
}

fn parse_block(body: &str) -> Result<(String, ToolArguments), String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("JSON parse error - {}", e))?;
    let Value::Object(obj) = value else {
        return Err("expected a JSON object".into());
    };

    let name = NAME_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "missing 'tool' or 'name' key".to_string())?;

    let params = PARAM_KEYS
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()));
    let arguments = match params {
        None => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err("parameters must be a JSON object".into()),
    };

    Ok((name.to_string(), arguments))
}

/// Parse with a throwaway id counter
pub fn parse_tool_calls(text: &str) -> ParseOutcome {
    ToolCallParser::new().parse(text)
}

pub fn has_tool_call_markers(text: &str) -> bool {
    text.contains(TOOL_CALL_START)
}

/// At least one start marker, and no start left without an end
pub fn has_complete_tool_blocks(text: &str) -> bool {
    let starts = text.matches(TOOL_CALL_START).count();
    let ends = text.matches(TOOL_CALL_END).count();
    starts > 0 && ends >= starts
}

/// Remove every call block, leaving readable prose
pub fn strip_tool_calls(text: &str) -> String {
    let stripped = BLOCK_RE.replace_all(text, "");
    BLANK_RUNS_RE.replace_all(&stripped, "\n\n").trim().to_string()
}

/// Render one call back into marker syntax
pub fn format_tool_call(name: &str, parameters: &Value) -> String {
    let body = serde_json::json!({ "tool": name, "parameters": parameters });
    let pretty = serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string());
    format!("{}\n{}\n{}", TOOL_CALL_START, pretty, TOOL_CALL_END)
}

/// Feedback message carrying every result of a round, each tagged by tool name
pub fn format_tool_results(results: &[(ToolCall, ToolResult)]) -> String {
    results
        .iter()
        .map(|(call, result)| {
            let payload = serde_json::json!({
                "status": result.status,
                "output": result.output,
                "error": result.error,
                "metadata": result.metadata,
            });
            let pretty =
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
            format!("Tool \"{}\" result:\n{}", call.name, pretty)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the tool catalogue and usage rules appended to a system prompt
pub fn render_tool_definitions(registry: &ToolRegistry) -> String {
    if registry.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Available Tools\n\n");
    for tool in registry.all() {
        let schema = tool.parameters_schema();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        out.push_str(&format!("### {}\n{}\n\n", tool.name(), tool.description()));

        let mut example = Map::new();
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            out.push_str("Parameters:\n");
            for (name, prop) in props {
                let ty = prop.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                let desc = prop
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or("");
                let marker = if required.contains(&name.as_str()) {
                    "required"
                } else {
                    "optional"
                };
                out.push_str(&format!("- `{}` ({}, {}): {}\n", name, ty, marker, desc));
                if required.contains(&name.as_str()) {
                    example.insert(name.clone(), placeholder_for(prop));
                }
            }
            out.push('\n');
        }

        out.push_str("Example:\n");
        out.push_str(&format_tool_call(tool.name(), &Value::Object(example)));
        out.push_str("\n\n");
    }

    out.push_str(&format!(
        "## How to Use Tools\n\n\
         To call a tool, write a JSON object between {start} and {end}:\n\n\
         {start}\n{{\"tool\": \"tool_name\", \"parameters\": {{\"key\": \"value\"}}}}\n{end}\n\n\
         Rules:\n\
         - Call one tool at a time and wait for its result before continuing.\n\
         - The content between the markers must be valid JSON.\n\
         - Tool results arrive in the next message.\n\
         - When the task is done, call `task_completed` if it is available, \
         otherwise reply without any tool call.\n",
        start = TOOL_CALL_START,
        end = TOOL_CALL_END,
    ));

    out
}

fn placeholder_for(prop: &Value) -> Value {
    if let Some(first) = prop
        .get("enum")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
    {
        return first.clone();
    }
    match prop.get("type").and_then(|t| t.as_str()) {
        Some("integer") | Some("number") => Value::from(0),
        Some("boolean") => Value::Bool(false),
        Some("array") => Value::Array(vec![]),
        Some("object") => Value::Object(Map::new()),
        _ => Value::String("...".into()),
    }
}
