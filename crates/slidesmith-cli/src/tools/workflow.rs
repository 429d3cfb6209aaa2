//! Tools the model uses to signal progress: task completion, phase hand-off,
//! and plan updates

use async_trait::async_trait;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::sandbox::Workspace;
use crate::phase::{PhaseSignal, SignalledPhase};
use crate::plan::PLAN_FILE;

/// Signals that the assigned task is done; its `result` ends the agent loop
pub struct TaskCompletedTool;

#[async_trait]
impl Tool for TaskCompletedTool {
    fn name(&self) -> &str {
        "task_completed"
    }

    fn description(&self) -> &str {
        "Signal that the assigned task has been completed. Use this when you have finished all required work."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result": {
                    "type": "string",
                    "description": "A summary of what was accomplished"
                }
            },
            "required": ["result"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let result = match args::str(arguments, "result") {
            Ok(r) => r,
            Err(failure) => return Ok(failure),
        };
        Ok(ToolResult::success(result)
            .with_meta("completed", true)
            .with_meta("result", result))
    }
}

/// Signals that a workflow phase is finished; its `summary` ends the agent loop
pub struct PhaseCompleteTool {
    notify: Option<mpsc::UnboundedSender<PhaseSignal>>,
}

impl PhaseCompleteTool {
    pub fn new() -> Self {
        Self { notify: None }
    }

    /// Forward every accepted signal to a phase tracker
    pub fn with_notify(notify: mpsc::UnboundedSender<PhaseSignal>) -> Self {
        Self {
            notify: Some(notify),
        }
    }
}

impl Default for PhaseCompleteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for PhaseCompleteTool {
    fn name(&self) -> &str {
        "phase_complete"
    }

    fn description(&self) -> &str {
        "Signal that the current phase is complete and ready to transition.\n\
         Use this when you have finished gathering information and want to hand off to the next agent.\n\
         Valid phases: 'collecting' (information gathering), 'architect' (presentation planning), 'designer' (slide design)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "phase": {
                    "type": "string",
                    "description": "The phase that was completed",
                    "enum": SignalledPhase::NAMES
                },
                "summary": {
                    "type": "string",
                    "description": "Summary of what was accomplished in this phase and key information for the next phase"
                }
            },
            "required": ["phase", "summary"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let phase_name = match args::str(arguments, "phase") {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        let summary = match args::str(arguments, "summary") {
            Ok(s) => s,
            Err(failure) => return Ok(failure),
        };
        let Some(phase) = SignalledPhase::parse(phase_name) else {
            return Ok(ToolResult::failure(format!(
                "Invalid phase: {}. Must be one of: {}",
                phase_name,
                SignalledPhase::NAMES.join(", ")
            )));
        };

        if let Some(notify) = &self.notify {
            let signal = PhaseSignal {
                phase,
                summary: summary.to_string(),
            };
            if notify.send(signal).is_err() {
                tracing::debug!(phase = phase_name, "phase listener dropped");
            }
        }

        Ok(
            ToolResult::success(format!("Phase '{}' completed successfully", phase_name))
                .with_meta("phase", phase_name)
                .with_meta("summary", summary)
                .with_meta("phase_complete", true),
        )
    }
}

/// Writes the slide outline to `slides/presentation_plan.json`
pub struct UpdatePresentationPlanTool {
    workspace: Workspace,
}

impl UpdatePresentationPlanTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for UpdatePresentationPlanTool {
    fn name(&self) -> &str {
        "update_presentation_plan"
    }

    fn description(&self) -> &str {
        "Update the presentation plan with new slide data."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "slides": {
                    "type": "array",
                    "description": "Array of slide objects",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "content": { "type": "array" },
                            "notes": { "type": "string" },
                            "layout": { "type": "string" }
                        }
                    }
                },
                "metadata": {
                    "type": "object",
                    "description": "Presentation metadata (title, theme, etc.)"
                }
            },
            "required": ["slides"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        _cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let Some(slides) = arguments.get("slides").and_then(Value::as_array) else {
            return Ok(ToolResult::failure("Missing required parameter: slides"));
        };
        let metadata = arguments
            .get("metadata")
            .filter(|m| m.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        let plan = json!({
            "metadata": metadata,
            "slides": slides,
            "version": "1.0",
        });

        let path = self.workspace.root().join(PLAN_FILE);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_string_pretty(&plan)?).await?;
        tracing::info!(slides = slides.len(), "presentation plan updated");

        Ok(ToolResult::success(format!(
            "Updated presentation plan with {} slides",
            slides.len()
        ))
        .with_meta("path", path.to_string_lossy().into_owned())
        .with_meta("slide_count", slides.len()))
    }
}
