//! File writing tool

use async_trait::async_trait;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::read::encoding_arg;
use super::sandbox::Workspace;

/// Tool for writing file contents inside the workspace
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, or overwrites if it does."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The path to the file to write (relative to workspace)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (default: utf-8)"
                },
                "create_dirs": {
                    "type": "boolean",
                    "description": "Create parent directories if they don't exist (default: true)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let path_str = match args::str(arguments, "path") {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        let content = match args::str(arguments, "content") {
            Ok(c) => c,
            Err(failure) => return Ok(failure),
        };
        let create_dirs = args::opt_bool(arguments, "create_dirs").unwrap_or(true);
        let encoding = match encoding_arg(arguments) {
            Ok(e) => e,
            Err(failure) => return Ok(failure),
        };

        let path = match self.workspace.resolve(path_str) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        if cancel.is_cancelled() {
            return Ok(ToolResult::failure("Operation cancelled"));
        }

        let bytes = match encoding.encode(content) {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::failure(format!("Error writing file: {}", e))),
        };

        if let Some(parent) = path.parent() {
            if create_dirs {
                fs::create_dir_all(parent).await?;
            } else if !parent.exists() {
                return Ok(ToolResult::failure(format!(
                    "Parent directory does not exist: {}",
                    parent.display()
                )));
            }
        }

        let existed = path.exists();
        fs::write(&path, &bytes).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");

        Ok(ToolResult::success(format!(
            "Successfully wrote {} bytes to {}",
            bytes.len(),
            path_str
        ))
        .with_meta("path", path.to_string_lossy().into_owned())
        .with_meta("size", bytes.len())
        .with_meta("created", !existed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, WriteFileTool) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        (dir, WriteFileTool::new(ws))
    }

    fn arguments(value: Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_write_creates_dirs() {
        let (dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"path": "slides/slide_1.html", "content": "<html></html>"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(
            result.output_str(),
            Some("Successfully wrote 13 bytes to slides/slide_1.html")
        );
        assert_eq!(result.metadata["created"], true);
        let written = std::fs::read_to_string(dir.path().join("slides/slide_1.html")).unwrap();
        assert_eq!(written, "<html></html>");
    }

    #[tokio::test]
    async fn test_overwrite_reports_not_created() {
        let (dir, tool) = setup();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let result = tool
            .execute(
                &arguments(json!({"path": "a.txt", "content": "new"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.metadata["created"], false);
        assert_eq!(result.metadata["size"], 3);
    }

    #[tokio::test]
    async fn test_missing_parent_without_create_dirs() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"path": "x/y.txt", "content": "c", "create_dirs": false})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(
            result
                .error
                .unwrap()
                .starts_with("Parent directory does not exist:")
        );
    }

    #[tokio::test]
    async fn test_escape_rejected_and_nothing_written() {
        let (dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"path": "../evil.txt", "content": "x"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Access denied: ../evil.txt is outside workspace")
        );
        assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn test_missing_content() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(&arguments(json!({"path": "a.txt"})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Missing required parameter: content")
        );
    }
}
