//! File reading tool

use async_trait::async_trait;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::sandbox::Workspace;

/// Text encodings the file tools understand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }

    pub fn decode(self, bytes: Vec<u8>) -> Result<String, String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes).map_err(|e| e.to_string()),
            Self::Latin1 => Ok(bytes.into_iter().map(char::from).collect()),
        }
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>, String> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c))
                        .map_err(|_| format!("character {:?} cannot be encoded as latin-1", c))
                })
                .collect(),
        }
    }
}

/// Resolve the optional `encoding` argument, defaulting to UTF-8
pub(crate) fn encoding_arg(arguments: &ToolArguments) -> Result<TextEncoding, ToolResult> {
    match args::opt_str(arguments, "encoding") {
        None => Ok(TextEncoding::Utf8),
        Some(name) => TextEncoding::parse(name)
            .ok_or_else(|| ToolResult::failure(format!("Unsupported encoding: {}", name))),
    }
}

/// Prefix every line with its 1-based number
pub fn number_lines(content: &str) -> (String, usize) {
    let lines: Vec<&str> = content.split('\n').collect();
    let numbered = lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n");
    (numbered, lines.len())
}

/// Tool for reading one or more files inside the workspace
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of one or more files. Returns file content with line numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of file paths to read (relative to workspace)"
                },
                "path": {
                    "type": "string",
                    "description": "Single file path (alternative to 'paths')"
                },
                "encoding": {
                    "type": "string",
                    "description": "File encoding (default: utf-8)"
                }
            },
            "required": []
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let paths = args::str_list(arguments, "paths", "path");
        if paths.is_empty() {
            return Ok(ToolResult::failure(
                "Either 'path' or 'paths' parameter is required",
            ));
        }
        let encoding = match encoding_arg(arguments) {
            Ok(e) => e,
            Err(failure) => return Ok(failure),
        };

        let resolved = match self.workspace.resolve_all(paths.iter().map(String::as_str)) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let multiple = paths.len() > 1;
        let mut sections = Vec::with_capacity(paths.len());
        let mut success_count = 0usize;
        let mut fail_count = 0usize;

        for (display, path) in paths.iter().zip(&resolved) {
            if cancel.is_cancelled() {
                return Ok(ToolResult::failure("Read cancelled"));
            }

            if !path.exists() {
                sections.push(format!("[{}] File not found", display));
                fail_count += 1;
                continue;
            }
            if !path.is_file() {
                sections.push(format!("[{}] Not a file", display));
                fail_count += 1;
                continue;
            }

            let bytes = fs::read(path).await?;
            let content = match encoding.decode(bytes) {
                Ok(c) => c,
                Err(e) => {
                    sections.push(format!("[{}] Decode error: {}", display, e));
                    fail_count += 1;
                    continue;
                }
            };

            let (numbered, line_count) = number_lines(&content);
            if multiple {
                sections.push(format!("=== {} ({} lines) ===\n{}", display, line_count, numbered));
            } else {
                sections.push(numbered);
            }
            success_count += 1;
        }

        let output = sections.join("\n\n");
        let result = if success_count == 0 {
            ToolResult::failure(output)
        } else {
            ToolResult::success(output)
        };

        Ok(result
            .with_meta("success_count", success_count)
            .with_meta("fail_count", fail_count)
            .with_meta("total_count", paths.len()))
    }
}
