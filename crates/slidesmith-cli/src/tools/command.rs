//! Shell command execution tool

use async_trait::async_trait;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::sandbox::Workspace;

/// Default command timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000;
/// Maximum number of lines before truncation
const MAX_OUTPUT_LINES: usize = 1000;

/// Tool for running shell commands inside the workspace
pub struct ExecuteCommandTool {
    workspace: Workspace,
    timeout: Duration,
    /// `None` allows every command
    allowed_commands: Option<Vec<String>>,
}

impl ExecuteCommandTool {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            allowed_commands: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Only allow commands whose first word is in the list
    pub fn with_allowed_commands(mut self, commands: Vec<String>) -> Self {
        self.allowed_commands = Some(commands);
        self
    }
}

/// Captured lines from one output stream
#[derive(Default)]
struct Captured {
    text: String,
    lines: usize,
    truncated: bool,
    closed: bool,
}

impl Captured {
    fn push(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.lines >= MAX_OUTPUT_LINES || self.text.len() + line.len() > MAX_OUTPUT_SIZE {
            self.truncated = true;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn finish(&self, label: &str) -> String {
        let mut out = self.text.trim().to_string();
        if self.truncated {
            out.push_str(&format!(
                "\n\n... ({} truncated at {} lines / {}KB)",
                label,
                self.lines,
                MAX_OUTPUT_SIZE / 1024
            ));
        }
        out
    }
}

/// One raw line as text, lossy for bytes that are not UTF-8
fn take_line(buf: &mut Vec<u8>) -> String {
    let end = buf
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    let line = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.clear();
    line
}

fn combine(stdout: &Captured, stderr: &Captured) -> String {
    let mut parts = Vec::new();
    let out = stdout.finish("stdout");
    if !out.is_empty() {
        parts.push(out);
    }
    let err = stderr.finish("stderr");
    if !err.is_empty() {
        parts.push(format!("[stderr]\n{}", err));
    }
    if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return its output. Use with caution."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory for command execution (default: workspace root)"
                },
                "timeout": {
                    "type": "integer",
                    "description": format!("Command timeout in seconds (default: {})", self.timeout.as_secs())
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let command = match args::str(arguments, "command") {
            Ok(c) => c,
            Err(failure) => return Ok(failure),
        };

        if let Some(allowed) = &self.allowed_commands {
            let name = command.split_whitespace().next().unwrap_or("");
            if !allowed.iter().any(|a| a == name) {
                return Ok(ToolResult::failure(format!(
                    "Command '{}' is not in the allowed list",
                    name
                )));
            }
        }

        let cwd = match args::opt_str(arguments, "cwd") {
            Some(dir) => match self.workspace.resolve(dir) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResult::failure(e.to_string())),
            },
            None => self.workspace.root().to_path_buf(),
        };
        if !cwd.is_dir() {
            return Ok(ToolResult::failure(format!(
                "Working directory does not exist: {}",
                cwd.display()
            )));
        }

        let timeout = args::opt_u64(arguments, "timeout")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        tracing::info!(command, cwd = %cwd.display(), "executing command");
        let mut child = match Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Error executing command: {}",
                    e
                )));
            }
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ToolError::Failed("child output pipes unavailable".into()));
        };
        let mut stdout_reader = BufReader::new(stdout);
        let mut stderr_reader = BufReader::new(stderr);
        // partial lines survive a select round in these buffers
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let mut out = Captured::default();
        let mut err = Captured::default();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Ok(ToolResult::failure("Command cancelled").with_meta("command", command));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = child.kill().await;
                    tracing::warn!(command, secs = timeout.as_secs(), "command timed out");
                    return Ok(ToolResult::failure(format!(
                        "Command timed out after {} seconds",
                        timeout.as_secs()
                    ))
                    .with_meta("command", command));
                }
                read = stdout_reader.read_until(b'\n', &mut out_buf), if !out.closed => {
                    match read {
                        Ok(n) => {
                            if !out_buf.is_empty() {
                                out.push(&take_line(&mut out_buf));
                            }
                            out.closed = n == 0;
                        }
                        Err(e) => {
                            err.push(&format!("Stdout read error: {}", e));
                            out.closed = true;
                        }
                    }
                }
                read = stderr_reader.read_until(b'\n', &mut err_buf), if !err.closed => {
                    match read {
                        Ok(n) => {
                            if !err_buf.is_empty() {
                                err.push(&take_line(&mut err_buf));
                            }
                            err.closed = n == 0;
                        }
                        Err(e) => {
                            err.push(&format!("Stderr read error: {}", e));
                            err.closed = true;
                        }
                    }
                }
                status = child.wait(), if out.closed && err.closed => {
                    let status = status?;
                    let output = combine(&out, &err);
                    let code = status.code().unwrap_or(-1);

                    let result = if status.success() {
                        ToolResult::success(output)
                            .with_meta("cwd", cwd.to_string_lossy().into_owned())
                    } else {
                        ToolResult::failure(format!(
                            "Command failed with exit code {}:\n{}",
                            code, output
                        ))
                    };
                    return Ok(result
                        .with_meta("command", command)
                        .with_meta("return_code", code));
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, ExecuteCommandTool) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        (dir, ExecuteCommandTool::new(ws))
    }

    fn arguments(value: Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_stdout_and_stderr() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"command": "echo hello; echo oops 1>&2"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output_str(), Some("hello\n[stderr]\noops"));
        assert_eq!(result.metadata["return_code"], 0);
    }

    #[tokio::test]
    async fn test_runs_in_workspace() {
        let (dir, tool) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker.txt"), "").unwrap();
        let result = tool
            .execute(
                &arguments(json!({"command": "ls", "cwd": "sub"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.output_str(), Some("marker.txt"));
    }

    #[tokio::test]
    async fn test_no_output() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(&arguments(json!({"command": "true"})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.output_str(), Some("(no output)"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"command": "echo bad; exit 3"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(
            result.error.as_deref(),
            Some("Command failed with exit code 3:\nbad")
        );
        assert_eq!(result.metadata["return_code"], 3);
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_is_decoded_lossily() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"command": "printf 'a\\377b\\nafter\\n'; printf '\\376' 1>&2"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(
            result.output_str(),
            Some("a\u{FFFD}b\nafter\n[stderr]\n\u{FFFD}")
        );
    }

    #[tokio::test]
    async fn test_large_output_after_invalid_byte_drains() {
        let (_dir, tool) = setup();
        let started = std::time::Instant::now();
        let result = tool
            .execute(
                &arguments(json!({
                    "command": "printf '\\377\\n'; head -c 300000 /dev/zero | tr '\\0' a; echo; echo done",
                    "timeout": 10
                })),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success(), "{:?}", result.error);
        let output = result.output_str().unwrap();
        assert!(output.starts_with('\u{FFFD}'));
        assert!(output.contains("stdout truncated"));
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let (_dir, tool) = setup();
        let started = std::time::Instant::now();
        let result = tool
            .execute(
                &arguments(json!({"command": "sleep 10", "timeout": 1})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Command timed out after 1 seconds")
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_kills() {
        let (_dir, tool) = setup();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let result = tool
            .execute(&arguments(json!({"command": "sleep 10"})), cancel)
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Command cancelled"));
    }

    #[tokio::test]
    async fn test_allow_list() {
        let (dir, _) = setup();
        let tool = ExecuteCommandTool::new(Workspace::new(dir.path()).unwrap())
            .with_allowed_commands(vec!["echo".into()]);
        let result = tool
            .execute(&arguments(json!({"command": "rm -rf x"})), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Command 'rm' is not in the allowed list")
        );
        let ok = tool
            .execute(&arguments(json!({"command": "echo hi"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(ok.is_success());
    }

    #[tokio::test]
    async fn test_missing_cwd() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"command": "ls", "cwd": "nope"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(
            result
                .error
                .unwrap()
                .starts_with("Working directory does not exist:")
        );
    }

    #[tokio::test]
    async fn test_cwd_outside_rejected() {
        let (_dir, tool) = setup();
        let result = tool
            .execute(
                &arguments(json!({"command": "ls", "cwd": "../.."})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.error.unwrap().contains("outside workspace"));
    }
}
