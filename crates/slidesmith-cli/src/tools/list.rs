//! Directory listing tool

use async_trait::async_trait;
use glob::Pattern;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::sandbox::Workspace;

/// Tool for listing directories inside the workspace
pub struct ListFilesTool {
    workspace: Workspace,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

struct Listing {
    /// Paths relative to the listed directory, directories suffixed with `/`
    names: Vec<String>,
    files: usize,
    dirs: usize,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in one or more paths."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of directory paths to list (relative to workspace). Use ['.'] for root."
                },
                "path": {
                    "type": "string",
                    "description": "Single directory path (alternative to 'paths', default: '.')"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to list files recursively (default: false)"
                },
                "include_hidden": {
                    "type": "boolean",
                    "description": "Whether to include hidden files starting with '.' (default: false)"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern to filter files (e.g., '*.html')"
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
        let mut dirs = args::str_list(arguments, "paths", "path");
        if dirs.is_empty() {
            dirs.push(".".to_string());
        }
        let recursive = args::opt_bool(arguments, "recursive").unwrap_or(false);
        let include_hidden = args::opt_bool(arguments, "include_hidden").unwrap_or(false);
        let pattern = match args::opt_str(arguments, "pattern").map(Pattern::new).transpose() {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(format!("Invalid glob pattern: {}", e))),
        };

        let resolved = match self.workspace.resolve_all(dirs.iter().map(String::as_str)) {
            Ok(r) => r,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let multiple = dirs.len() > 1;
        let mut sections = Vec::with_capacity(dirs.len());
        let mut total_files = 0usize;
        let mut total_dirs = 0usize;

        for (shown, dir) in dirs.iter().zip(&resolved) {
            if !dir.exists() {
                sections.push(format!("[{}] Directory not found", shown));
                continue;
            }
            if !dir.is_dir() {
                sections.push(format!("[{}] Not a directory", shown));
                continue;
            }

            let listing = list_dir(dir, recursive, include_hidden, pattern.as_ref(), &cancel)?;
            if cancel.is_cancelled() {
                return Ok(ToolResult::failure("List cancelled"));
            }
            total_files += listing.files;
            total_dirs += listing.dirs;
            tracing::debug!(dir = %shown, entries = listing.names.len(), "listed directory");

            let section = match (multiple, listing.names.is_empty()) {
                (true, true) => format!("[{}] (empty)", shown),
                (true, false) => format!("[{}]\n{}", shown, listing.names.join("\n")),
                (false, true) => "(empty directory)".to_string(),
                (false, false) => listing.names.join("\n"),
            };
            sections.push(section);
        }

        Ok(ToolResult::success(sections.join("\n\n"))
            .with_meta("total_files", total_files)
            .with_meta("total_dirs", total_dirs)
            .with_meta("paths_count", dirs.len())
            .with_meta("recursive", recursive))
    }
}

fn list_dir(
    dir: &Path,
    recursive: bool,
    include_hidden: bool,
    pattern: Option<&Pattern>,
    cancel: &CancellationToken,
) -> std::io::Result<Listing> {
    let mut found = Vec::new();
    if recursive {
        collect_recursive(dir, dir, include_hidden, cancel, &mut found)?;
    } else {
        collect_flat(dir, include_hidden, &mut found)?;
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));

    let mut listing = Listing {
        names: Vec::with_capacity(found.len()),
        files: 0,
        dirs: 0,
    };
    for (relative, is_dir) in found {
        if let Some(pattern) = pattern {
            if !matches_pattern(pattern, &relative) {
                continue;
            }
        }
        let mut name = relative.to_string_lossy().into_owned();
        if is_dir {
            name.push('/');
            listing.dirs += 1;
        } else {
            listing.files += 1;
        }
        listing.names.push(name);
    }
    Ok(listing)
}

/// Patterns with a separator match the whole relative path, others the file name
fn matches_pattern(pattern: &Pattern, relative: &Path) -> bool {
    if pattern.as_str().contains('/') {
        return pattern.matches_path(relative);
    }
    relative
        .file_name()
        .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn collect_flat(
    dir: &Path,
    include_hidden: bool,
    found: &mut Vec<(PathBuf, bool)>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)?.flatten() {
        let name = entry.file_name();
        if !include_hidden && is_hidden(&name) {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        found.push((PathBuf::from(name), is_dir));
    }
    Ok(())
}

fn collect_recursive(
    base: &Path,
    dir: &Path,
    include_hidden: bool,
    cancel: &CancellationToken,
    found: &mut Vec<(PathBuf, bool)>,
) -> std::io::Result<()> {
    if cancel.is_cancelled() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)?.flatten() {
        let name = entry.file_name();
        if !include_hidden && is_hidden(&name) {
            continue;
        }

        let full_path = entry.path();
        let relative = full_path
            .strip_prefix(base)
            .unwrap_or(&full_path)
            .to_path_buf();
        // Symlinked directories are listed but not followed
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        found.push((relative, is_dir));

        if is_dir {
            collect_recursive(base, &full_path, include_hidden, cancel, found)?;
        }
    }
    Ok(())
}
