//! Tools the presentation agents can call

mod command;
mod image;
mod list;
mod read;
mod sandbox;
mod workflow;
mod write;

pub use command::ExecuteCommandTool;
pub use image::GenerateImageTool;
pub use list::ListFilesTool;
pub use read::ReadFileTool;
pub use sandbox::Workspace;
pub use workflow::{PhaseCompleteTool, TaskCompletedTool, UpdatePresentationPlanTool};
pub use write::WriteFileTool;

use slidesmith_agent::{BoxedTool, ToolRegistry};
use slidesmith_ai::ImageProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::phase::PhaseSignal;

/// File tools confined to one workspace, as handed to each slide designer
pub fn workspace_registry(workspace: &Workspace) -> ToolRegistry {
    let tools: [BoxedTool; 3] = [
        Arc::new(ReadFileTool::new(workspace.clone())),
        Arc::new(WriteFileTool::new(workspace.clone())),
        Arc::new(ListFilesTool::new(workspace.clone())),
    ];
    ToolRegistry::with_tools(tools)
}

/// Options for the interactive tool set
#[derive(Clone, Default)]
pub struct SessionTools {
    pub command_timeout: Option<Duration>,
    pub allowed_commands: Option<Vec<String>>,
    pub image_provider: Option<Arc<dyn ImageProvider>>,
    pub image_model: Option<String>,
    pub phase_notify: Option<mpsc::UnboundedSender<PhaseSignal>>,
}

/// Every tool, for the interactive collecting and planning agents
pub fn session_registry(workspace: &Workspace, options: SessionTools) -> ToolRegistry {
    let mut registry = workspace_registry(workspace);

    let mut command = ExecuteCommandTool::new(workspace.clone());
    if let Some(timeout) = options.command_timeout {
        command = command.with_timeout(timeout);
    }
    if let Some(allowed) = options.allowed_commands {
        command = command.with_allowed_commands(allowed);
    }
    registry.register(Arc::new(command));

    let mut image = GenerateImageTool::new(workspace.clone(), options.image_provider);
    if let Some(model) = options.image_model {
        image = image.with_model(model);
    }
    registry.register(Arc::new(image));

    registry.register(Arc::new(UpdatePresentationPlanTool::new(workspace.clone())));
    registry.register(Arc::new(TaskCompletedTool));
    registry.register(Arc::new(match options.phase_notify {
        Some(tx) => PhaseCompleteTool::with_notify(tx),
        None => PhaseCompleteTool::new(),
    }));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_registry_is_file_tools_only() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let registry = workspace_registry(&ws);
        assert_eq!(registry.names(), vec!["read_file", "write_file", "list_files"]);
    }

    #[test]
    fn test_session_registry_has_every_tool() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let registry = session_registry(&ws, SessionTools::default());
        for name in [
            "read_file",
            "write_file",
            "list_files",
            "execute_command",
            "generate_image",
            "update_presentation_plan",
            "task_completed",
            "phase_complete",
        ] {
            assert!(registry.has(name), "missing {}", name);
        }
    }
}
