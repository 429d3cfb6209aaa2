//! Slash commands for interactive mode

use crate::phase::PhaseManager;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Clear the conversation
    Clear,
    /// Show a message to the user (not sent to agent)
    Message(String),
    /// Design every slide of the saved plan
    Generate { design_context: Option<String> },
    /// Design one slide again (0-based)
    Regenerate {
        index: usize,
        design_context: Option<String>,
    },
    /// Print slide generation progress
    Status,
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, phases: &PhaseManager) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");
    let context = (!args.is_empty()).then(|| args.to_string());

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "clear" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "phase" | "p" => CommandResult::Message(phase_message(phases)),

        "generate" | "g" => CommandResult::Generate {
            design_context: context,
        },

        "regenerate" | "r" => {
            let mut words = args.splitn(2, ' ');
            match words.next().and_then(|n| n.parse::<usize>().ok()) {
                Some(number) if number > 0 => CommandResult::Regenerate {
                    index: number - 1,
                    design_context: words
                        .next()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                },
                _ => CommandResult::Message("Usage: /regenerate <slide number> [design notes]".into()),
            }
        }

        "status" | "s" => CommandResult::Status,

        _ => CommandResult::Unknown(command),
    })
}

fn phase_message(phases: &PhaseManager) -> String {
    let next = phases
        .valid_transitions()
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Phase: {} (for {}s)\nCan move to: {}",
        phases.current(),
        phases.time_in_phase().num_seconds(),
        next
    )
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?             Show this help message
  /phase, /p                Show the current workflow phase
  /generate, /g [notes]     Design every slide of the saved plan
  /regenerate, /r <n> [notes]
                            Design slide n again
  /status, /s               Show slide generation progress
  /clear, /c                Clear conversation history
  /quit, /exit, /q          Exit slidesmith

Examples:
  /generate dark theme, orange accents
  /regenerate 3 use a bar chart instead"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(execute_command("make me a deck", &PhaseManager::default()), None);
    }

    #[test]
    fn test_generate_with_notes() {
        let pm = PhaseManager::default();
        assert_eq!(
            execute_command("/generate  warm colours ", &pm),
            Some(CommandResult::Generate {
                design_context: Some("warm colours".into())
            })
        );
        assert_eq!(
            execute_command("/g", &pm),
            Some(CommandResult::Generate { design_context: None })
        );
    }

    #[test]
    fn test_regenerate_is_one_based() {
        let pm = PhaseManager::default();
        assert_eq!(
            execute_command("/regenerate 2 bigger title", &pm),
            Some(CommandResult::Regenerate {
                index: 1,
                design_context: Some("bigger title".into())
            })
        );
        assert!(matches!(
            execute_command("/regenerate 0", &pm),
            Some(CommandResult::Message(_))
        ));
        assert!(matches!(
            execute_command("/r x", &pm),
            Some(CommandResult::Message(_))
        ));
    }

    #[test]
    fn test_phase_and_unknown() {
        let pm = PhaseManager::default();
        match execute_command("/phase", &pm) {
            Some(CommandResult::Message(text)) => {
                assert!(text.starts_with("Phase: collecting"));
                assert!(text.contains("architect, editing_plan"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            execute_command("/Bogus", &pm),
            Some(CommandResult::Unknown("bogus".into()))
        );
    }
}
