//! slidesmith - agent-driven HTML presentation generator

mod commands;
mod config;
mod generator;
mod phase;
mod plan;
mod prompts;
mod tools;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Map;
use slidesmith_agent::{Agent, AgentConfig};
use slidesmith_ai::providers::openai::OpenAIProvider;
use slidesmith_ai::{ImageProvider, LlmProvider, Model};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandResult;
use crate::config::Config;
use crate::generator::{
    GenerationProgress, GeneratorConfig, SlideGenerationTask, SlideGenerator, SlideProgress,
    SlideStatus,
};
use crate::phase::{Phase, PhaseManager};
use crate::plan::{Manifest, PLAN_FILE, PresentationPlan};
use crate::prompts::Prompts;
use crate::tools::{SessionTools, Workspace, session_registry};

const HISTORY_FILE: &str = ".slidesmith/conversation.json";

/// slidesmith - agent-driven HTML presentation generator
#[derive(Parser, Debug)]
#[command(name = "slidesmith")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Task workspace (default: a new one under the configured workspace base)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Talk to the agent: collect material, plan, then generate slides
    Chat {
        /// Run a single message and exit
        #[arg(short = 'c', long)]
        message: Option<String>,
    },
    /// Design every slide of a plan
    Generate {
        /// Plan file (default: the workspace's saved plan)
        #[arg(long)]
        plan: Option<PathBuf>,
        /// Design notes passed to every designer
        #[arg(long)]
        context: Option<String>,
    },
    /// Design one slide again
    Regenerate {
        /// Slide number, starting at 1
        number: usize,
        #[arg(long)]
        context: Option<String>,
    },
    /// Show slide generation progress of a workspace
    Status,
    /// Write an example config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("slidesmith=debug,slidesmith_agent=debug,slidesmith_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::InitConfig = args.command {
        let path = Config::init().context("Failed to create config file")?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let cfg = Config::load();
    let prompts = Prompts::new(cfg.prompts_dir.clone());

    match args.command {
        Command::Chat { message } => {
            let ws = open_workspace(args.workspace.as_deref(), &cfg, true)?;
            run_chat(&cfg, &prompts, ws, message).await
        }
        Command::Generate { plan, context } => {
            let ws = open_workspace(args.workspace.as_deref(), &cfg, true)?;
            let plan_path = plan.unwrap_or_else(|| ws.root().join(PLAN_FILE));
            let plan = PresentationPlan::load(&plan_path)
                .await
                .with_context(|| format!("Failed to load plan {}", plan_path.display()))?;
            let llm = chat_provider(&cfg)?;
            let tasks = generate_slides(&cfg, &prompts, &ws, llm, &plan, context).await?;
            if tasks.iter().any(|t| t.status == SlideStatus::Failed) {
                bail!("Some slides failed; retry them with `slidesmith regenerate <n>`");
            }
            Ok(())
        }
        Command::Regenerate { number, context } => {
            let ws = open_workspace(args.workspace.as_deref(), &cfg, false)?;
            if number == 0 {
                bail!("Slide numbers start at 1");
            }
            let llm = chat_provider(&cfg)?;
            let task = regenerate_slide(&cfg, &prompts, &ws, llm, number - 1, context).await?;
            if task.status == SlideStatus::Failed {
                bail!(
                    "Slide {} failed: {}",
                    number,
                    task.error.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Status => {
            let ws = open_workspace(args.workspace.as_deref(), &cfg, false)?;
            print_status(&ws).await
        }
        Command::InitConfig => Ok(()),
    }
}

/// Use the given workspace, or create `<base>/task_<uuid>/workspace`
fn open_workspace(explicit: Option<&Path>, cfg: &Config, create: bool) -> anyhow::Result<Workspace> {
    let root = match explicit {
        Some(path) => path.to_path_buf(),
        None if create => cfg
            .workspace_base
            .join(format!("task_{}", uuid::Uuid::new_v4().simple()))
            .join("workspace"),
        None => bail!("This command needs an existing workspace; pass --workspace <dir>"),
    };
    let ws = Workspace::new(&root)
        .with_context(|| format!("Failed to open workspace {}", root.display()))?;
    eprintln!("Workspace: {}", ws.root().display());
    Ok(ws)
}

fn chat_provider(cfg: &Config) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let Some(key) = cfg.api_key.as_deref() else {
        bail!("No API key found. Set OPENAI_API_KEY or add api_key via `slidesmith init-config`");
    };
    Ok(Arc::new(
        OpenAIProvider::with_base_url(key, cfg.api_base.as_str()).with_timeout(cfg.request_timeout()),
    ))
}

fn image_provider(cfg: &Config) -> Option<Arc<dyn ImageProvider>> {
    let key = cfg.image_api_key()?;
    Some(Arc::new(
        OpenAIProvider::with_base_url(key, cfg.image_api_base()).with_timeout(cfg.request_timeout()),
    ))
}

fn model_for_phase(cfg: &Config, phase: Phase) -> Model {
    match phase {
        Phase::Architect | Phase::EditingPlan => Model::new(cfg.architect_model()),
        Phase::Designing => Model::new(cfg.designer_model()),
        Phase::Collecting | Phase::Completed => Model::new(cfg.model.as_str()),
    }
}

fn slide_generator(
    cfg: &Config,
    prompts: &Prompts,
    ws: &Workspace,
    llm: Arc<dyn LlmProvider>,
) -> (SlideGenerator, mpsc::UnboundedReceiver<SlideProgress>) {
    let config = GeneratorConfig {
        max_concurrent: cfg.max_concurrent_slides,
        max_retries: cfg.slide_retries,
        attempt_timeout: cfg.slide_timeout(),
        max_tool_rounds: cfg.max_tool_rounds,
        model: Model::new(cfg.designer_model()),
        language: cfg.language,
        ..GeneratorConfig::default()
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let generator = SlideGenerator::new(ws.clone(), prompts.designer(), config, llm).with_progress(tx);
    (generator, rx)
}

fn print_progress(mut rx: mpsc::UnboundedReceiver<SlideProgress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            match p.status {
                SlideStatus::Generating if p.attempt > 1 => {
                    eprintln!("[{}/{}] retrying (attempt {})", p.index + 1, p.total, p.attempt)
                }
                status => eprintln!("[{}/{}] {}", p.index + 1, p.total, status),
            }
        }
    })
}

/// Plan-level notes plus whatever the user asked for
fn design_context(plan: &PresentationPlan, notes: Option<String>) -> Option<String> {
    let base = format!("Presentation: {}. Theme: {}.", plan.title, plan.theme);
    Some(match notes {
        Some(notes) => format!("{} {}", base, notes),
        None => base,
    })
}

async fn generate_slides(
    cfg: &Config,
    prompts: &Prompts,
    ws: &Workspace,
    llm: Arc<dyn LlmProvider>,
    plan: &PresentationPlan,
    notes: Option<String>,
) -> anyhow::Result<Vec<SlideGenerationTask>> {
    if plan.slides.is_empty() {
        bail!("The plan has no slides");
    }
    println!("Generating {} slides for \"{}\"", plan.slides.len(), plan.title);

    let (generator, rx) = slide_generator(cfg, prompts, ws, llm);
    let printer = print_progress(rx);
    let context = design_context(plan, notes);
    let tasks = generator.generate_all(plan.slides.clone(), context.as_deref()).await?;
    drop(generator);
    let _ = printer.await;

    let progress = GenerationProgress::from_statuses(tasks.iter().map(|t| t.status));
    println!(
        "Done: {} completed, {} failed ({:.0}%)",
        progress.completed, progress.failed, progress.percent
    );
    for task in tasks.iter().filter(|t| t.status == SlideStatus::Failed) {
        println!(
            "  slide {} failed: {}",
            task.index + 1,
            task.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(tasks)
}

async fn regenerate_slide(
    cfg: &Config,
    prompts: &Prompts,
    ws: &Workspace,
    llm: Arc<dyn LlmProvider>,
    index: usize,
    notes: Option<String>,
) -> anyhow::Result<SlideGenerationTask> {
    let plan = PresentationPlan::load(ws.root().join(PLAN_FILE))
        .await
        .context("Failed to load the workspace's presentation plan")?;
    let manifest = Manifest::load(ws.root()).await.ok();

    let (generator, rx) = slide_generator(cfg, prompts, ws, llm);
    let printer = print_progress(rx);
    let context = design_context(&plan, notes);
    generator.restore(plan.slides.clone(), manifest.as_ref());
    let task = generator.regenerate_slide(index, context.as_deref()).await?;
    drop(generator);
    let _ = printer.await;

    println!("Slide {}: {}", index + 1, task.status);
    Ok(task)
}

async fn print_status(ws: &Workspace) -> anyhow::Result<()> {
    if let Some(phases) = PhaseManager::load(ws.root()) {
        println!("Phase: {}", phases.current());
    }
    let manifest = Manifest::load(ws.root())
        .await
        .context("No manifest found; run `slidesmith generate` first")?;
    let progress = GenerationProgress::from_statuses(manifest.slides.iter().map(|e| e.status));
    println!(
        "Slides: {} total, {} completed, {} failed, {} generating, {} pending ({:.0}%)",
        progress.total,
        progress.completed,
        progress.failed,
        progress.generating,
        progress.pending,
        progress.percent
    );
    println!("Updated: {}", manifest.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    for entry in &manifest.slides {
        println!(
            "  {:>3}. [{:<10}] {}{}",
            entry.index + 1,
            entry.status.to_string(),
            entry.title,
            entry
                .file
                .as_deref()
                .map(|f| format!("  ({})", f))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Interactive session with phase tracking
async fn run_chat(
    cfg: &Config,
    prompts: &Prompts,
    ws: Workspace,
    message: Option<String>,
) -> anyhow::Result<()> {
    let llm = chat_provider(cfg)?;
    let mut phases = PhaseManager::load(ws.root()).unwrap_or_default();

    let (phase_tx, mut phase_rx) = mpsc::unbounded_channel();
    let tools = SessionTools {
        command_timeout: Some(cfg.command_timeout()),
        allowed_commands: cfg.allowed_commands.clone(),
        image_provider: image_provider(cfg),
        image_model: Some(cfg.image_model.clone()),
        phase_notify: Some(phase_tx),
    };
    let registry = Arc::new(session_registry(&ws, tools));

    let config = AgentConfig {
        system_prompt: prompts.for_phase(phases.current()),
        model: model_for_phase(cfg, phases.current()),
        max_tool_rounds: cfg.max_tool_rounds,
        language: cfg.language,
        ..AgentConfig::default()
    };
    let mut agent = Agent::new(config, registry, llm.clone());

    // Ctrl-C aborts a running turn; when idle it exits
    let handle = agent.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handle.is_running() {
                handle.abort();
            } else {
                std::process::exit(130);
            }
        }
    });

    if let Some(message) = message {
        chat_turn(&mut agent, message.trim(), cfg.max_tool_rounds).await?;
        apply_phase_signals(cfg, prompts, &mut agent, &mut phases, &mut phase_rx);
        save_session(&agent, &phases, &ws);
        return Ok(());
    }

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("slidesmith ({}) phase: {}", agent.config().model.id, phases.current());
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = tokio::io::AsyncBufReadExt::lines(stdin);
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(input) = lines.next_line().await? else {
            break;
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(result) = commands::execute_command(input, &phases) {
            match result {
                CommandResult::Clear => {
                    agent.clear_history(true);
                    println!("Cleared conversation.");
                }
                CommandResult::Exit => break,
                CommandResult::Message(msg) => println!("{}", msg),
                CommandResult::Unknown(cmd) => {
                    println!("Unknown command: /{}", cmd);
                    println!("Type /help for available commands.");
                }
                CommandResult::Status => {
                    if let Err(e) = print_status(&ws).await {
                        println!("{:#}", e);
                    }
                }
                CommandResult::Generate { design_context } => {
                    if let Err(e) =
                        generate_in_session(cfg, prompts, &ws, llm.clone(), &mut phases, design_context).await
                    {
                        println!("Generation failed: {:#}", e);
                    }
                    switch_role(cfg, prompts, &mut agent, phases.current());
                }
                CommandResult::Regenerate {
                    index,
                    design_context,
                } => {
                    if let Err(e) =
                        regenerate_slide(cfg, prompts, &ws, llm.clone(), index, design_context).await
                    {
                        println!("Regeneration failed: {:#}", e);
                    }
                }
            }
            save_session(&agent, &phases, &ws);
            continue;
        }

        chat_turn(&mut agent, input, cfg.max_tool_rounds).await?;
        apply_phase_signals(cfg, prompts, &mut agent, &mut phases, &mut phase_rx);
        save_session(&agent, &phases, &ws);
    }

    Ok(())
}

/// Stream one reply to stdout; a failed turn is reported, not fatal
async fn chat_turn(agent: &mut Agent, input: &str, max_rounds: u32) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let stream = agent.chat_stream(input, max_rounds);
    futures::pin_mut!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            Err(e) => {
                eprintln!("\nError: {}", e);
                break;
            }
        }
    }
    println!();
    Ok(())
}

/// Drain `phase_complete` notifications, moving the agent into its next role
fn apply_phase_signals(
    cfg: &Config,
    prompts: &Prompts,
    agent: &mut Agent,
    phases: &mut PhaseManager,
    rx: &mut mpsc::UnboundedReceiver<phase::PhaseSignal>,
) {
    while let Ok(signal) = rx.try_recv() {
        if let Some(phase) = phases.apply_signal(&signal) {
            println!("[phase: {}]", phase);
            if phase == Phase::EditingPlan {
                println!("Review the plan in {}, then run /generate.", PLAN_FILE);
            }
            switch_role(cfg, prompts, agent, phase);
        }
    }
}

fn switch_role(cfg: &Config, prompts: &Prompts, agent: &mut Agent, phase: Phase) {
    agent.update_system_prompt(prompts.for_phase(phase));
    agent.set_model(model_for_phase(cfg, phase));
}

async fn generate_in_session(
    cfg: &Config,
    prompts: &Prompts,
    ws: &Workspace,
    llm: Arc<dyn LlmProvider>,
    phases: &mut PhaseManager,
    notes: Option<String>,
) -> anyhow::Result<()> {
    let plan = PresentationPlan::load(ws.root().join(PLAN_FILE))
        .await
        .context("No presentation plan saved yet")?;

    if phases.current() != Phase::Designing {
        if let Err(e) = phases.transition_to(Phase::Designing, Map::new()) {
            tracing::warn!("{}; starting generation anyway", e);
            phases.force_transition(Phase::Designing, Map::new());
        }
    }

    let tasks = generate_slides(cfg, prompts, ws, llm, &plan, notes).await?;
    if tasks.iter().all(|t| t.status == SlideStatus::Completed) {
        phases.transition_to(Phase::Completed, Map::new())?;
        println!("[phase: {}]", phases.current());
    }
    Ok(())
}

fn save_session(agent: &Agent, phases: &PhaseManager, ws: &Workspace) {
    if let Err(e) = phases.save(ws.root()) {
        tracing::warn!("failed to save phase state: {}", e);
    }
    let history = match agent.history_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("failed to serialize conversation: {}", e);
            return;
        }
    };
    if let Err(e) = std::fs::write(ws.root().join(HISTORY_FILE), history) {
        tracing::warn!("failed to save conversation: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let args = Args::try_parse_from(["slidesmith", "regenerate", "3", "-w", "/tmp/ws"]).unwrap();
        assert_eq!(args.workspace.as_deref(), Some(Path::new("/tmp/ws")));
        assert!(matches!(args.command, Command::Regenerate { number: 3, context: None }));

        let args = Args::try_parse_from(["slidesmith", "generate", "--plan", "p.json"]).unwrap();
        assert!(matches!(args.command, Command::Generate { plan: Some(_), .. }));
    }

    #[test]
    fn test_new_workspace_layout() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            workspace_base: dir.path().to_path_buf(),
            ..Config::default()
        };
        let ws = open_workspace(None, &cfg, true).unwrap();
        assert!(ws.root().ends_with("workspace"));
        let task_dir = ws.root().parent().unwrap();
        assert!(task_dir.file_name().unwrap().to_string_lossy().starts_with("task_"));

        assert!(open_workspace(None, &cfg, false).is_err());
    }

    #[test]
    fn test_design_context_includes_theme() {
        let plan = PresentationPlan::from_json(r#"{"title": "Q3", "theme": "dark", "slides": []}"#).unwrap();
        assert_eq!(
            design_context(&plan, Some("orange accents".into())).as_deref(),
            Some("Presentation: Q3. Theme: dark. orange accents")
        );
    }

    #[test]
    fn test_model_for_phase() {
        let cfg = Config {
            designer_model: Some("designer".into()),
            ..Config::default()
        };
        assert_eq!(model_for_phase(&cfg, Phase::Designing).id, "designer");
        assert_eq!(model_for_phase(&cfg, Phase::Architect).id, cfg.model);
    }
}
