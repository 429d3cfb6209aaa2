//! Concurrent slide generation.
//!
//! Every slide gets its own designer [`Agent`] with a fresh file-tool registry
//! confined to the task workspace. A shared semaphore caps how many designers
//! run at once; each slide retries independently, and one slide failing never
//! affects the others. Whatever a designer leaves behind is checked and, if
//! necessary, replaced so every slide index ends with a renderable page.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slidesmith_agent::{Agent, AgentConfig, Language};
use slidesmith_ai::{LlmProvider, Model};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};

use crate::plan::{Manifest, SLIDES_DIR, SlideSpec, slide_relative_path};
use crate::prompts;
use crate::tools::{Workspace, workspace_registry};

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Invalid slide index: {index} (have {total} slides)")]
    InvalidIndex { index: usize, total: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why one designer attempt produced nothing usable
#[derive(Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Agent(#[from] slidesmith_agent::Error),

    #[error("Slide generation timed out after {0} seconds")]
    TimedOut(u64),

    /// The file is missing or still holds the placeholder
    #[error("Designer did not write the slide file")]
    NotWritten,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl std::fmt::Display for SlideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SlideStatus::Pending => "pending",
            SlideStatus::Generating => "generating",
            SlideStatus::Completed => "completed",
            SlideStatus::Failed => "failed",
        })
    }
}

/// Generation state of one slide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideGenerationTask {
    pub index: usize,
    pub data: SlideSpec,
    pub status: SlideStatus,
    #[serde(skip)]
    pub html_content: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SlideGenerationTask {
    pub fn new(index: usize, data: SlideSpec) -> Self {
        Self {
            index,
            data,
            status: SlideStatus::Pending,
            html_content: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Emitted on every status change of a slide
#[derive(Debug, Clone, PartialEq)]
pub struct SlideProgress {
    pub index: usize,
    pub total: usize,
    pub status: SlideStatus,
    pub attempt: u32,
}

/// Aggregate counts over all slides
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub generating: usize,
    pub pending: usize,
    pub percent: f64,
}

impl GenerationProgress {
    pub fn from_statuses(statuses: impl IntoIterator<Item = SlideStatus>) -> Self {
        let mut progress = Self {
            total: 0,
            completed: 0,
            failed: 0,
            generating: 0,
            pending: 0,
            percent: 0.0,
        };
        for status in statuses {
            progress.total += 1;
            match status {
                SlideStatus::Pending => progress.pending += 1,
                SlideStatus::Generating => progress.generating += 1,
                SlideStatus::Completed => progress.completed += 1,
                SlideStatus::Failed => progress.failed += 1,
            }
        }
        if progress.total > 0 {
            progress.percent = progress.completed as f64 / progress.total as f64 * 100.0;
        }
        progress
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Designers allowed to run at the same time
    pub max_concurrent: usize,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Wall-clock limit for one designer attempt
    pub attempt_timeout: Option<Duration>,
    pub max_tool_rounds: u32,
    pub model: Model,
    pub language: Language,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            attempt_timeout: None,
            max_tool_rounds: 10,
            model: Model::default(),
            language: Language::default(),
        }
    }
}

/// What the designer left in the slide file, after checking
#[derive(Debug, Clone, PartialEq)]
pub enum SlideHtml {
    /// A full HTML document, kept as written
    Document(String),
    /// A bare fragment, wrapped into a document
    Wrapped(String),
    /// Nothing usable; an error page stands in
    ErrorPage { html: String, reason: String },
}

impl SlideHtml {
    pub fn html(&self) -> &str {
        match self {
            SlideHtml::Document(html) | SlideHtml::Wrapped(html) => html,
            SlideHtml::ErrorPage { html, .. } => html,
        }
    }
}

/// Classify slide file contents, producing a renderable page either way
pub fn check_slide_html(content: &str, index: usize, title: &str) -> SlideHtml {
    let head: String = content.trim_start().chars().take(16).collect();
    let head = head.to_ascii_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") {
        return SlideHtml::Document(content.to_string());
    }
    if content.contains("<div") && content.contains("class=") {
        return SlideHtml::Wrapped(prompts::wrap_fragment(content, title));
    }

    let reason = "File contains invalid HTML content".to_string();
    SlideHtml::ErrorPage {
        html: prompts::error_page(index, title, &reason),
        reason,
    }
}

/// Runs designer agents over a slide outline
pub struct SlideGenerator {
    workspace: Workspace,
    designer_prompt: String,
    config: GeneratorConfig,
    llm: Arc<dyn LlmProvider>,
    semaphore: Arc<Semaphore>,
    tasks: Mutex<Vec<SlideGenerationTask>>,
    manifest_lock: tokio::sync::Mutex<()>,
    progress_tx: Option<mpsc::UnboundedSender<SlideProgress>>,
}

impl SlideGenerator {
    pub fn new(
        workspace: Workspace,
        designer_prompt: impl Into<String>,
        config: GeneratorConfig,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            workspace,
            designer_prompt: designer_prompt.into(),
            config,
            llm,
            semaphore: Arc::new(Semaphore::new(permits)),
            tasks: Mutex::new(Vec::new()),
            manifest_lock: tokio::sync::Mutex::new(()),
            progress_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<SlideProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Snapshot of every task
    pub fn tasks(&self) -> Vec<SlideGenerationTask> {
        self.tasks.lock().clone()
    }

    pub fn progress(&self) -> GenerationProgress {
        GenerationProgress::from_statuses(self.tasks.lock().iter().map(|t| t.status))
    }

    /// Seed tasks from an outline and, if present, an earlier manifest, so a
    /// single slide can be regenerated in a fresh process
    pub fn restore(&self, slides: Vec<SlideSpec>, manifest: Option<&Manifest>) {
        let tasks = slides
            .into_iter()
            .enumerate()
            .map(|(index, data)| {
                let mut task = SlideGenerationTask::new(index, data);
                if let Some(entry) = manifest.and_then(|m| m.slides.iter().find(|e| e.index == index)) {
                    task.status = entry.status;
                }
                task
            })
            .collect();
        *self.tasks.lock() = tasks;
    }

    /// Generate every slide of the outline concurrently
    pub async fn generate_all(
        &self,
        slides: Vec<SlideSpec>,
        design_context: Option<&str>,
    ) -> Result<Vec<SlideGenerationTask>, GeneratorError> {
        let total = slides.len();
        tracing::info!(total, max_concurrent = self.config.max_concurrent, "generating slides");

        let slides_dir = self.workspace.root().join(SLIDES_DIR);
        tokio::fs::create_dir_all(&slides_dir).await?;
        for (index, slide) in slides.iter().enumerate() {
            let path = self.workspace.root().join(slide_relative_path(index));
            tokio::fs::write(&path, prompts::slide_template(index, &slide.title, total)).await?;
        }

        *self.tasks.lock() = slides
            .into_iter()
            .enumerate()
            .map(|(index, data)| SlideGenerationTask::new(index, data))
            .collect();
        self.save_manifest().await;

        join_all((0..total).map(|index| self.run_slide(index, design_context))).await;

        self.save_manifest().await;
        let progress = self.progress();
        tracing::info!(
            completed = progress.completed,
            failed = progress.failed,
            "slide generation finished"
        );
        Ok(self.tasks())
    }

    /// Reset one slide to pending and generate it again
    pub async fn regenerate_slide(
        &self,
        index: usize,
        design_context: Option<&str>,
    ) -> Result<SlideGenerationTask, GeneratorError> {
        {
            let mut tasks = self.tasks.lock();
            let total = tasks.len();
            let task = tasks
                .get_mut(index)
                .ok_or(GeneratorError::InvalidIndex { index, total })?;
            task.status = SlideStatus::Pending;
            task.error = None;
            task.attempts = 0;
        }

        self.run_slide(index, design_context).await;
        self.save_manifest().await;

        self.tasks
            .lock()
            .get(index)
            .cloned()
            .ok_or(GeneratorError::InvalidIndex { index, total: 0 })
    }

    /// All attempts for one slide, holding a permit throughout
    async fn run_slide(&self, index: usize, design_context: Option<&str>) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };
        let Some(slide) = self.tasks.lock().get(index).map(|t| t.data.clone()) else {
            return;
        };

        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            self.update(index, |t| {
                t.status = SlideStatus::Generating;
                t.attempts = attempt;
                t.started_at = Some(Utc::now());
            });
            self.report(index, SlideStatus::Generating, attempt).await;

            match self.attempt(index, &slide, design_context).await {
                Ok(outcome) => {
                    let error = match &outcome {
                        SlideHtml::ErrorPage { reason, .. } => {
                            tracing::warn!(index, "slide {} has no usable HTML: {}", index + 1, reason);
                            Some(reason.clone())
                        }
                        _ => None,
                    };
                    self.update(index, |t| {
                        t.status = SlideStatus::Completed;
                        t.html_content = Some(outcome.html().to_string());
                        t.error = error;
                        t.completed_at = Some(Utc::now());
                    });
                    self.report(index, SlideStatus::Completed, attempt).await;
                    return;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.update(index, |t| t.error = Some(message.clone()));
                    if attempt < attempts {
                        tracing::warn!(index, attempt, "slide {} attempt failed, retrying: {}", index + 1, message);
                        tokio::time::sleep(self.config.retry_delay).await;
                    } else {
                        tracing::warn!(index, attempt, "slide {} failed: {}", index + 1, message);
                        let page = prompts::error_page(index, &slide.title, &message);
                        let path = self.workspace.root().join(slide_relative_path(index));
                        if let Err(e) = tokio::fs::write(&path, &page).await {
                            tracing::warn!(index, "failed to write error page: {}", e);
                        }
                        self.update(index, |t| {
                            t.status = SlideStatus::Failed;
                            t.html_content = Some(page);
                            t.completed_at = Some(Utc::now());
                        });
                        self.report(index, SlideStatus::Failed, attempt).await;
                    }
                }
            }
        }
    }

    /// One designer run, then a check of what it wrote
    async fn attempt(
        &self,
        index: usize,
        slide: &SlideSpec,
        design_context: Option<&str>,
    ) -> Result<SlideHtml, AttemptError> {
        let registry = Arc::new(workspace_registry(&self.workspace));
        let config = AgentConfig {
            system_prompt: self.designer_prompt.clone(),
            model: self.config.model.clone(),
            max_tool_rounds: self.config.max_tool_rounds,
            language: self.config.language,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(config, registry, self.llm.clone());
        let message = prompts::slide_prompt(index, slide, design_context, self.config.language);

        let run = agent.chat(&message);
        match self.config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(reply) => reply?,
                Err(_) => return Err(AttemptError::TimedOut(limit.as_secs())),
            },
            None => run.await?,
        };

        let path = self.workspace.root().join(slide_relative_path(index));
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AttemptError::NotWritten),
            Err(e) => return Err(e.into()),
        };
        let total = self.tasks.lock().len();
        if content == prompts::slide_template(index, &slide.title, total) {
            return Err(AttemptError::NotWritten);
        }

        let checked = check_slide_html(&content, index, &slide.title);
        if !matches!(checked, SlideHtml::Document(_)) {
            tokio::fs::write(&path, checked.html()).await?;
        }
        Ok(checked)
    }

    fn update(&self, index: usize, f: impl FnOnce(&mut SlideGenerationTask)) {
        if let Some(task) = self.tasks.lock().get_mut(index) {
            f(task);
        }
    }

    async fn report(&self, index: usize, status: SlideStatus, attempt: u32) {
        let total = self.tasks.lock().len();
        tracing::info!(index, status = %status, attempt, "slide {}/{}", index + 1, total);
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(SlideProgress {
                index,
                total,
                status,
                attempt,
            });
        }
        self.save_manifest().await;
    }

    /// Rewrite the manifest from the current task list; writers take turns
    async fn save_manifest(&self) {
        let _guard = self.manifest_lock.lock().await;
        let manifest = Manifest::from_tasks(&self.tasks.lock());
        if let Err(e) = manifest.save(self.workspace.root()).await {
            tracing::warn!("failed to write manifest: {}", e);
        }
    }
}
