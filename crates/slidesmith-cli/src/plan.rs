//! Presentation plan and generation manifest files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::Path;
use thiserror::Error;

use crate::generator::{SlideGenerationTask, SlideStatus};

pub const SLIDES_DIR: &str = "slides";
pub const PLAN_FILE: &str = "slides/presentation_plan.json";
pub const MANIFEST_FILE: &str = "slides/manifest.json";

const DEFAULT_TITLE: &str = "Untitled Presentation";
const DEFAULT_THEME: &str = "modern";

/// File name of the slide at a 0-based index
pub fn slide_file_name(index: usize) -> String {
    format!("slide_{}.html", index + 1)
}

/// Workspace-relative path of the slide at a 0-based index
pub fn slide_relative_path(index: usize) -> String {
    format!("{}/{}", SLIDES_DIR, slide_file_name(index))
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// One slide in the outline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideSpec {
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
}

impl SlideSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: Vec::new(),
            notes: None,
            layout: None,
        }
    }

    pub fn with_content(mut self, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.content = items.into_iter().map(Into::into).collect();
        self
    }

    /// Read a slide object leniently. `content` may be a string or a list,
    /// and `type` stands in for a missing `layout`.
    fn from_value(index: usize, value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let content = match value.get("content") {
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            title: text("title").unwrap_or_else(|| format!("Slide {}", index + 1)),
            content,
            notes: text("notes"),
            layout: text("layout").or_else(|| text("type")),
        }
    }
}

/// The slide outline a designer works from
#[derive(Debug, Clone, PartialEq)]
pub struct PresentationPlan {
    pub title: String,
    pub theme: String,
    pub metadata: Map<String, Value>,
    pub slides: Vec<SlideSpec>,
}

impl PresentationPlan {
    /// Accepts both the editor format (`metadata.title`) and the architect
    /// format (`title` and `theme` at the root)
    pub fn from_value(value: &Value) -> Result<Self, PlanError> {
        let root = value
            .as_object()
            .ok_or_else(|| PlanError::Invalid("plan must be a JSON object".into()))?;

        let (title, theme, metadata) = match root.get("metadata").and_then(Value::as_object) {
            Some(meta) => (
                meta.get("title").and_then(Value::as_str).unwrap_or("Untitled"),
                meta.get("theme").and_then(Value::as_str).unwrap_or(DEFAULT_THEME),
                meta.clone(),
            ),
            None => {
                let title = root.get("title").and_then(Value::as_str).unwrap_or(DEFAULT_TITLE);
                let theme = root.get("theme").and_then(Value::as_str).unwrap_or(DEFAULT_THEME);
                let mut meta = Map::new();
                meta.insert("title".into(), json!(title));
                meta.insert("theme".into(), json!(theme));
                (title, theme, meta)
            }
        };

        let slides = match root.get("slides") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, s)| SlideSpec::from_value(i, s))
                .collect(),
            Some(_) => return Err(PlanError::Invalid("'slides' must be an array".into())),
            None => Vec::new(),
        };

        Ok(Self {
            title: title.to_string(),
            theme: theme.to_string(),
            metadata,
            slides,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        Self::from_value(&serde_json::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    /// Editor-format JSON, as written by `update_presentation_plan`
    pub fn to_value(&self) -> Value {
        let mut metadata = self.metadata.clone();
        metadata.insert("title".into(), json!(self.title));
        metadata.insert("theme".into(), json!(self.theme));
        json!({
            "metadata": metadata,
            "slides": self.slides,
            "version": "1.0",
        })
    }
}

/// Per-slide line of the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub index: usize,
    pub title: String,
    pub status: SlideStatus,
    /// Set once the slide completed
    pub file: Option<String>,
}

/// Generation status snapshot written next to the slides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: DateTime<Utc>,
    pub total_slides: usize,
    pub slides: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_tasks(tasks: &[SlideGenerationTask]) -> Self {
        Self {
            generated_at: Utc::now(),
            total_slides: tasks.len(),
            slides: tasks
                .iter()
                .map(|t| ManifestEntry {
                    index: t.index,
                    title: t.data.title.clone(),
                    status: t.status,
                    file: (t.status == SlideStatus::Completed).then(|| slide_file_name(t.index)),
                })
                .collect(),
        }
    }

    pub async fn save(&self, workspace_root: &Path) -> Result<(), PlanError> {
        let path = workspace_root.join(MANIFEST_FILE);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    pub async fn load(workspace_root: &Path) -> Result<Self, PlanError> {
        let text = tokio::fs::read_to_string(workspace_root.join(MANIFEST_FILE)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn count(&self, status: SlideStatus) -> usize {
        self.slides.iter().filter(|s| s.status == status).count()
    }
}
