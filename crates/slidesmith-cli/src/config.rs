//! Configuration file support

use serde::{Deserialize, Serialize};
use slidesmith_agent::Language;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for slidesmith
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat endpoint key; `OPENAI_API_KEY` wins when set
    pub api_key: Option<String>,
    pub api_base: String,
    /// Model for the collecting agent and anything without its own setting
    pub model: String,
    pub architect_model: Option<String>,
    pub designer_model: Option<String>,
    /// Image endpoint, defaulting to the chat endpoint's key and base
    pub image_api_key: Option<String>,
    pub image_api_base: Option<String>,
    pub image_model: String,
    /// Parent directory of task workspaces
    pub workspace_base: PathBuf,
    pub max_concurrent_slides: usize,
    pub slide_retries: u32,
    /// Per-attempt limit for one slide designer, in seconds
    pub slide_timeout: Option<u64>,
    pub command_timeout: u64,
    pub request_timeout: u64,
    pub allowed_commands: Option<Vec<String>>,
    pub language: Language,
    pub max_tool_rounds: u32,
    /// Directory with `collector`, `architect` and `designer` prompt overrides
    pub prompts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            architect_model: None,
            designer_model: None,
            image_api_key: None,
            image_api_base: None,
            image_model: "dall-e-3".to_string(),
            workspace_base: PathBuf::from("./tasks"),
            max_concurrent_slides: 3,
            slide_retries: 2,
            slide_timeout: Some(120),
            command_timeout: 120,
            request_timeout: 120,
            allowed_commands: None,
            language: Language::default(),
            max_tool_rounds: 10,
            prompts_dir: None,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slidesmith")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("SLIDESMITH_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_file(&Self::config_path());
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    fn load_file(path: &std::path::Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(base) = var("OPENAI_API_BASE").filter(|v| !v.is_empty()) {
            self.api_base = base;
        }
        if let Some(model) = var("SLIDESMITH_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
    }

    /// Write an example config file if none exists
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn architect_model(&self) -> &str {
        self.architect_model.as_deref().unwrap_or(&self.model)
    }

    pub fn designer_model(&self) -> &str {
        self.designer_model.as_deref().unwrap_or(&self.model)
    }

    pub fn image_api_key(&self) -> Option<&str> {
        self.image_api_key.as_deref().or(self.api_key.as_deref())
    }

    pub fn image_api_base(&self) -> &str {
        self.image_api_base.as_deref().unwrap_or(&self.api_base)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn slide_timeout(&self) -> Option<Duration> {
        self.slide_timeout.filter(|s| *s > 0).map(Duration::from_secs)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# slidesmith configuration file
# Place at ~/.config/slidesmith/config.toml (Linux) or set SLIDESMITH_CONFIG_PATH

# OpenAI-compatible chat endpoint. OPENAI_API_KEY and OPENAI_API_BASE override these.
# api_key = "sk-..."
api_base = "https://api.openai.com/v1"

# Model used by every agent unless overridden (SLIDESMITH_MODEL overrides)
model = "gpt-4o"
# architect_model = "gpt-4o"
# designer_model = "gpt-4o"

# Image generation; key and base default to the chat endpoint
# image_api_key = "sk-..."
# image_api_base = "https://api.openai.com/v1"
image_model = "dall-e-3"

# Task workspaces are created under this directory
workspace_base = "./tasks"

# Slide generation
max_concurrent_slides = 3
slide_retries = 2
slide_timeout = 120

# Tool and request limits, in seconds
command_timeout = 120
request_timeout = 120
# allowed_commands = ["ls", "cat", "python3"]

# Language of the agent's feedback messages (zh, en)
language = "zh"
max_tool_rounds = 10

# Directory with collector / architect / designer prompt overrides
# prompts_dir = "~/.config/slidesmith/prompts"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            model = "gpt-4o-mini"
            designer_model = "gpt-4.1"
            language = "en"
            max_concurrent_slides = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.architect_model(), "gpt-4o-mini");
        assert_eq!(config.designer_model(), "gpt-4.1");
        assert_eq!(config.language, Language::En);
        assert_eq!(config.max_concurrent_slides, 5);
        assert_eq!(config.slide_retries, 2);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_API_BASE", "http://localhost:8080/v1"),
            ("SLIDESMITH_MODEL", ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::parse(r#"api_key = "sk-file""#).unwrap();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.api_base, "http://localhost:8080/v1");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.image_api_key(), Some("sk-env"));
        assert_eq!(config.image_api_base(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_bad_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_tool_rounds = \"many\"").unwrap();
        assert_eq!(Config::load_file(&path), Config::default());
        assert_eq!(Config::load_file(&dir.path().join("missing.toml")), Config::default());
    }

    #[test]
    fn test_zero_slide_timeout_disables_limit() {
        let config = Config::parse("slide_timeout = 0").unwrap();
        assert_eq!(config.slide_timeout(), None);
        assert_eq!(Config::default().slide_timeout(), Some(Duration::from_secs(120)));
    }
}
