//! Image generation tool

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use slidesmith_agent::tool::{Tool, ToolArguments, ToolError, ToolResult, args};
use slidesmith_ai::{Error as AiError, ImageProvider, ImageRequest};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::sandbox::Workspace;

pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const VALID_SIZES: [&str; 3] = ["1024x1024", "1024x1792", "1792x1024"];

/// Tool for generating an image from a prompt and saving it in the workspace
pub struct GenerateImageTool {
    workspace: Workspace,
    provider: Option<Arc<dyn ImageProvider>>,
    model: String,
}

impl GenerateImageTool {
    /// A tool without a provider answers every call with a configuration error
    pub fn new(workspace: Workspace, provider: Option<Arc<dyn ImageProvider>>) -> Self {
        Self {
            workspace,
            provider,
            model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image based on a text prompt and save it to a file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the image to generate"
                },
                "output_path": {
                    "type": "string",
                    "description": "Path to save the generated image"
                },
                "size": {
                    "type": "string",
                    "description": "Image size (1024x1024, 1024x1792, 1792x1024)"
                },
                "quality": {
                    "type": "string",
                    "description": "Image quality (standard or hd)"
                },
                "style": {
                    "type": "string",
                    "description": "Image style (vivid or natural)"
                }
            },
            "required": ["prompt", "output_path"]
        })
    }

    async fn execute(
        &self,
        arguments: &ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let Some(provider) = &self.provider else {
            return Ok(ToolResult::failure("Image API key not configured"));
        };
        let prompt = match args::str(arguments, "prompt") {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        let output_path = match args::str(arguments, "output_path") {
            Ok(p) => p,
            Err(failure) => return Ok(failure),
        };
        let size = args::opt_str(arguments, "size").unwrap_or(VALID_SIZES[0]);
        if !VALID_SIZES.contains(&size) {
            return Ok(ToolResult::failure(format!(
                "Invalid size. Must be one of: {}",
                VALID_SIZES.join(", ")
            )));
        }

        let save_path = match self.workspace.resolve(output_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        let request = ImageRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            size: size.to_string(),
            quality: args::opt_str(arguments, "quality")
                .unwrap_or("standard")
                .to_string(),
            style: args::opt_str(arguments, "style").unwrap_or("vivid").to_string(),
        };

        let generated = tokio::select! {
            _ = cancel.cancelled() => return Ok(ToolResult::failure("Image generation cancelled")),
            r = provider.generate_image(&request) => r,
        };
        let image = match generated {
            Ok(image) => image,
            // Transient endpoint errors go back to the executor for a retry
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(AiError::Api { status, message }) => {
                return Ok(ToolResult::failure(format!(
                    "Image generation failed: {} - {}",
                    status, message
                )));
            }
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Error generating image: {}",
                    e
                )));
            }
        };

        let bytes = match STANDARD.decode(image.b64_json.as_bytes()) {
            Ok(b) => b,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Error generating image: invalid image data: {}",
                    e
                )));
            }
        };

        if let Some(parent) = save_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&save_path, &bytes).await?;
        tracing::info!(path = %save_path.display(), bytes = bytes.len(), "saved generated image");

        let revised = image.revised_prompt.unwrap_or_else(|| prompt.to_string());
        Ok(ToolResult::success(format!("Image saved to {}", output_path))
            .with_meta("path", save_path.to_string_lossy().into_owned())
            .with_meta("size", size)
            .with_meta("prompt", prompt)
            .with_meta("revised_prompt", revised))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidesmith_ai::GeneratedImage;

    struct FakeImages {
        result: fn() -> slidesmith_ai::Result<GeneratedImage>,
    }

    #[async_trait]
    impl ImageProvider for FakeImages {
        async fn generate_image(
            &self,
            _request: &ImageRequest,
        ) -> slidesmith_ai::Result<GeneratedImage> {
            (self.result)()
        }
    }

    fn tool_with(
        result: fn() -> slidesmith_ai::Result<GeneratedImage>,
    ) -> (tempfile::TempDir, GenerateImageTool) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path()).unwrap();
        let provider: Arc<dyn ImageProvider> = Arc::new(FakeImages { result });
        (dir, GenerateImageTool::new(ws, Some(provider)))
    }

    fn arguments(value: Value) -> ToolArguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_saves_decoded_image() {
        let (dir, tool) = tool_with(|| {
            Ok(GeneratedImage {
                b64_json: STANDARD.encode(b"PNGDATA"),
                revised_prompt: Some("a nicer cat".into()),
            })
        });
        let result = tool
            .execute(
                &arguments(json!({"prompt": "a cat", "output_path": "images/cat.png"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output_str(), Some("Image saved to images/cat.png"));
        assert_eq!(result.metadata["revised_prompt"], "a nicer cat");
        assert_eq!(
            std::fs::read(dir.path().join("images/cat.png")).unwrap(),
            b"PNGDATA"
        );
    }

    #[tokio::test]
    async fn test_invalid_size() {
        let (_dir, tool) = tool_with(|| Err(AiError::Aborted));
        let result = tool
            .execute(
                &arguments(json!({"prompt": "p", "output_path": "x.png", "size": "512x512"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.error.unwrap().starts_with("Invalid size."));
    }

    #[tokio::test]
    async fn test_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GenerateImageTool::new(Workspace::new(dir.path()).unwrap(), None);
        let result = tool
            .execute(
                &arguments(json!({"prompt": "p", "output_path": "x.png"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Image API key not configured"));
    }

    #[tokio::test]
    async fn test_api_error_is_handled_failure() {
        let (_dir, tool) = tool_with(|| Err(AiError::api(400, "content policy")));
        let result = tool
            .execute(
                &arguments(json!({"prompt": "p", "output_path": "x.png"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.error.as_deref(),
            Some("Image generation failed: 400 - content policy")
        );
    }

    #[tokio::test]
    async fn test_rate_limit_is_raised_for_retry() {
        let (_dir, tool) = tool_with(|| Err(AiError::RateLimited { retry_after: None }));
        let outcome = tool
            .execute(
                &arguments(json!({"prompt": "p", "output_path": "x.png"})),
                CancellationToken::new(),
            )
            .await;
        assert!(outcome.is_err());
    }
}
