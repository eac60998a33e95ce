use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub mod controller;
mod download;
mod endpoint;
mod replicate;
#[cfg(test)]
mod test_support;

pub use controller::{ControllerError, ControllerState, GeneratorController, PendingGeneration};
pub use download::download_emoji;
pub use endpoint::EndpointClient;
pub use replicate::ReplicateProvider;

pub const EMOJI_MODEL: &str =
    "fofr/sdxl-emoji:dee76b5afde21b0f01ed7925f0665b7e879c50ee718c5f78a9d38e04d523cc5e";

const PROMPT_REQUIRED: &str = "Prompt is required";

/// Wraps a user prompt in the trigger phrase the emoji fine-tune was trained on.
pub fn emoji_prompt(prompt: &str) -> String {
    format!("A TOK emoji of {prompt}")
}

/// Fixed input sent to the provider; only `prompt` varies between requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationInput {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub refine: String,
    pub scheduler: String,
    pub lora_scale: f64,
    pub num_outputs: u32,
    pub guidance_scale: f64,
    pub apply_watermark: bool,
    pub high_noise_frac: f64,
    pub negative_prompt: String,
    pub prompt_strength: f64,
    pub num_inference_steps: u32,
}

impl GenerationInput {
    pub fn for_prompt(prompt: &str) -> Self {
        Self {
            prompt: emoji_prompt(prompt),
            width: 1024,
            height: 1024,
            refine: "no_refiner".to_string(),
            scheduler: "K_EULER".to_string(),
            lora_scale: 0.6,
            num_outputs: 1,
            guidance_scale: 7.5,
            apply_watermark: false,
            high_noise_frac: 0.8,
            negative_prompt: String::new(),
            prompt_strength: 0.8,
            num_inference_steps: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Provider(String),
    #[error("{0}")]
    Transport(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Validation(_) => "validation",
            GenerationError::Provider(_) => "provider",
            GenerationError::Transport(_) => "transport",
        }
    }
}

/// Black-box image generation backend.
///
/// `run` returns the raw provider output (a URL, a list of URLs, or a list of
/// streamed text chunks); [`ProviderOutcome::from_output`] validates it.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, model: &str, input: &GenerationInput) -> Result<Value, GenerationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success { url: String },
    Failure { reason: String },
}

impl ProviderOutcome {
    pub fn from_output(output: &Value) -> Self {
        let chunks = match collect_chunks(output) {
            Ok(chunks) => chunks,
            Err(reason) => return Self::Failure { reason },
        };
        if chunks.iter().all(|chunk| chunk.trim().is_empty()) {
            return Self::Failure {
                reason: "provider returned no output".to_string(),
            };
        }

        // Separate outputs arrive as whole URLs; a streamed URL arrives in pieces.
        let candidate = if chunks.len() > 1 && chunks.iter().all(|chunk| is_http_url(chunk)) {
            warn!(count = chunks.len(), "provider returned several images, keeping the first");
            chunks[0].trim().to_string()
        } else {
            chunks.concat().trim().to_string()
        };

        if is_http_url(&candidate) {
            Self::Success { url: candidate }
        } else {
            Self::Failure {
                reason: format!(
                    "provider returned a non-URL payload: {}",
                    truncate_text(&candidate, 200)
                ),
            }
        }
    }
}

fn collect_chunks(output: &Value) -> Result<Vec<String>, String> {
    match output {
        Value::Null => Ok(Vec::new()),
        Value::String(text) => Ok(vec![text.clone()]),
        Value::Array(rows) => {
            let mut chunks = Vec::with_capacity(rows.len());
            for row in rows {
                match row {
                    Value::String(text) => chunks.push(text.clone()),
                    Value::Object(obj) => match obj.get("url").and_then(Value::as_str) {
                        Some(url) => chunks.push(url.to_string()),
                        None => return Err("provider output item has no url".to_string()),
                    },
                    other => {
                        return Err(format!(
                            "provider output item is not text: {}",
                            truncate_text(&other.to_string(), 200)
                        ))
                    }
                }
            }
            Ok(chunks)
        }
        Value::Object(obj) => match obj.get("url").and_then(Value::as_str) {
            Some(url) => Ok(vec![url.to_string()]),
            None => Err("provider output object has no url".to_string()),
        },
        other => Err(format!(
            "provider returned a non-URL payload: {}",
            truncate_text(&other.to_string(), 200)
        )),
    }
}

fn is_http_url(raw: &str) -> bool {
    reqwest::Url::parse(raw.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEmoji {
    pub image_url: String,
}

/// Turns a prompt into exactly one image URL through an [`ImageProvider`].
pub struct GenerationClient {
    provider: Box<dyn ImageProvider>,
    model: String,
}

impl fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

impl GenerationClient {
    pub fn new<P: ImageProvider + 'static>(provider: P) -> Self {
        Self {
            provider: Box::new(provider),
            model: EMOJI_MODEL.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn generate(&self, prompt: &str) -> Result<GeneratedEmoji, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::Validation(PROMPT_REQUIRED.to_string()));
        }
        info!(prompt, "received prompt");

        let input = GenerationInput::for_prompt(prompt);
        info!(
            provider = self.provider.name(),
            model = %self.model,
            input = ?input,
            "running image model"
        );
        let output = self.provider.run(&self.model, &input)?;
        info!(output = %output, "provider output");

        match ProviderOutcome::from_output(&output) {
            ProviderOutcome::Success { url } => Ok(GeneratedEmoji { image_url: url }),
            ProviderOutcome::Failure { reason } => Err(GenerationError::Provider(reason)),
        }
    }
}

/// Anything that can turn a prompt into an image URL for the controller.
pub trait EmojiGenerator: Send + Sync {
    fn generate_emoji(&self, prompt: &str) -> Result<String, GenerationError>;
}

impl EmojiGenerator for GenerationClient {
    fn generate_emoji(&self, prompt: &str) -> Result<String, GenerationError> {
        self.generate(prompt).map(|emoji| emoji.image_url)
    }
}

fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = cause {
        let text = current.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        cause = current.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
