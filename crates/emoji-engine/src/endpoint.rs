use emoji_contracts::api::{GenerateEmojiRequest, GenerateEmojiResponse, GENERATE_EMOJI_PATH};
use reqwest::blocking::Client as HttpClient;

use crate::{error_chain_text, truncate_text, EmojiGenerator, GenerationError, PROMPT_REQUIRED};

/// Generates emojis by calling a running generation endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    endpoint: String,
    http: HttpClient,
}

impl EndpointClient {
    /// `endpoint` is the full URL of the generate route.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: HttpClient::new(),
        }
    }

    /// Builds the endpoint URL from a server origin such as `http://127.0.0.1:3000`.
    pub fn for_origin(origin: &str) -> Self {
        Self::new(format!(
            "{}{}",
            origin.trim_end_matches('/'),
            GENERATE_EMOJI_PATH
        ))
    }
}

impl EmojiGenerator for EndpointClient {
    fn generate_emoji(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::Validation(PROMPT_REQUIRED.to_string()));
        }
        let request = GenerateEmojiRequest {
            prompt: Some(prompt.to_string()),
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|err| {
                GenerationError::Transport(format!(
                    "generate request failed ({}): {}",
                    self.endpoint,
                    error_chain_text(&err, 512)
                ))
            })?;

        let code = response.status().as_u16();
        let body = response.text().map_err(|err| {
            GenerationError::Transport(format!(
                "generate response read failed: {}",
                error_chain_text(&err, 512)
            ))
        })?;
        let Ok(parsed) = serde_json::from_str::<GenerateEmojiResponse>(&body) else {
            return Err(GenerationError::Provider(format!(
                "generate endpoint returned an unexpected body ({code}): {}",
                truncate_text(&body, 512)
            )));
        };

        match parsed {
            GenerateEmojiResponse {
                success: true,
                image_url: Some(image_url),
                ..
            } => Ok(image_url),
            GenerateEmojiResponse { error, details, .. } => {
                let error = error.unwrap_or_else(|| "Failed to generate emoji".to_string());
                Err(GenerationError::Provider(match details {
                    Some(details) => format!("{error}: {details}"),
                    None => error,
                }))
            }
        }
    }
}
