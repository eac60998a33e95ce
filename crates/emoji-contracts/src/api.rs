use serde::{Deserialize, Serialize};

pub const GENERATE_EMOJI_PATH: &str = "/api/generate-emoji";

/// Message returned in `error` for every failed generation.
pub const GENERATE_EMOJI_ERROR: &str = "Error generating emoji";

/// Body of `POST /api/generate-emoji`. A missing prompt decodes to `None` so
/// the handler can report it the same way as an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateEmojiRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEmojiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl GenerateEmojiResponse {
    pub fn success(image_url: impl Into<String>) -> Self {
        Self {
            success: true,
            image_url: Some(image_url.into()),
            error: None,
            details: None,
        }
    }

    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            success: false,
            image_url: None,
            error: Some(GENERATE_EMOJI_ERROR.to_string()),
            details: Some(details.into()),
        }
    }
}
