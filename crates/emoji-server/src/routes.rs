use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use emoji_contracts::api::{GenerateEmojiRequest, GenerateEmojiResponse};
use emoji_engine::GenerationError;
use tokio::task;

use crate::error::AppError;
use crate::state::AppState;

/// `POST /api/generate-emoji`
///
/// The body is decoded by hand so a malformed payload is answered with the
/// same 500 envelope as any other failure.
pub async fn generate_emoji_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GenerateEmojiResponse>, AppError> {
    let request: GenerateEmojiRequest = serde_json::from_slice(&body).map_err(|err| {
        GenerationError::Validation(format!("Request body is not valid JSON: {err}"))
    })?;
    let prompt = request.prompt.unwrap_or_default();

    let client = state.client.clone();
    let generated = task::spawn_blocking(move || client.generate(&prompt))
        .await
        .map_err(|err| AppError::Worker(err.to_string()))??;

    Ok(Json(GenerateEmojiResponse::success(generated.image_url)))
}

pub async fn health_handler() -> &'static str {
    "ok"
}
