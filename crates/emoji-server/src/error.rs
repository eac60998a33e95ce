use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use emoji_contracts::api::GenerateEmojiResponse;
use emoji_engine::GenerationError;
use thiserror::Error;
use tracing::error;

/// Every failure of the generate route, whatever its kind, is answered with
/// 500 and the same envelope; the kind only shows up in the logs.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("generation worker failed: {0}")]
    Worker(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Generation(err) => err.kind(),
            AppError::Worker(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(kind = self.kind(), details = %self, "error generating emoji");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(GenerateEmojiResponse::failure(self.to_string())),
        )
            .into_response()
    }
}
