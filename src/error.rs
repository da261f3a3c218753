use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecipeError>;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("recipe not found")]
    RecipeNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("review not found")]
    ReviewNotFound,
    #[error("recipe has not been liked by this user")]
    NotLiked,
    #[error("user has already reviewed this recipe")]
    DuplicateReview,
    #[error("invalid rating {0}: must be between 1 and 5")]
    InvalidRating(u8),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RecipeError {
    /// Storage round-trip failures are the only class worth retrying;
    /// everything else is either caller error or a bug.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<toml::de::Error> for RecipeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for RecipeError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RecipeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl IntoResponse for RecipeError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Config(_) | Self::InvalidRating(_) => StatusCode::BAD_REQUEST,
            Self::RecipeNotFound | Self::UserNotFound | Self::ReviewNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::NotLiked | Self::DuplicateReview => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = self.to_string();
        (status, Json(ErrorBody { message: &message })).into_response()
    }
}
