use axum::{
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;
use tracing::error;

use crate::storage::LibraryError;

#[derive(Error, Debug)]
pub enum ApiError {
  #[error("Unauthorized")]
  Unauthorized,

  #[error("Invalid API key")]
  InvalidApiKey,

  #[error("Sound not found")]
  SoundNotFound,

  #[error("{0}")]
  BadRequest(String),

  #[error(transparent)]
  Library(#[from] LibraryError),

  #[error(transparent)]
  Multipart(#[from] MultipartError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      Self::Unauthorized | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
      Self::SoundNotFound => StatusCode::NOT_FOUND,
      Self::BadRequest(_) => StatusCode::BAD_REQUEST,
      Self::Library(LibraryError::NotFound(_) | LibraryError::TagNotFound(_)) => StatusCode::NOT_FOUND,
      Self::Library(
        LibraryError::UnsupportedExtension
        | LibraryError::TooLarge
        | LibraryError::InvalidName
        | LibraryError::EmptyTag
        | LibraryError::TagExists(_),
      ) => StatusCode::BAD_REQUEST,
      Self::Library(LibraryError::Io(_) | LibraryError::Metadata { .. }) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
      Self::Multipart(err) => err.status(),
    }
  }

  /// What the client gets to see. Server-side failures are logged here and
  /// reported generically.
  fn public_message(&self) -> String {
    match self {
      Self::Library(LibraryError::NotFound(_)) => "Sound not found".to_string(),
      Self::Library(LibraryError::TagNotFound(_)) => "Tag not found".to_string(),
      _ if self.status().is_server_error() => {
        error!(error = %self, "request failed");
        "Internal server error".to_string()
      }
      Self::Multipart(err) => err.body_text(),
      other => other.to_string(),
    }
  }

  /// `{"success": false, "<key>": message}` with the matching status.
  pub(super) fn into_response_with_key(self, key: &str) -> Response {
    let status = self.status();
    let body = Json(serde_json::json!({
      "success": false,
      key: self.public_message(),
    }));
    (status, body).into_response()
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    self.into_response_with_key("error")
  }
}
