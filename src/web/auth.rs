use std::sync::Arc;

use axum::{
  extract::{Request, State},
  http::{header::AUTHORIZATION, StatusCode},
  middleware::Next,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{error::ApiError, AppState};
use crate::voice::VoiceTransport;

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
  key: String,
}

/// `POST /api/auth/verify`
pub async fn verify<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Json(request): Json<VerifyRequest>,
) -> Response {
  if !request.key.is_empty() && request.key == *state.api_key {
    return Json(json!({ "valid": true })).into_response();
  }
  (
    StatusCode::UNAUTHORIZED,
    Json(json!({ "valid": false, "error": "Invalid API key" })),
  )
    .into_response()
}

/// Rejects requests that do not carry `Authorization: Bearer <api key>`.
pub async fn require_api_key(
  State(api_key): State<Arc<str>>,
  request: Request,
  next: Next,
) -> Result<Response, ApiError> {
  let token = request
    .headers()
    .get(AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "))
    .ok_or(ApiError::Unauthorized)?;

  if token != &*api_key {
    return Err(ApiError::InvalidApiKey);
  }
  Ok(next.run(request).await)
}
