use axum::{
  body::Body,
  extract::{Multipart, Path, State},
  http::header::CONTENT_TYPE,
  response::{IntoResponse, Response},
  Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::info;

use super::{error::ApiError, AppState};
use crate::{
  storage::{LibraryError, MetadataUpdate, SoundFile},
  voice::VoiceTransport,
};

/// `GET /api/sounds`
pub async fn list<T: VoiceTransport>(
  State(state): State<AppState<T>>,
) -> Result<Json<Vec<SoundFile>>, ApiError> {
  Ok(Json(state.library.list().await?))
}

/// `GET /api/sounds/{name}/stream`
pub async fn stream<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Path(name): Path<String>,
) -> Result<Response, ApiError> {
  let sound = state.library.get(&name).await?.ok_or(ApiError::SoundNotFound)?;
  let bytes = fs::read(&sound.path).await.map_err(LibraryError::from)?;
  Ok(([(CONTENT_TYPE, content_type(&sound))], Body::from(bytes)).into_response())
}

fn content_type(sound: &SoundFile) -> &'static str {
  let extension = sound
    .path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase);
  match extension.as_deref() {
    Some("wav") => "audio/wav",
    Some("ogg") => "audio/ogg",
    Some("m4a") => "audio/mp4",
    Some("flac") => "audio/flac",
    Some("webm") => "audio/webm",
    Some("opus") => "audio/opus",
    _ => "audio/mpeg",
  }
}

/// `POST /api/sounds/upload`, multipart with a single file field.
pub async fn upload<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
  while let Some(field) = multipart.next_field().await? {
    let Some(file_name) = field.file_name().map(str::to_string) else {
      continue;
    };
    let data = field.bytes().await?;
    let sound = state.library.save(&file_name, &data).await?;
    info!(sound = %sound.name, size = sound.size, "sound uploaded through the web API");
    return Ok(Json(json!({ "success": true, "sound": sound })));
  }
  Err(ApiError::BadRequest("No file uploaded".to_string()))
}

/// `DELETE /api/sounds/{name}`
pub async fn delete<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
  state.library.delete(&name).await?;
  info!(sound = %name, "sound deleted");
  Ok(Json(json!({ "success": true })))
}

/// `PATCH /api/sounds/{name}/metadata`
pub async fn update_metadata<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Path(name): Path<String>,
  Json(update): Json<MetadataUpdate>,
) -> Result<Json<Value>, ApiError> {
  let sound = state.library.update_metadata(&name, update).await?;
  info!(sound = %sound.name, "sound metadata updated");
  Ok(Json(json!({ "success": true, "sound": sound })))
}

/// `GET /api/sounds/tags`
pub async fn list_tags<T: VoiceTransport>(
  State(state): State<AppState<T>>,
) -> Result<Json<Vec<String>>, ApiError> {
  Ok(Json(state.library.tags().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateTag {
  tag: String,
}

/// `POST /api/sounds/tags`
pub async fn create_tag<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Json(request): Json<CreateTag>,
) -> Result<Json<Value>, ApiError> {
  let tag = state.library.create_tag(&request.tag).await?;
  info!(%tag, "tag created");
  Ok(Json(json!({ "success": true, "tag": tag })))
}

/// `DELETE /api/sounds/tags/{tag}`
pub async fn delete_tag<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Path(tag): Path<String>,
) -> Result<Json<Value>, ApiError> {
  state.library.delete_tag(&tag).await?;
  info!(%tag, "tag deleted");
  Ok(Json(json!({ "success": true })))
}
