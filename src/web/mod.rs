//! HTTP API for the web soundboard.

mod auth;
mod bot;
mod error;
mod sounds;

use std::{
  path::Path,
  sync::{atomic::AtomicBool, Arc},
};

use axum::{
  extract::DefaultBodyLimit,
  http::StatusCode,
  middleware,
  routing::{delete, get, patch, post},
  Json, Router,
};
use poise::serenity_prelude::Cache;
use tower_http::{
  cors::CorsLayer,
  services::{ServeDir, ServeFile},
  trace::TraceLayer,
};
use tracing::{info, warn};

pub use error::ApiError;

use crate::{
  storage::{SoundLibrary, MAX_UPLOAD_BYTES},
  voice::{VoiceSessionManager, VoiceTransport},
};

const WEB_DIST: &str = "web/dist";
/// Room for the multipart envelope around a maximum-size clip.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 64 * 1024;

pub struct AppState<T: VoiceTransport> {
  pub voice: VoiceSessionManager<T>,
  pub library: SoundLibrary,
  pub cache: Arc<Cache>,
  pub online: Arc<AtomicBool>,
  pub api_key: Arc<str>,
}

impl<T: VoiceTransport> Clone for AppState<T> {
  fn clone(&self) -> Self {
    Self {
      voice: self.voice.clone(),
      library: self.library.clone(),
      cache: self.cache.clone(),
      online: self.online.clone(),
      api_key: self.api_key.clone(),
    }
  }
}

async fn api_not_found() -> (StatusCode, Json<serde_json::Value>) {
  (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "Not found" })))
}

pub fn app<T: VoiceTransport>(state: AppState<T>) -> Router {
  let protected = Router::new()
    .route("/sounds", get(sounds::list::<T>))
    .route("/sounds/{name}/stream", get(sounds::stream::<T>))
    .route(
      "/sounds/upload",
      post(sounds::upload::<T>).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
    )
    .route(
      "/sounds/tags",
      get(sounds::list_tags::<T>).post(sounds::create_tag::<T>),
    )
    .route("/sounds/tags/{tag}", delete(sounds::delete_tag::<T>))
    .route("/sounds/{name}", delete(sounds::delete::<T>))
    .route("/sounds/{name}/metadata", patch(sounds::update_metadata::<T>))
    .route("/bot/status", get(bot::status::<T>))
    .route("/bot/play", post(bot::play::<T>))
    .route("/bot/disconnect", post(bot::disconnect::<T>))
    .route_layer(middleware::from_fn_with_state(
      state.api_key.clone(),
      auth::require_api_key,
    ));

  let api = protected
    .route("/auth/verify", post(auth::verify::<T>))
    .fallback(api_not_found);

  let mut router = Router::new().nest("/api", api);

  let dist = Path::new(WEB_DIST);
  if dist.join("index.html").is_file() {
    info!(path = %dist.display(), "serving web frontend");
    router = router.fallback_service(ServeDir::new(dist).fallback(ServeFile::new(dist.join("index.html"))));
  } else {
    warn!(path = %dist.display(), "web frontend not built, serving the API only");
  }

  router
    .layer(CorsLayer::very_permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve<T: VoiceTransport>(state: AppState<T>, port: u16) -> std::io::Result<()> {
  let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
  info!(port, "web server listening");
  axum::serve(listener, app(state)).await
}

