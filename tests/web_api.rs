mod common;

use std::sync::{atomic::AtomicBool, Arc};

use axum::{
  body::Body,
  http::{header, Method, Request, StatusCode},
  Router,
};
use button_gremlin::{
  storage::SoundLibrary,
  voice::{VoiceSessionManager, VoiceTarget},
  web::{app, AppState},
};
use common::{settle, FakeTransport};
use http_body_util::BodyExt;
use poise::serenity_prelude::Cache;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const API_KEY: &str = "correct horse battery staple";
const BOUNDARY: &str = "gremlin-boundary";

struct Harness {
  dir: TempDir,
  transport: FakeTransport,
  state: AppState<FakeTransport>,
}

impl Harness {
  fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::default();
    let state = AppState {
      voice: VoiceSessionManager::new(transport.clone(), None),
      library: SoundLibrary::new(dir.path()),
      cache: Arc::new(Cache::new()),
      online: Arc::new(AtomicBool::new(true)),
      api_key: Arc::from(API_KEY),
    };
    Self { dir, transport, state }
  }

  fn app(&self) -> Router {
    app(self.state.clone())
  }

  fn add_sound(&self, file: &str, bytes: &[u8]) {
    std::fs::write(self.dir.path().join(file), bytes).unwrap();
  }

  async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
    let response = self.app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
  }
}

fn authed(method: Method, uri: &str) -> axum::http::request::Builder {
  Request::builder()
    .method(method)
    .uri(uri)
    .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
}

fn json_body(builder: axum::http::request::Builder, body: Value) -> Request<Body> {
  builder
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn multipart(file_name: &str, bytes: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
  body.extend_from_slice(
    format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n").as_bytes(),
  );
  body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  authed(Method::POST, "/api/sounds/upload")
    .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
    .body(Body::from(body))
    .unwrap()
}

#[tokio::test]
async fn verify_checks_the_api_key() {
  let harness = Harness::new();
  let verify = |key: &str| {
    json_body(
      Request::builder().method(Method::POST).uri("/api/auth/verify"),
      json!({ "key": key }),
    )
  };

  let (status, body) = harness.send(verify(API_KEY)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "valid": true }));

  let (status, body) = harness.send(verify("nope")).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["valid"], json!(false));
}

#[tokio::test]
async fn protected_routes_need_a_bearer_key() {
  let harness = Harness::new();

  let request = Request::builder().uri("/api/sounds").body(Body::empty()).unwrap();
  let (status, body) = harness.send(request).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["error"], "Unauthorized");

  let request = Request::builder()
    .uri("/api/bot/status")
    .header(header::AUTHORIZATION, "Bearer wrong")
    .body(Body::empty())
    .unwrap();
  let (status, body) = harness.send(request).await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);
  assert_eq!(body["error"], "Invalid API key");
}

#[tokio::test]
async fn unknown_api_routes_are_json_404s() {
  let harness = Harness::new();
  let (status, body) = harness
    .send(authed(Method::GET, "/api/nothing-here").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "Not found");
}

#[tokio::test]
async fn lists_only_playable_sounds() {
  let harness = Harness::new();
  harness.add_sound("sad_trombone.ogg", b"wah wah");
  harness.add_sound("airhorn.mp3", b"HOOONK");
  harness.add_sound("readme.txt", b"not audio");

  let (status, body) = harness
    .send(authed(Method::GET, "/api/sounds").body(Body::empty()).unwrap())
    .await;

  assert_eq!(status, StatusCode::OK);
  let sounds = body.as_array().unwrap();
  assert_eq!(sounds.len(), 2);
  assert_eq!(sounds[0]["name"], "airhorn");
  assert_eq!(sounds[0]["size"], 6);
  assert_eq!(sounds[1]["displayName"], "sad trombone");
  assert!(sounds[1]["uploadedAt"].is_string());
  assert!(sounds[1].get("path").is_none());
}

#[tokio::test]
async fn streams_the_raw_clip() {
  let harness = Harness::new();
  harness.add_sound("airhorn.mp3", b"HOOONK");

  let response = harness
    .app()
    .oneshot(authed(Method::GET, "/api/sounds/AIRHORN/stream").body(Body::empty()).unwrap())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  assert_eq!(&bytes[..], b"HOOONK");

  let (status, _) = harness
    .send(authed(Method::GET, "/api/sounds/kazoo/stream").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn uploads_are_sanitized_and_saved() {
  let harness = Harness::new();

  let (status, body) = harness.send(multipart("Air Horn.mp3", b"HOOONK")).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);
  assert_eq!(body["sound"]["name"], "air_horn");
  assert!(harness.dir.path().join("air_horn.mp3").is_file());
}

#[tokio::test]
async fn uploads_with_the_wrong_extension_are_rejected() {
  let harness = Harness::new();

  let (status, body) = harness.send(multipart("notes.txt", b"hello")).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["success"], false);
  assert!(std::fs::read_dir(harness.dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn metadata_edits_and_delete() {
  let harness = Harness::new();
  harness.add_sound("airhorn.mp3", b"HOOONK");

  let (status, body) = harness
    .send(json_body(
      authed(Method::PATCH, "/api/sounds/airhorn/metadata"),
      json!({ "displayName": "Air Horn", "tags": ["Loud", " meme ", "loud"] }),
    ))
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);
  assert_eq!(body["sound"]["displayName"], "Air Horn");
  assert_eq!(body["sound"]["tags"], json!(["loud", "meme"]));

  let (status, body) = harness
    .send(json_body(
      authed(Method::PATCH, "/api/sounds/airhorn/metadata"),
      json!({ "tags": [] }),
    ))
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["sound"]["displayName"], "Air Horn");
  assert_eq!(body["sound"]["tags"], json!([]));

  let (status, body) = harness
    .send(json_body(
      authed(Method::PATCH, "/api/sounds/kazoo/metadata"),
      json!({ "displayName": "Kazoo" }),
    ))
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "Sound not found");

  let (status, body) = harness
    .send(authed(Method::DELETE, "/api/sounds/airhorn").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "success": true }));

  let (status, body) = harness
    .send(authed(Method::DELETE, "/api/sounds/airhorn").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "Sound not found");
}

#[tokio::test]
async fn tag_routes_create_list_and_delete() {
  let harness = Harness::new();
  harness.add_sound("airhorn.mp3", b"HOOONK");
  let list_tags = || authed(Method::GET, "/api/sounds/tags").body(Body::empty()).unwrap();
  let create_tag = |tag: &str| json_body(authed(Method::POST, "/api/sounds/tags"), json!({ "tag": tag }));

  let (status, body) = harness.send(list_tags()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!([]));

  let (status, body) = harness.send(create_tag("Spooky")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "success": true, "tag": "spooky" }));

  let (status, body) = harness.send(create_tag("spooky")).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "Tag already exists");

  let (status, body) = harness.send(create_tag("  ")).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "Tag name is required");

  harness
    .send(json_body(
      authed(Method::PATCH, "/api/sounds/airhorn/metadata"),
      json!({ "tags": ["loud", "spooky"] }),
    ))
    .await;
  let (_, body) = harness.send(list_tags()).await;
  assert_eq!(body, json!(["loud", "spooky"]));

  let (status, body) = harness
    .send(authed(Method::DELETE, "/api/sounds/tags/spooky").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "success": true }));

  let (_, body) = harness.send(list_tags()).await;
  assert_eq!(body, json!(["loud"]));
  let (_, body) = harness
    .send(authed(Method::GET, "/api/sounds").body(Body::empty()).unwrap())
    .await;
  assert_eq!(body[0]["tags"], json!(["loud"]));

  let (status, body) = harness
    .send(authed(Method::DELETE, "/api/sounds/tags/haunted%20house").body(Body::empty()).unwrap())
    .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["error"], "Tag not found");
}

#[tokio::test]
async fn status_reflects_the_voice_registry() {
  let harness = Harness::new();
  let status_request = || authed(Method::GET, "/api/bot/status").body(Body::empty()).unwrap();

  let (status, body) = harness.send(status_request()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "online": true, "connected": false }));

  harness.state.voice.connect(VoiceTarget::new(1u64, 10u64)).await.unwrap();
  let (_, body) = harness.send(status_request()).await;
  assert_eq!(body["connected"], true);
}

#[tokio::test]
async fn play_needs_a_known_sound_and_somewhere_to_play() {
  let harness = Harness::new();
  let play = |name: &str| json_body(authed(Method::POST, "/api/bot/play"), json!({ "soundName": name }));

  let (status, body) = harness.send(play("airhorn")).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body, json!({ "success": false, "message": "Sound not found" }));

  harness.add_sound("airhorn.mp3", b"HOOONK");
  let (status, body) = harness.send(play("airhorn")).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(
    body,
    json!({ "success": false, "message": "No non-empty voice channels found to connect to" })
  );
}

#[tokio::test]
async fn play_uses_the_ready_connection_in_the_background() {
  let harness = Harness::new();
  harness.add_sound("airhorn.mp3", b"HOOONK");
  harness.state.voice.connect(VoiceTarget::new(1u64, 10u64)).await.unwrap();

  let (status, body) = harness
    .send(json_body(authed(Method::POST, "/api/bot/play"), json!({ "soundName": "airhorn" })))
    .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "success": true, "message": "Playing airhorn" }));

  settle().await;
  let player = harness.transport.player();
  assert_eq!(player.plays(), vec![harness.dir.path().join("airhorn.mp3")]);
  assert_eq!(harness.transport.join_count(), 1);
  player.finish();
}

#[tokio::test]
async fn disconnect_requires_a_connection() {
  let harness = Harness::new();
  let disconnect = || authed(Method::POST, "/api/bot/disconnect").body(Body::empty()).unwrap();

  let (status, body) = harness.send(disconnect()).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body, json!({ "success": false, "message": "Not connected to any voice channel" }));

  harness.state.voice.connect(VoiceTarget::new(1u64, 10u64)).await.unwrap();
  let (status, body) = harness.send(disconnect()).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["success"], true);
  assert!(harness.state.voice.connections().is_empty());
}
