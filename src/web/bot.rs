use std::sync::atomic::Ordering;

use axum::{
  extract::State,
  response::{IntoResponse, Response},
  Json,
};
use poise::serenity_prelude::{Cache, ChannelType, GuildChannel, GuildId, UserId};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{error::ApiError, AppState};
use crate::{
  storage::LibraryError,
  voice::{ConnectionStatus, VoiceSessionManager, VoiceTarget, VoiceTransport},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStatus {
  online: bool,
  connected: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  channel_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  guild_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
  sound_name: String,
}

#[derive(Debug, Serialize)]
pub struct BotReply {
  success: bool,
  message: String,
}

impl BotReply {
  fn ok(message: impl Into<String>) -> Json<Self> {
    Json(Self {
      success: true,
      message: message.into(),
    })
  }
}

/// Failures of the bot routes carry their text under `message`, like
/// [`BotReply`] does.
#[derive(Debug)]
pub struct BotFailure(ApiError);

impl From<ApiError> for BotFailure {
  fn from(err: ApiError) -> Self {
    Self(err)
  }
}

impl From<LibraryError> for BotFailure {
  fn from(err: LibraryError) -> Self {
    Self(err.into())
  }
}

impl IntoResponse for BotFailure {
  fn into_response(self) -> Response {
    self.0.into_response_with_key("message")
  }
}

/// The guild's connection that should answer web requests, preferring ready ones.
fn current_target<T: VoiceTransport>(voice: &VoiceSessionManager<T>) -> Option<(VoiceTarget, ConnectionStatus)> {
  let mut connections = voice.connections();
  connections.sort_by_key(|(target, status)| (*status != ConnectionStatus::Ready, target.guild_id));
  connections.into_iter().next()
}

/// First voice channel with someone in it that the bot is not already in and
/// may connect and speak in.
fn find_voice_channel(cache: &Cache) -> Option<VoiceTarget> {
  let bot_id = cache.current_user().id;
  let mut guild_ids = cache.guilds();
  guild_ids.sort();

  guild_ids.into_iter().find_map(|guild_id| {
    let guild = cache.guild(guild_id)?;
    let bot_member = guild.members.get(&bot_id)?;

    let mut channels: Vec<&GuildChannel> = guild
      .channels
      .values()
      .filter(|channel| matches!(channel.kind, ChannelType::Voice | ChannelType::Stage))
      .collect();
    channels.sort_by_key(|channel| (channel.position, channel.id));

    let channel_id = channels
      .into_iter()
      .find(|channel| {
        let present: Vec<UserId> = guild
          .voice_states
          .values()
          .filter(|voice_state| voice_state.channel_id == Some(channel.id))
          .map(|voice_state| voice_state.user_id)
          .collect();
        if present.is_empty() || present.contains(&bot_id) {
          return false;
        }
        let permissions = guild.user_permissions_in(channel, bot_member);
        permissions.connect() && permissions.speak()
      })?
      .id;
    Some(VoiceTarget::new(guild_id, channel_id))
  })
}

fn describe(cache: &Cache, target: VoiceTarget) -> (Option<String>, Option<String>) {
  match cache.guild(target.guild_id) {
    Some(guild) => (
      guild.channels.get(&target.channel_id).map(|channel| channel.name.clone()),
      Some(guild.name.clone()),
    ),
    None => (None, None),
  }
}

/// `GET /api/bot/status`
pub async fn status<T: VoiceTransport>(State(state): State<AppState<T>>) -> Json<BotStatus> {
  let current = current_target(&state.voice);
  let (channel_name, guild_name) = match current {
    Some((target, _)) => describe(&state.cache, target),
    None => (None, None),
  };

  Json(BotStatus {
    online: state.online.load(Ordering::SeqCst),
    connected: current.is_some(),
    channel_name,
    guild_name,
  })
}

/// `POST /api/bot/play`. Responds as soon as a channel is picked; playback
/// continues in the background.
pub async fn play<T: VoiceTransport>(
  State(state): State<AppState<T>>,
  Json(request): Json<PlayRequest>,
) -> Result<Json<BotReply>, BotFailure> {
  let sound = state
    .library
    .get(&request.sound_name)
    .await?
    .ok_or(ApiError::SoundNotFound)?;

  let target = current_target(&state.voice)
    .filter(|(_, status)| *status == ConnectionStatus::Ready)
    .map(|(target, _)| target)
    .or_else(|| find_voice_channel(&state.cache))
    .ok_or_else(|| ApiError::BadRequest("No non-empty voice channels found to connect to".to_string()))?;

  let voice = state.voice.clone();
  let path = sound.path.clone();
  let sound_name = sound.name.clone();
  tokio::spawn(async move {
    if let Err(err) = voice.play_sound_in_channel(target, &path).await {
      error!(error = %err, sound = %sound_name, guild_id = %target.guild_id, "error playing sound in background");
    }
  });

  info!(sound = %sound.name, guild_id = %target.guild_id, channel_id = %target.channel_id, "playing sound from the web API");
  Ok(BotReply::ok(format!("Playing {}", sound.display_name)))
}

/// `POST /api/bot/disconnect`
pub async fn disconnect<T: VoiceTransport>(
  State(state): State<AppState<T>>,
) -> Result<Json<BotReply>, BotFailure> {
  let guilds: Vec<GuildId> = state
    .voice
    .connections()
    .into_iter()
    .map(|(target, _)| target.guild_id)
    .collect();
  if guilds.is_empty() {
    return Err(ApiError::BadRequest("Not connected to any voice channel".to_string()).into());
  }

  for guild_id in guilds {
    state.voice.disconnect(guild_id).await;
  }
  Ok(BotReply::ok("Disconnected from voice channel"))
}
