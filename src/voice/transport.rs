use std::{path::Path, sync::Arc, time::Duration};

use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;
use tokio::{
  sync::{broadcast, watch},
  time::timeout,
};

use super::VoiceError;

/// Lifecycle of a voice connection as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  Signalling,
  Connecting,
  Ready,
  Disconnected,
  Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
  Idle,
  Buffering,
  Playing,
  AutoPaused,
  Paused,
}

impl PlayerStatus {
  /// Whether audio is being produced (or about to be) right now.
  pub fn is_active(self) -> bool {
    matches!(self, Self::Buffering | Self::Playing)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
  Status(PlayerStatus),
  Error(String),
}

/// What a player does when a resource is started with no connection attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoSubscriberBehavior {
  Pause,
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
  pub self_deaf: bool,
  pub self_mute: bool,
}

/// A voice channel inside a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceTarget {
  pub guild_id: GuildId,
  pub channel_id: ChannelId,
}

impl VoiceTarget {
  pub fn new(guild_id: impl Into<GuildId>, channel_id: impl Into<ChannelId>) -> Self {
    Self {
      guild_id: guild_id.into(),
      channel_id: channel_id.into(),
    }
  }
}

#[async_trait]
pub trait VoiceConnection: Send + Sync + 'static {
  fn channel_id(&self) -> ChannelId;

  /// A receiver that observes every status transition from now on.
  fn watch_status(&self) -> watch::Receiver<ConnectionStatus>;

  fn status(&self) -> ConnectionStatus {
    *self.watch_status().borrow()
  }

  /// Moves the connection to another channel without waiting for it to settle.
  fn rejoin(&self, channel_id: ChannelId, options: JoinOptions);

  async fn destroy(&self);
}

pub trait AudioPlayer: Send + Sync + 'static {
  type Resource: Send + 'static;

  fn status(&self) -> PlayerStatus;

  fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent>;

  fn play(&self, resource: Self::Resource);

  fn stop(&self);
}

/// The outbound side of the voice core: everything it needs from a Discord
/// voice implementation.
pub trait VoiceTransport: Send + Sync + 'static {
  type Connection: VoiceConnection;
  type Player: AudioPlayer;

  /// Starts joining `target`. The returned connection begins in `Signalling`
  /// and reports progress through its status watch.
  fn join(&self, target: VoiceTarget, options: JoinOptions) -> Arc<Self::Connection>;

  fn create_player(&self, behavior: NoSubscriberBehavior) -> Arc<Self::Player>;

  fn create_resource(
    &self,
    path: &Path,
  ) -> Result<<Self::Player as AudioPlayer>::Resource, VoiceError>;

  fn subscribe(&self, connection: &Self::Connection, player: &Arc<Self::Player>);
}

/// Waits until `connection` reports `status`, failing early if it gets destroyed.
pub async fn enters_state<C>(
  connection: &C,
  status: ConnectionStatus,
  limit: Duration,
) -> Result<(), VoiceError>
where
  C: VoiceConnection + ?Sized,
{
  enters_any_state(connection, &[status], limit).await
}

pub async fn enters_any_state<C>(
  connection: &C,
  wanted: &[ConnectionStatus],
  limit: Duration,
) -> Result<(), VoiceError>
where
  C: VoiceConnection + ?Sized,
{
  let mut status = connection.watch_status();
  let reached = timeout(
    limit,
    status.wait_for(|current| wanted.contains(current) || *current == ConnectionStatus::Destroyed),
  )
  .await;

  match reached {
    Err(_) => Err(VoiceError::ConnectionTimeout(limit)),
    Ok(Err(_)) => Err(VoiceError::Destroyed),
    Ok(Ok(current)) if wanted.contains(&*current) => Ok(()),
    Ok(Ok(_)) => Err(VoiceError::Destroyed),
  }
}
