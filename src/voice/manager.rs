use std::{
  path::Path,
  sync::{Arc, Weak},
  time::Duration,
};

use dashmap::DashMap;
use futures_util::future::{self, Either};
use poise::serenity_prelude::GuildId;
use tokio::{
  sync::{
    broadcast::{self, error::RecvError},
    Mutex as TokioMutex,
  },
  time::timeout,
};
use tracing::{debug, info, warn};

use super::{
  idle::{IdleTimers, TimerToken},
  transport::{
    enters_any_state, enters_state, AudioPlayer, ConnectionStatus, JoinOptions,
    NoSubscriberBehavior, PlayerEvent, PlayerStatus, VoiceConnection, VoiceTarget,
    VoiceTransport,
  },
  VoiceError,
};

/// How long a fresh join may take to become ready.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a reused connection that is still connecting may take.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a disconnected connection has to start reconnecting on its own.
pub const RECOVERY_WINDOW: Duration = Duration::from_secs(5);
pub const PLAYBACK_TIMEOUT: Duration = Duration::from_secs(600);

const JOIN_OPTIONS: JoinOptions = JoinOptions {
  self_deaf: true,
  self_mute: false,
};

/// Owns every guild's voice connection, audio player and idle timer.
///
/// Cloning is cheap and every clone drives the same registries, so one
/// instance is shared by the slash commands and the web API.
pub struct VoiceSessionManager<T: VoiceTransport> {
  inner: Arc<Inner<T>>,
}

struct Inner<T: VoiceTransport> {
  transport: T,
  connections: DashMap<GuildId, Arc<T::Connection>>,
  players: DashMap<GuildId, Arc<T::Player>>,
  idle: IdleTimers,
  guild_locks: DashMap<GuildId, Arc<TokioMutex<()>>>,
}

impl<T: VoiceTransport> Clone for VoiceSessionManager<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T: VoiceTransport> VoiceSessionManager<T> {
  pub fn new(transport: T, idle_timeout: Option<Duration>) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        connections: DashMap::new(),
        players: DashMap::new(),
        idle: IdleTimers::new(idle_timeout),
        guild_locks: DashMap::new(),
      }),
    }
  }

  pub fn connection(&self, guild_id: GuildId) -> Option<Arc<T::Connection>> {
    self
      .inner
      .connections
      .get(&guild_id)
      .map(|entry| entry.value().clone())
  }

  /// Every tracked connection with the channel it currently targets.
  pub fn connections(&self) -> Vec<(VoiceTarget, ConnectionStatus)> {
    self
      .inner
      .connections
      .iter()
      .map(|entry| {
        let connection = entry.value();
        let target = VoiceTarget::new(*entry.key(), connection.channel_id());
        (target, connection.status())
      })
      .collect()
  }

  pub fn player_status(&self, guild_id: GuildId) -> Option<PlayerStatus> {
    self
      .inner
      .players
      .get(&guild_id)
      .map(|player| player.status())
  }

  pub fn idle_timeout(&self) -> Option<Duration> {
    self.inner.idle.timeout()
  }

  pub fn is_idle_pending(&self, guild_id: GuildId) -> bool {
    self.inner.idle.is_pending(guild_id)
  }

  /// Returns a ready connection to `target`, reusing the guild's existing one
  /// when it is alive and moving it to the requested channel if needed.
  pub async fn connect(&self, target: VoiceTarget) -> Result<Arc<T::Connection>, VoiceError> {
    let guild_id = target.guild_id;
    self.inner.idle.cancel(guild_id);

    let lock = self.guild_lock(guild_id);
    let _guard = lock.lock().await;

    if let Some(existing) = self.connection(guild_id) {
      let status = existing.status();
      if matches!(status, ConnectionStatus::Ready | ConnectionStatus::Connecting) {
        return self.reuse(existing, status, target).await;
      }

      debug!(%guild_id, ?status, "discarding stale voice connection");
      existing.destroy().await;
      self
        .inner
        .connections
        .remove_if(&guild_id, |_, tracked| Arc::ptr_eq(tracked, &existing));
    }

    let created = self.create(target).await;
    if created.is_err() {
      self.release_guild_lock(guild_id);
    }
    created
  }

  async fn reuse(
    &self,
    connection: Arc<T::Connection>,
    status: ConnectionStatus,
    target: VoiceTarget,
  ) -> Result<Arc<T::Connection>, VoiceError> {
    let current_channel = connection.channel_id();
    if current_channel != target.channel_id {
      info!(
        guild_id = %target.guild_id,
        from = %current_channel,
        to = %target.channel_id,
        "moving voice connection to another channel"
      );
      connection.rejoin(target.channel_id, JOIN_OPTIONS);
    }

    if status == ConnectionStatus::Connecting {
      enters_state(connection.as_ref(), ConnectionStatus::Ready, READY_TIMEOUT).await?;
    }

    self.schedule_idle_if_quiet(target.guild_id);
    Ok(connection)
  }

  async fn create(&self, target: VoiceTarget) -> Result<Arc<T::Connection>, VoiceError> {
    let guild_id = target.guild_id;
    let channel_id = target.channel_id;
    debug!(%guild_id, %channel_id, "joining voice channel");

    let connection = self.inner.transport.join(target, JOIN_OPTIONS);
    if let Err(err) = enters_state(connection.as_ref(), ConnectionStatus::Ready, CONNECT_TIMEOUT).await {
      warn!(%guild_id, %channel_id, error = %err, "voice connection never became ready");
      connection.destroy().await;
      self.inner.connections.remove(&guild_id);
      return Err(err);
    }

    self.inner.connections.insert(guild_id, connection.clone());
    self.spawn_recovery_hook(guild_id, connection.clone());
    self.schedule_idle_if_quiet(guild_id);
    info!(%guild_id, %channel_id, "joined voice channel");
    Ok(connection)
  }

  /// Plays `path` on the guild's player through `connection` and resolves once
  /// the player goes idle again, errors, or the playback timeout passes.
  pub async fn play_audio_file(
    &self,
    connection: &T::Connection,
    guild_id: GuildId,
    path: &Path,
  ) -> Result<(), VoiceError> {
    let player = self.player(guild_id);
    self.inner.idle.cancel(guild_id);

    debug!(%guild_id, path = %path.display(), "starting playback");
    let outcome = self.run_playback(connection, &player, path).await;
    if let Err(err) = &outcome {
      warn!(%guild_id, path = %path.display(), error = %err, "playback failed");
    }

    self.schedule_idle(guild_id);
    outcome
  }

  pub async fn play_sound_in_channel(&self, target: VoiceTarget, path: &Path) -> Result<(), VoiceError> {
    let connection = self.connect(target).await?;
    self
      .play_audio_file(connection.as_ref(), target.guild_id, path)
      .await
  }

  /// Leaves the guild's voice channel. Does nothing when not connected.
  pub async fn disconnect(&self, guild_id: GuildId) {
    let lock = self.guild_lock(guild_id);
    let _guard = lock.lock().await;

    if self.teardown(guild_id).await {
      info!(%guild_id, "disconnected from voice channel");
    }
  }

  fn player(&self, guild_id: GuildId) -> Arc<T::Player> {
    self
      .inner
      .players
      .entry(guild_id)
      .or_insert_with(|| self.inner.transport.create_player(NoSubscriberBehavior::Pause))
      .value()
      .clone()
  }

  fn guild_lock(&self, guild_id: GuildId) -> Arc<TokioMutex<()>> {
    self.inner.guild_locks.entry(guild_id).or_default().value().clone()
  }

  /// Drops the guild's lock entry once the guild has nothing tracked. Caller
  /// must hold the lock, so two references mean nobody else is waiting on it.
  fn release_guild_lock(&self, guild_id: GuildId) {
    if self.inner.connections.contains_key(&guild_id) {
      return;
    }
    self
      .inner
      .guild_locks
      .remove_if(&guild_id, |_, lock| Arc::strong_count(lock) <= 2);
  }

  async fn run_playback(
    &self,
    connection: &T::Connection,
    player: &Arc<T::Player>,
    path: &Path,
  ) -> Result<(), VoiceError> {
    let resource = self.inner.transport.create_resource(path)?;

    // Subscribe before starting so a very short clip cannot finish unseen.
    let mut events = player.subscribe_events();
    self.inner.transport.subscribe(connection, player);
    player.play(resource);

    match timeout(PLAYBACK_TIMEOUT, wait_for_completion(&mut events)).await {
      Ok(outcome) => outcome,
      Err(_) => {
        player.stop();
        Err(VoiceError::PlaybackTimeout(PLAYBACK_TIMEOUT))
      }
    }
  }

  /// Caller must hold the guild lock.
  async fn teardown(&self, guild_id: GuildId) -> bool {
    self.inner.idle.cancel(guild_id);
    if let Some((_, player)) = self.inner.players.remove(&guild_id) {
      player.stop();
    }

    let removed = match self.inner.connections.remove(&guild_id) {
      Some((_, connection)) => {
        connection.destroy().await;
        true
      }
      None => false,
    };
    self.release_guild_lock(guild_id);
    removed
  }

  fn schedule_idle_if_quiet(&self, guild_id: GuildId) {
    let quiet = self
      .player_status(guild_id)
      .map_or(true, |status| status == PlayerStatus::Idle);
    if quiet {
      self.schedule_idle(guild_id);
    }
  }

  fn schedule_idle(&self, guild_id: GuildId) {
    if !self.inner.connections.contains_key(&guild_id) {
      return;
    }

    let manager = Arc::downgrade(&self.inner);
    let scheduled = self.inner.idle.schedule(guild_id, move |token| async move {
      if let Some(inner) = manager.upgrade() {
        VoiceSessionManager { inner }.expire_idle(guild_id, token).await;
      }
    });
    if scheduled {
      debug!(%guild_id, timeout = ?self.idle_timeout(), "idle disconnect scheduled");
    }
  }

  async fn expire_idle(&self, guild_id: GuildId, token: TimerToken) {
    let lock = self.guild_lock(guild_id);
    let _guard = lock.lock().await;

    if !self.inner.idle.claim(guild_id, token) {
      return;
    }
    // A play that is still running reschedules the timer when it settles.
    if self.player_status(guild_id).is_some_and(PlayerStatus::is_active) {
      debug!(%guild_id, "idle timer expired during playback, keeping connection");
      return;
    }

    info!(%guild_id, "voice connection idle, disconnecting");
    self.teardown(guild_id).await;
  }

  fn spawn_recovery_hook(&self, guild_id: GuildId, connection: Arc<T::Connection>) {
    let manager = Arc::downgrade(&self.inner);
    tokio::spawn(watch_for_disconnect(manager, guild_id, connection));
  }

  /// Tears down `connection` if it is still the one tracked for the guild.
  async fn reap(&self, guild_id: GuildId, connection: &Arc<T::Connection>) {
    let lock = self.guild_lock(guild_id);
    let _guard = lock.lock().await;

    connection.destroy().await;
    let tracked = self
      .connection(guild_id)
      .is_some_and(|current| Arc::ptr_eq(&current, connection));
    if tracked {
      self.teardown(guild_id).await;
    }
  }
}

async fn watch_for_disconnect<T: VoiceTransport>(
  manager: Weak<Inner<T>>,
  guild_id: GuildId,
  connection: Arc<T::Connection>,
) {
  let mut status = connection.watch_status();
  loop {
    let current = match status
      .wait_for(|current| {
        matches!(current, ConnectionStatus::Disconnected | ConnectionStatus::Destroyed)
      })
      .await
    {
      Ok(current) => *current,
      Err(_) => return,
    };
    if current == ConnectionStatus::Destroyed {
      return;
    }

    if recovers(connection.as_ref()).await {
      debug!(%guild_id, "voice connection is reconnecting");
      continue;
    }

    let Some(inner) = manager.upgrade() else {
      return;
    };
    warn!(%guild_id, "voice connection lost, cleaning up");
    VoiceSessionManager { inner }.reap(guild_id, &connection).await;
    return;
  }
}

/// Races "back to signalling" against "reconnecting" within the recovery window.
/// Watches coalesce, so a reconnect that already finished shows up as `Ready`.
async fn recovers<C: VoiceConnection + ?Sized>(connection: &C) -> bool {
  let signalling = Box::pin(enters_state(
    connection,
    ConnectionStatus::Signalling,
    RECOVERY_WINDOW,
  ));
  let connecting = Box::pin(enters_any_state(
    connection,
    &[ConnectionStatus::Connecting, ConnectionStatus::Ready],
    RECOVERY_WINDOW,
  ));

  match future::select(signalling, connecting).await {
    Either::Left((outcome, _)) | Either::Right((outcome, _)) => outcome.is_ok(),
  }
}

async fn wait_for_completion(events: &mut broadcast::Receiver<PlayerEvent>) -> Result<(), VoiceError> {
  loop {
    match events.recv().await {
      Ok(PlayerEvent::Status(PlayerStatus::Idle)) => return Ok(()),
      Ok(PlayerEvent::Error(message)) => return Err(VoiceError::Player(message)),
      Ok(PlayerEvent::Status(_)) => {}
      Err(RecvError::Lagged(skipped)) => debug!(skipped, "player events lagged"),
      Err(RecvError::Closed) => return Err(VoiceError::PlayerClosed),
    }
  }
}
