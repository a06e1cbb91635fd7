use std::{
  path::Path,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
  },
};

use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;
use songbird::{
  input::{File as FileInput, Input},
  tracks::{PlayMode, TrackHandle},
  Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use tokio::sync::{broadcast, watch, Mutex as TokioMutex};
use tracing::{debug, warn};

use super::{
  transport::{
    AudioPlayer, ConnectionStatus, JoinOptions, NoSubscriberBehavior, PlayerEvent, PlayerStatus,
    VoiceConnection, VoiceTarget, VoiceTransport,
  },
  VoiceError,
};

const PLAYER_EVENT_CAPACITY: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moves the status forward unless the connection has already been destroyed.
fn advance(status: &watch::Sender<ConnectionStatus>, next: ConnectionStatus) {
  status.send_if_modified(|current| {
    if *current == ConnectionStatus::Destroyed || *current == next {
      return false;
    }
    *current = next;
    true
  });
}

/// Voice transport backed by songbird's gateway and driver.
#[derive(Clone)]
pub struct SongbirdTransport {
  manager: Arc<Songbird>,
}

impl SongbirdTransport {
  pub fn new(manager: Arc<Songbird>) -> Self {
    Self { manager }
  }
}

impl VoiceTransport for SongbirdTransport {
  type Connection = SongbirdConnection;
  type Player = SongbirdPlayer;

  fn join(&self, target: VoiceTarget, options: JoinOptions) -> Arc<SongbirdConnection> {
    let (status, _) = watch::channel(ConnectionStatus::Signalling);
    let connection = Arc::new(SongbirdConnection {
      guild_id: target.guild_id,
      channel_id: AtomicU64::new(target.channel_id.get()),
      status: Arc::new(status),
      call: self.manager.get_or_insert(target.guild_id),
      manager: self.manager.clone(),
    });
    connection.spawn_join(target.channel_id, options, true);
    connection
  }

  fn create_player(&self, behavior: NoSubscriberBehavior) -> Arc<SongbirdPlayer> {
    let (events, _) = broadcast::channel(PLAYER_EVENT_CAPACITY);
    Arc::new(SongbirdPlayer {
      behavior,
      shared: Arc::new(PlayerShared {
        call: Mutex::new(None),
        current: Mutex::new(None),
        status: Mutex::new(PlayerStatus::Idle),
        events,
      }),
    })
  }

  fn create_resource(&self, path: &Path) -> Result<Input, VoiceError> {
    if !path.is_file() {
      return Err(VoiceError::MissingFile(path.to_path_buf()));
    }
    Ok(FileInput::new(path.to_path_buf()).into())
  }

  fn subscribe(&self, connection: &SongbirdConnection, player: &Arc<SongbirdPlayer>) {
    *lock(&player.shared.call) = Some(connection.call.clone());
  }
}

pub struct SongbirdConnection {
  guild_id: GuildId,
  channel_id: AtomicU64,
  status: Arc<watch::Sender<ConnectionStatus>>,
  call: Arc<TokioMutex<Call>>,
  manager: Arc<Songbird>,
}

impl SongbirdConnection {
  fn spawn_join(&self, channel_id: ChannelId, options: JoinOptions, first_attempt: bool) {
    let guild_id = self.guild_id;
    let status = self.status.clone();
    let call = self.call.clone();
    let manager = self.manager.clone();

    tokio::spawn(async move {
      if first_attempt {
        let mut handler = call.lock().await;
        for event in [CoreEvent::DriverConnect, CoreEvent::DriverReconnect, CoreEvent::DriverDisconnect] {
          handler.add_global_event(event.into(), DriverStatus { status: status.clone() });
        }
      }

      advance(&status, ConnectionStatus::Connecting);
      match manager.join(guild_id, channel_id).await {
        Ok(call) => {
          let mut handler = call.lock().await;
          if let Err(err) = handler.deafen(options.self_deaf).await {
            warn!(%guild_id, error = %err, "unable to update self-deafen");
          }
          if let Err(err) = handler.mute(options.self_mute).await {
            warn!(%guild_id, error = %err, "unable to update self-mute");
          }
          drop(handler);
          advance(&status, ConnectionStatus::Ready);
        }
        Err(err) => {
          warn!(%guild_id, %channel_id, error = %err, "unable to join voice channel");
          if first_attempt {
            if let Err(err) = manager.remove(guild_id).await {
              debug!(%guild_id, error = %err, "no voice call left to remove");
            }
            status.send_replace(ConnectionStatus::Destroyed);
          } else {
            advance(&status, ConnectionStatus::Disconnected);
          }
        }
      }
    });
  }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
  fn channel_id(&self) -> ChannelId {
    ChannelId::new(self.channel_id.load(Ordering::Relaxed))
  }

  fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
    self.status.subscribe()
  }

  fn rejoin(&self, channel_id: ChannelId, options: JoinOptions) {
    self.channel_id.store(channel_id.get(), Ordering::Relaxed);
    self.spawn_join(channel_id, options, false);
  }

  async fn destroy(&self) {
    if self.status.send_replace(ConnectionStatus::Destroyed) == ConnectionStatus::Destroyed {
      return;
    }
    if let Err(err) = self.manager.remove(self.guild_id).await {
      debug!(guild_id = %self.guild_id, error = %err, "no voice call left to remove");
    }
  }
}

struct DriverStatus {
  status: Arc<watch::Sender<ConnectionStatus>>,
}

#[async_trait]
impl VoiceEventHandler for DriverStatus {
  async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
    match ctx {
      EventContext::DriverConnect(_) | EventContext::DriverReconnect(_) => {
        advance(&self.status, ConnectionStatus::Ready);
      }
      EventContext::DriverDisconnect(_) => {
        advance(&self.status, ConnectionStatus::Disconnected);
      }
      _ => {}
    }
    None
  }
}

/// A per-guild player over the guild's songbird call. Starting a new
/// resource replaces whatever was playing.
pub struct SongbirdPlayer {
  behavior: NoSubscriberBehavior,
  shared: Arc<PlayerShared>,
}

struct PlayerShared {
  call: Mutex<Option<Arc<TokioMutex<Call>>>>,
  current: Mutex<Option<TrackHandle>>,
  status: Mutex<PlayerStatus>,
  events: broadcast::Sender<PlayerEvent>,
}

impl PlayerShared {
  fn set_status(&self, next: PlayerStatus) {
    *lock(&self.status) = next;
    let _ = self.events.send(PlayerEvent::Status(next));
  }

  fn is_current(&self, track: &TrackHandle) -> bool {
    lock(&self.current)
      .as_ref()
      .is_some_and(|current| current.uuid() == track.uuid())
  }

  fn take_if_current(&self, track: &TrackHandle) -> bool {
    let mut current = lock(&self.current);
    if current.as_ref().is_some_and(|current| current.uuid() == track.uuid()) {
      *current = None;
      return true;
    }
    false
  }

  fn finish(&self, track: &TrackHandle) {
    if self.take_if_current(track) {
      self.set_status(PlayerStatus::Idle);
    }
  }

  fn fail(&self, track: &TrackHandle, message: String) {
    if self.take_if_current(track) {
      let _ = self.events.send(PlayerEvent::Error(message));
      self.set_status(PlayerStatus::Idle);
    }
  }
}

impl AudioPlayer for SongbirdPlayer {
  type Resource = Input;

  fn status(&self) -> PlayerStatus {
    *lock(&self.shared.status)
  }

  fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
    self.shared.events.subscribe()
  }

  fn play(&self, resource: Input) {
    self.shared.set_status(PlayerStatus::Buffering);
    let shared = self.shared.clone();
    let behavior = self.behavior;

    tokio::spawn(async move {
      let call = lock(&shared.call).clone();
      let Some(call) = call else {
        match behavior {
          NoSubscriberBehavior::Pause => shared.set_status(PlayerStatus::AutoPaused),
          NoSubscriberBehavior::Stop => shared.set_status(PlayerStatus::Idle),
        }
        return;
      };

      let track = call.lock().await.play_only_input(resource);
      *lock(&shared.current) = Some(track.clone());

      for event in [TrackEvent::Play, TrackEvent::Pause, TrackEvent::End, TrackEvent::Error] {
        let handler = TrackStatus {
          shared: shared.clone(),
          track: track.clone(),
        };
        if let Err(err) = track.add_event(Event::Track(event), handler) {
          debug!(error = ?err, "track ended before its events were attached");
          shared.finish(&track);
          break;
        }
      }
    });
  }

  fn stop(&self) {
    let current = lock(&self.shared.current).take();
    if let Some(track) = current {
      if let Err(err) = track.stop() {
        debug!(error = ?err, "track already stopped");
      }
    }
    self.shared.set_status(PlayerStatus::Idle);
  }
}

struct TrackStatus {
  shared: Arc<PlayerShared>,
  track: TrackHandle,
}

#[async_trait]
impl VoiceEventHandler for TrackStatus {
  async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
    let EventContext::Track(tracks) = ctx else {
      return None;
    };

    for (state, handle) in tracks.iter() {
      if handle.uuid() != self.track.uuid() {
        continue;
      }
      match &state.playing {
        PlayMode::Play if self.shared.is_current(&self.track) => {
          self.shared.set_status(PlayerStatus::Playing);
        }
        PlayMode::Pause if self.shared.is_current(&self.track) => {
          self.shared.set_status(PlayerStatus::Paused);
        }
        PlayMode::Errored(err) => self.shared.fail(&self.track, format!("{err:?}")),
        PlayMode::End | PlayMode::Stop => self.shared.finish(&self.track),
        _ => {}
      }
    }
    None
  }
}
