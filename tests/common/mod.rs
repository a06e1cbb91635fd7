#![allow(dead_code)]

use std::{
  path::{Path, PathBuf},
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
  },
};

use button_gremlin::voice::{
  AudioPlayer, ConnectionStatus, JoinOptions, NoSubscriberBehavior, PlayerEvent, PlayerStatus,
  VoiceConnection, VoiceError, VoiceTarget, VoiceTransport,
};
use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;
use tokio::sync::{broadcast, watch};

/// Lets spawned tasks run without moving the paused clock.
pub async fn settle() {
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
}

/// In-memory voice transport. Joins become ready on their own unless the
/// transport was built with [`FakeTransport::manual`].
#[derive(Clone, Default)]
pub struct FakeTransport {
  state: Arc<TransportState>,
}

#[derive(Default)]
struct TransportState {
  manual: AtomicBool,
  connections: Mutex<Vec<Arc<FakeConnection>>>,
  players: Mutex<Vec<Arc<FakePlayer>>>,
}

impl FakeTransport {
  pub fn manual() -> Self {
    let transport = Self::default();
    transport.state.manual.store(true, Ordering::SeqCst);
    transport
  }

  pub fn join_count(&self) -> usize {
    self.state.connections.lock().unwrap().len()
  }

  pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
    self.state.connections.lock().unwrap().clone()
  }

  pub fn last_connection(&self) -> Arc<FakeConnection> {
    self.connections().pop().expect("no join happened")
  }

  pub fn players(&self) -> Vec<Arc<FakePlayer>> {
    self.state.players.lock().unwrap().clone()
  }

  pub fn player(&self) -> Arc<FakePlayer> {
    self.players().pop().expect("no player was created")
  }
}

impl VoiceTransport for FakeTransport {
  type Connection = FakeConnection;
  type Player = FakePlayer;

  fn join(&self, target: VoiceTarget, options: JoinOptions) -> Arc<FakeConnection> {
    let (status, _) = watch::channel(ConnectionStatus::Signalling);
    let connection = Arc::new(FakeConnection {
      guild_id: target.guild_id,
      channel_id: Mutex::new(target.channel_id),
      options,
      status,
      rejoins: Mutex::new(Vec::new()),
      destroyed: AtomicUsize::new(0),
    });
    self.state.connections.lock().unwrap().push(connection.clone());

    if !self.state.manual.load(Ordering::SeqCst) {
      let joining = connection.clone();
      tokio::spawn(async move {
        joining.set_status(ConnectionStatus::Connecting);
        joining.set_status(ConnectionStatus::Ready);
      });
    }
    connection
  }

  fn create_player(&self, behavior: NoSubscriberBehavior) -> Arc<FakePlayer> {
    let (events, _) = broadcast::channel(16);
    let player = Arc::new(FakePlayer {
      behavior,
      status: Mutex::new(PlayerStatus::Idle),
      events,
      plays: Mutex::new(Vec::new()),
      stops: AtomicUsize::new(0),
      subscribed_to: Mutex::new(None),
    });
    self.state.players.lock().unwrap().push(player.clone());
    player
  }

  fn create_resource(&self, path: &Path) -> Result<PathBuf, VoiceError> {
    if path.file_stem().is_some_and(|stem| stem == "missing") {
      return Err(VoiceError::MissingFile(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
  }

  fn subscribe(&self, connection: &FakeConnection, player: &Arc<FakePlayer>) {
    *player.subscribed_to.lock().unwrap() = Some(connection.guild_id);
  }
}

#[derive(Debug)]
pub struct FakeConnection {
  guild_id: GuildId,
  channel_id: Mutex<ChannelId>,
  options: JoinOptions,
  status: watch::Sender<ConnectionStatus>,
  rejoins: Mutex<Vec<ChannelId>>,
  destroyed: AtomicUsize,
}

impl FakeConnection {
  pub fn set_status(&self, status: ConnectionStatus) {
    self.status.send_replace(status);
  }

  pub fn options(&self) -> JoinOptions {
    self.options
  }

  pub fn rejoins(&self) -> Vec<ChannelId> {
    self.rejoins.lock().unwrap().clone()
  }

  /// How many times this connection actually went from alive to destroyed.
  pub fn destroy_count(&self) -> usize {
    self.destroyed.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
  fn channel_id(&self) -> ChannelId {
    *self.channel_id.lock().unwrap()
  }

  fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
    self.status.subscribe()
  }

  fn rejoin(&self, channel_id: ChannelId, _options: JoinOptions) {
    *self.channel_id.lock().unwrap() = channel_id;
    self.rejoins.lock().unwrap().push(channel_id);
  }

  async fn destroy(&self) {
    if self.status.send_replace(ConnectionStatus::Destroyed) != ConnectionStatus::Destroyed {
      self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
  }
}

pub struct FakePlayer {
  behavior: NoSubscriberBehavior,
  status: Mutex<PlayerStatus>,
  events: broadcast::Sender<PlayerEvent>,
  plays: Mutex<Vec<PathBuf>>,
  stops: AtomicUsize,
  subscribed_to: Mutex<Option<GuildId>>,
}

impl FakePlayer {
  fn set_status(&self, status: PlayerStatus) {
    *self.status.lock().unwrap() = status;
    let _ = self.events.send(PlayerEvent::Status(status));
  }

  pub fn behavior(&self) -> NoSubscriberBehavior {
    self.behavior
  }

  /// The clip ran to its end.
  pub fn finish(&self) {
    self.set_status(PlayerStatus::Idle);
  }

  pub fn fail(&self, message: &str) {
    let _ = self.events.send(PlayerEvent::Error(message.to_string()));
    self.set_status(PlayerStatus::Idle);
  }

  pub fn plays(&self) -> Vec<PathBuf> {
    self.plays.lock().unwrap().clone()
  }

  pub fn stop_count(&self) -> usize {
    self.stops.load(Ordering::SeqCst)
  }

  pub fn subscribed_to(&self) -> Option<GuildId> {
    *self.subscribed_to.lock().unwrap()
  }
}

impl AudioPlayer for FakePlayer {
  type Resource = PathBuf;

  fn status(&self) -> PlayerStatus {
    *self.status.lock().unwrap()
  }

  fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
    self.events.subscribe()
  }

  fn play(&self, resource: PathBuf) {
    self.plays.lock().unwrap().push(resource);
    self.set_status(PlayerStatus::Buffering);
    self.set_status(PlayerStatus::Playing);
  }

  fn stop(&self) {
    self.stops.fetch_add(1, Ordering::SeqCst);
    self.set_status(PlayerStatus::Idle);
  }
}
