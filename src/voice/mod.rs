//! Per-guild voice connection lifecycle.
//!
//! [`VoiceSessionManager`] is the only writer of the connection, player and
//! idle-timer registries. Slash commands and the web API both go through it,
//! and it talks to Discord through the [`VoiceTransport`] seam, implemented
//! for songbird by [`SongbirdTransport`].

mod error;
pub mod idle;
pub mod manager;
pub mod songbird_transport;
pub mod transport;

pub use error::VoiceError;
pub use manager::{
  VoiceSessionManager, CONNECT_TIMEOUT, PLAYBACK_TIMEOUT, READY_TIMEOUT, RECOVERY_WINDOW,
};
pub use songbird_transport::{SongbirdConnection, SongbirdPlayer, SongbirdTransport};
pub use transport::{
  enters_any_state, enters_state, AudioPlayer, ConnectionStatus, JoinOptions,
  NoSubscriberBehavior, PlayerEvent, PlayerStatus, VoiceConnection, VoiceTarget, VoiceTransport,
};
