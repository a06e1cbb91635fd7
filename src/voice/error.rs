use std::{path::PathBuf, time::Duration};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum VoiceError {
  #[error("voice connection did not reach the expected state within {0:?}")]
  ConnectionTimeout(Duration),

  #[error("voice connection was destroyed")]
  Destroyed,

  #[error("audio playback timeout after {0:?}")]
  PlaybackTimeout(Duration),

  #[error("audio player error: {0}")]
  Player(String),

  #[error("audio player went away before playback finished")]
  PlayerClosed,

  #[error("audio file not found: {}", .0.display())]
  MissingFile(PathBuf),
}
