use std::{
  future::Future,
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use tokio::task::AbortHandle;

/// Identifies one scheduled timer so a late expiry can tell whether it was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken(u64);

struct PendingTimer {
  token: TimerToken,
  handle: AbortHandle,
}

/// One optional disconnect countdown per guild.
pub struct IdleTimers {
  timeout: Option<Duration>,
  pending: DashMap<GuildId, PendingTimer>,
  next_token: AtomicU64,
}

impl IdleTimers {
  pub fn new(timeout: Option<Duration>) -> Self {
    Self {
      timeout: timeout.filter(|timeout| !timeout.is_zero()),
      pending: DashMap::new(),
      next_token: AtomicU64::new(0),
    }
  }

  pub fn timeout(&self) -> Option<Duration> {
    self.timeout
  }

  /// Replaces the guild's countdown. `on_expiry` receives the new timer's token
  /// and its future runs once the timeout elapses. Returns false when idle
  /// disconnects are disabled.
  pub fn schedule<F, Fut>(&self, guild_id: GuildId, on_expiry: F) -> bool
  where
    F: FnOnce(TimerToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let Some(timeout) = self.timeout else {
      return false;
    };

    let token = TimerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
    let expiry = on_expiry(token);
    let task = tokio::spawn(async move {
      tokio::time::sleep(timeout).await;
      expiry.await;
    });

    let timer = PendingTimer {
      token,
      handle: task.abort_handle(),
    };
    if let Some(previous) = self.pending.insert(guild_id, timer) {
      previous.handle.abort();
    }
    true
  }

  pub fn cancel(&self, guild_id: GuildId) -> bool {
    match self.pending.remove(&guild_id) {
      Some((_, timer)) => {
        timer.handle.abort();
        true
      }
      None => false,
    }
  }

  /// Removes the timer if it is still the one identified by `token`.
  /// Called from the expiring task itself, so nothing is aborted.
  pub fn claim(&self, guild_id: GuildId, token: TimerToken) -> bool {
    self
      .pending
      .remove_if(&guild_id, |_, timer| timer.token == token)
      .is_some()
  }

  pub fn is_pending(&self, guild_id: GuildId) -> bool {
    self.pending.contains_key(&guild_id)
  }
}

impl Drop for IdleTimers {
  fn drop(&mut self) {
    for timer in self.pending.iter() {
      timer.handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    pin::Pin,
    sync::{
      atomic::{AtomicUsize, Ordering},
      Arc,
    },
  };

  type Expiry = Pin<Box<dyn Future<Output = ()> + Send>>;

  fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(TimerToken) -> Expiry {
    let counter = counter.clone();
    move |_| {
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
      })
    }
  }

  #[tokio::test(start_paused = true)]
  async fn disabled_timeout_never_schedules() {
    let timers = IdleTimers::new(None);
    let fired = Arc::new(AtomicUsize::new(0));
    assert!(!timers.schedule(GuildId::new(1), counting(&fired)));
    assert!(!timers.is_pending(GuildId::new(1)));

    let zero = IdleTimers::new(Some(Duration::ZERO));
    assert_eq!(zero.timeout(), None);
  }

  #[tokio::test(start_paused = true)]
  async fn rescheduling_replaces_the_previous_timer() {
    let timers = IdleTimers::new(Some(Duration::from_secs(10)));
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let guild = GuildId::new(7);

    assert!(timers.schedule(guild, counting(&first)));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(timers.schedule(guild, counting(&second)));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_stops_a_pending_timer() {
    let timers = IdleTimers::new(Some(Duration::from_secs(3)));
    let fired = Arc::new(AtomicUsize::new(0));
    let guild = GuildId::new(2);

    timers.schedule(guild, counting(&fired));
    assert!(timers.cancel(guild));
    assert!(!timers.cancel(guild));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn claim_only_matches_the_current_token() {
    let timers = IdleTimers::new(Some(Duration::from_secs(60)));
    let guild = GuildId::new(3);
    let mut tokens = Vec::new();

    timers.schedule(guild, |token| {
      tokens.push(token);
      std::future::ready(())
    });
    timers.schedule(guild, |token| {
      tokens.push(token);
      std::future::ready(())
    });

    assert!(!timers.claim(guild, tokens[0]));
    assert!(timers.claim(guild, tokens[1]));
    assert!(!timers.is_pending(guild));
  }
}
