use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::outbox::BackgroundSync;

/// Host events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// A previously registered background sync fired
  Sync { tag: String },
  /// Periodic tick, used as the connectivity-driven replay trigger
  Tick,
}

/// Event handler that merges sync registrations with a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    // Spawn tick timer
    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Handle that background sync registrations post through
  pub fn background_sync(&self) -> ChannelSync {
    ChannelSync {
      tx: self.tx.clone(),
    }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

/// Background sync facility backed by the host event channel.
#[derive(Clone)]
pub struct ChannelSync {
  tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSync {
  /// A facility with nobody listening; every registration fails.
  pub fn detached() -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    Self { tx }
  }
}

impl BackgroundSync for ChannelSync {
  fn register(&self, tag: &str) -> Result<()> {
    self
      .tx
      .send(Event::Sync {
        tag: tag.to_string(),
      })
      .map_err(|_| eyre!("No background sync worker is running"))
  }
}
