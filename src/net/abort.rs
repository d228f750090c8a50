//! Abort signalling for in-flight request events.

use tokio::sync::watch;

/// Owner side of an abort signal. Dropping the controller does not abort.
#[derive(Debug)]
pub struct AbortController {
  tx: watch::Sender<bool>,
}

impl AbortController {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx }
  }

  pub fn signal(&self) -> AbortSignal {
    AbortSignal {
      rx: Some(self.tx.subscribe()),
    }
  }

  pub fn abort(&self) {
    self.tx.send_replace(true);
  }
}

impl Default for AbortController {
  fn default() -> Self {
    Self::new()
  }
}

/// Observed by tasks at each suspension point. Once aborted, a task must not
/// write to the cache or the outbox.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
  rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
  /// A signal that can never fire.
  #[cfg(test)]
  pub fn never() -> Self {
    Self { rx: None }
  }

  pub fn is_aborted(&self) -> bool {
    self.rx.as_ref().is_some_and(|rx| *rx.borrow())
  }
}
