//! Sync coordinator: queues failed writes and replays them on trigger.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::store::OutboxStore;
use super::types::{serialize_body, IdGenerator, OutboxItem};
use crate::cache::CacheResult;
use crate::config::Config;
use crate::net::{AbortSignal, Method, Network, Request, Response};
use crate::router::Outcome;

/// Body of the acknowledgement returned for a queued write.
pub const QUEUED_BODY: &str = r#"{"success":true,"queued":true}"#;

/// Host facility that delivers a replay trigger later.
pub trait BackgroundSync: Send + Sync {
  /// Ask the host to fire `tag` once it sees fit.
  fn register(&self, tag: &str) -> Result<()>;
}

/// 202 acknowledgement for a write held in the outbox.
pub fn queued_ack() -> Response {
  Response::new(202, QUEUED_BODY).with_header("Content-Type", "application/json")
}

/// Counts from one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
  pub attempted: usize,
  pub delivered: usize,
}

impl ReplaySummary {
  pub fn failed(&self) -> usize {
    self.attempted - self.delivered
  }
}

/// Captures failed writes to the designated endpoint and replays them.
///
/// Holds no items in memory: every pass re-reads the store.
pub struct SyncCoordinator<N: Network, O: OutboxStore> {
  network: Arc<N>,
  outbox: O,
  background: Option<Arc<dyn BackgroundSync>>,
  ids: IdGenerator,
  sync_tag: String,
}

impl<N: Network, O: OutboxStore> SyncCoordinator<N, O> {
  pub fn new(config: &Config, network: Arc<N>, outbox: O) -> Self {
    Self {
      network,
      outbox,
      background: None,
      ids: IdGenerator::new(),
      sync_tag: config.outbox.sync_tag.clone(),
    }
  }

  /// Attach the host's background sync facility.
  pub fn with_background_sync(mut self, background: Arc<dyn BackgroundSync>) -> Self {
    self.background = Some(background);
    self
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }

  pub fn outbox(&self) -> &O {
    &self.outbox
  }

  /// Deliver now, or queue and acknowledge with 202 if the network is down.
  ///
  /// HTTP error statuses are returned as-is; only transport failures queue.
  pub async fn handle(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    let failure = match self.network.fetch(request).await {
      Ok(response) => {
        if signal.is_aborted() {
          return Ok(Outcome::Aborted);
        }
        return Ok(Outcome::Respond(CacheResult::from_network(response)));
      }
      Err(e) => e,
    };

    if signal.is_aborted() {
      return Ok(Outcome::Aborted);
    }

    let item = OutboxItem::new(
      self.ids.next_id(),
      request.url.as_str(),
      serialize_body(request.body.as_deref()),
    );
    self.outbox.enqueue(&item)?;
    info!(id = %item.id, url = %item.url, error = %failure, "write queued for replay");

    self.request_replay();

    Ok(Outcome::Respond(CacheResult::queued(queued_ack())))
  }

  /// Best-effort; a missing or failing facility is tolerated.
  fn request_replay(&self) {
    match &self.background {
      Some(background) => {
        if let Err(e) = background.register(&self.sync_tag) {
          debug!(tag = %self.sync_tag, error = %e, "background sync unavailable");
        }
      }
      None => debug!(tag = %self.sync_tag, "no background sync facility"),
    }
  }

  /// Entry point for host-delivered triggers. Other tags are ignored.
  pub async fn on_replay_trigger(&self, tag: &str) -> Result<Option<ReplaySummary>> {
    if tag != self.sync_tag {
      debug!(tag, "ignoring unrelated sync trigger");
      return Ok(None);
    }
    self.replay().await.map(Some)
  }

  /// One replay pass over every stored item, oldest first.
  ///
  /// A delivered item is removed before the next is attempted. Failed items
  /// stay for the next pass; the pass itself never stops early on a
  /// delivery failure.
  pub async fn replay(&self) -> Result<ReplaySummary> {
    let items = self.outbox.list_all()?;
    let mut summary = ReplaySummary::default();

    for item in items {
      summary.attempted += 1;
      if self.deliver(&item).await {
        self.outbox.remove_by_id(&item.id)?;
        summary.delivered += 1;
      }
    }

    if summary.attempted > 0 {
      info!(
        attempted = summary.attempted,
        delivered = summary.delivered,
        failed = summary.failed(),
        "replay pass finished"
      );
    }
    Ok(summary)
  }

  async fn deliver(&self, item: &OutboxItem) -> bool {
    let url = match Url::parse(&item.url) {
      Ok(url) => url,
      Err(e) => {
        warn!(id = %item.id, error = %e, "stored URL is invalid");
        return false;
      }
    };

    let mut request = Request::post_json(url, item.body.clone().into_bytes());
    if let Ok(method) = Method::from_bytes(item.method.as_bytes()) {
      request.method = method;
    }

    match self.network.fetch(&request).await {
      Ok(response) if response.ok() => {
        debug!(id = %item.id, status = response.status, "delivered");
        true
      }
      Ok(response) => {
        warn!(id = %item.id, status = response.status, "delivery rejected");
        false
      }
      Err(e) => {
        warn!(id = %item.id, error = %e, "delivery failed");
        false
      }
    }
  }
}
