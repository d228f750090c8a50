use crate::cache::{CacheManager, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Event, EventHandler};
use crate::lifecycle::{ClientRegistry, Lifecycle};
use crate::net::{AbortSignal, Network, Request};
use crate::outbox::{
  BackgroundSync, OutboxItem, OutboxStore, ReplaySummary, SqliteOutbox, SyncCoordinator,
};
use crate::router::{Outcome, Router};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A cache generation as reported by `status`
#[derive(Debug, Clone)]
pub struct GenerationStatus {
  pub name: String,
  pub entries: usize,
  pub active: bool,
}

/// Snapshot of durable state
#[derive(Debug, Clone)]
pub struct Status {
  pub generations: Vec<GenerationStatus>,
  pub outbox: Vec<OutboxItem>,
}

/// The host: owns every component, constructed once per process.
pub struct App<N: Network> {
  config: Config,
  network: Arc<N>,
  cache: CacheManager<SqliteStorage>,
  sync: Arc<SyncCoordinator<N, SqliteOutbox>>,
  router: Router<N, SqliteStorage, SqliteOutbox>,
  clients: ClientRegistry,
}

impl<N: Network> App<N> {
  pub fn new(config: Config, network: N, background: Arc<dyn BackgroundSync>) -> Result<Self> {
    let db = Database::open(config.database.as_deref())?;
    Self::with_database(config, Arc::new(db), network, background)
  }

  pub fn with_database(
    config: Config,
    db: Arc<Database>,
    network: N,
    background: Arc<dyn BackgroundSync>,
  ) -> Result<Self> {
    let network = Arc::new(network);
    let cache = CacheManager::new(SqliteStorage::new(Arc::clone(&db)));
    let sync = Arc::new(
      SyncCoordinator::new(&config, Arc::clone(&network), SqliteOutbox::new(db))
        .with_background_sync(background),
    );
    let router = Router::new(&config, Arc::clone(&network), cache.clone(), Arc::clone(&sync))?;

    // This process is itself a client of whichever version is active
    let clients = ClientRegistry::new();
    clients.connect(&format!("cli-{}", std::process::id()))?;

    Ok(Self {
      config,
      network,
      cache,
      sync,
      router,
      clients,
    })
  }

  /// Install and activate the configured version.
  pub async fn install(&self) -> Result<Vec<String>> {
    let mut lifecycle = Lifecycle::new(&self.config, self.cache.clone())?;
    lifecycle.deploy(self.network.as_ref(), &self.clients).await
  }

  /// Deploy the configured version unless it is already active. A failed
  /// install is logged; the previous version keeps serving.
  pub async fn ensure_deployed(&self) -> Result<()> {
    let mut lifecycle = Lifecycle::new(&self.config, self.cache.clone())?;
    if !lifecycle.needs_deploy()? {
      return Ok(());
    }
    if let Err(e) = lifecycle.deploy(self.network.as_ref(), &self.clients).await {
      warn!(error = %e, "deployment failed, previous version stays active");
    }
    Ok(())
  }

  /// Route one intercepted request.
  pub async fn fetch(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    self.router.handle(request, signal).await
  }

  /// Run one replay pass now.
  pub async fn replay(&self) -> Result<ReplaySummary> {
    self.sync.replay().await
  }

  pub fn status(&self) -> Result<Status> {
    let active = self.cache.active_static()?;
    let generations = self
      .cache
      .list_generations()?
      .into_iter()
      .map(|name| -> Result<GenerationStatus> {
        let entries = self.cache.open(&name)?.entries()?.len();
        Ok(GenerationStatus {
          active: active.as_deref() == Some(name.as_str()),
          name,
          entries,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Status {
      generations,
      outbox: self.sync.outbox().list_all()?,
    })
  }

  /// Background worker: deliver replay triggers until ctrl-c.
  pub async fn run(&self, mut events: EventHandler) -> Result<()> {
    self.ensure_deployed().await?;
    self.handle_event(Event::Tick).await?;
    info!(tag = %self.sync.sync_tag(), "sync worker running");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("shutting down");
          break;
        }
        event = events.next() => {
          let Some(event) = event else { break };
          // Storage failures end this pass only, the worker keeps going
          if let Err(e) = self.handle_event(event).await {
            error!(error = %e, "replay pass failed");
          }
        }
      }
    }

    Ok(())
  }

  /// A sync event replays when its tag matches; a tick replays only when
  /// something is waiting.
  pub async fn handle_event(&self, event: Event) -> Result<()> {
    match event {
      Event::Sync { tag } => {
        self.sync.on_replay_trigger(&tag).await?;
      }
      Event::Tick => {
        if self.sync.outbox().count()? > 0 {
          self.sync.replay().await?;
        }
      }
    }
    Ok(())
  }
}
