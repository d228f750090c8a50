//! Install/activate transitions for one deployed version.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStorage};
use crate::config::Config;
use crate::net::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Pending,
  Installing,
  Installed,
  Activating,
  Active,
  /// Install failed; the previously active version stays authoritative
  Aborted,
}

/// Connected clients that a newly activated version can take over.
pub trait Clients: Send + Sync {
  /// Make `controller` the controller of every connected client.
  /// Returns how many clients were claimed.
  fn claim(&self, controller: &str) -> Result<usize>;
}

/// In-memory registry of connected clients and their controlling version.
#[derive(Debug, Default)]
pub struct ClientRegistry {
  clients: Mutex<BTreeMap<String, Option<String>>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a client that no version controls yet.
  pub fn connect(&self, id: &str) -> Result<()> {
    self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .entry(id.to_string())
      .or_insert(None);
    Ok(())
  }

  #[cfg(test)]
  pub fn controller(&self, id: &str) -> Result<Option<String>> {
    let clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(clients.get(id).cloned().flatten())
  }
}

impl Clients for ClientRegistry {
  fn claim(&self, controller: &str) -> Result<usize> {
    let mut clients = self
      .clients
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for current in clients.values_mut() {
      *current = Some(controller.to_string());
    }
    Ok(clients.len())
  }
}

/// Drives one version through `installing → installed → activating → active`.
pub struct Lifecycle<S: CacheStorage> {
  cache: CacheManager<S>,
  static_name: String,
  static_prefix: String,
  dynamic_name: String,
  manifest: Vec<Url>,
  state: LifecycleState,
}

impl<S: CacheStorage> Lifecycle<S> {
  pub fn new(config: &Config, cache: CacheManager<S>) -> Result<Self> {
    Ok(Self {
      cache,
      static_name: config.cache.static_name(),
      static_prefix: config.cache.static_prefix(),
      dynamic_name: config.cache.dynamic_name(),
      manifest: config.manifest_urls()?,
      state: LifecycleState::Pending,
    })
  }

  #[cfg(test)]
  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// Whether the configured version differs from the last activated one.
  pub fn needs_deploy(&self) -> Result<bool> {
    Ok(self.cache.active_static()?.as_deref() != Some(self.static_name.as_str()))
  }

  /// Precache the manifest into this version's static generation.
  pub async fn install<N: Network>(&mut self, network: &N) -> Result<()> {
    self.state = LifecycleState::Installing;
    info!(generation = %self.static_name, resources = self.manifest.len(), "installing");

    match self
      .cache
      .put_all(&self.static_name, network, &self.manifest)
      .await
    {
      Ok(()) => {
        self.state = LifecycleState::Installed;
        Ok(())
      }
      Err(e) => {
        self.state = LifecycleState::Aborted;
        warn!(generation = %self.static_name, error = %e, "install aborted");
        Err(e.wrap_err(format!("Install of {} aborted", self.static_name)))
      }
    }
  }

  /// Delete every other static generation, then claim all clients.
  /// Returns the names of the deleted generations.
  pub fn activate<C: Clients + ?Sized>(&mut self, clients: &C) -> Result<Vec<String>> {
    if self.state != LifecycleState::Installed {
      return Err(eyre!(
        "Cannot activate {} from state {:?}",
        self.static_name,
        self.state
      ));
    }
    self.state = LifecycleState::Activating;

    let mut deleted = Vec::new();
    for name in self.cache.list_generations()? {
      if name.starts_with(&self.static_prefix)
        && name != self.static_name
        && name != self.dynamic_name
      {
        info!(generation = %name, "deleting old cache");
        self.cache.delete(&name)?;
        deleted.push(name);
      }
    }

    self.cache.set_active_static(&self.static_name)?;
    let claimed = clients.claim(&self.static_name)?;

    self.state = LifecycleState::Active;
    info!(generation = %self.static_name, claimed, "active");
    Ok(deleted)
  }

  /// Install and activate straight away, without waiting for clients to
  /// reload.
  pub async fn deploy<N: Network, C: Clients + ?Sized>(
    &mut self,
    network: &N,
    clients: &C,
  ) -> Result<Vec<String>> {
    self.install(network).await?;
    self.activate(clients)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{RequestKey, SqliteStorage};
  use crate::db::Database;
  use crate::net::testing::{url, StubNetwork, ORIGIN};
  use crate::net::Response;
  use std::sync::Arc;

  fn config(version: &str) -> Config {
    let mut config = Config {
      origin: ORIGIN.to_string(),
      ..Config::default()
    };
    config.cache.version = version.to_string();
    config
  }

  fn network() -> StubNetwork {
    let network = StubNetwork::new();
    for path in Config::default().cache.manifest {
      network.route(&path, Response::new(200, format!("asset {}", path)));
    }
    network
  }

  fn cache() -> CacheManager<SqliteStorage> {
    CacheManager::new(SqliteStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )))
  }

  #[tokio::test]
  async fn test_successive_deployments_leave_one_static_generation() {
    let cache = cache();
    let network = network();
    let clients = ClientRegistry::new();

    let dynamic_key = RequestKey::get(&url("/api/documents"));
    cache
      .put("hospice-dynamic", dynamic_key.clone(), Response::new(200, "[]"))
      .unwrap();

    let mut first = Lifecycle::new(&config("vA"), cache.clone()).unwrap();
    first.deploy(&network, &clients).await.unwrap();
    assert_eq!(first.state(), LifecycleState::Active);

    let mut second = Lifecycle::new(&config("vB"), cache.clone()).unwrap();
    let deleted = second.deploy(&network, &clients).await.unwrap();
    assert_eq!(deleted, vec!["hospice-static-vA"]);

    let mut names = cache.list_generations().unwrap();
    names.sort();
    assert_eq!(names, vec!["hospice-dynamic", "hospice-static-vB"]);
    assert_eq!(
      cache
        .match_entry("hospice-dynamic", &dynamic_key)
        .unwrap()
        .unwrap()
        .response
        .text(),
      "[]"
    );
    assert_eq!(
      cache.active_static().unwrap().as_deref(),
      Some("hospice-static-vB")
    );
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version() {
    let cache = cache();
    let network = network();
    let clients = ClientRegistry::new();

    let mut first = Lifecycle::new(&config("vA"), cache.clone()).unwrap();
    first.deploy(&network, &clients).await.unwrap();

    network.fail_path("/favicon.ico");
    let mut second = Lifecycle::new(&config("vB"), cache.clone()).unwrap();
    assert!(second.deploy(&network, &clients).await.is_err());
    assert_eq!(second.state(), LifecycleState::Aborted);

    assert_eq!(cache.list_generations().unwrap(), vec!["hospice-static-vA"]);
    assert_eq!(
      cache.active_static().unwrap().as_deref(),
      Some("hospice-static-vA")
    );
    assert!(second.needs_deploy().unwrap());
  }

  #[tokio::test]
  async fn test_activation_claims_connected_clients() {
    let cache = cache();
    let network = network();
    let clients = ClientRegistry::new();
    clients.connect("tab-1").unwrap();
    clients.connect("tab-2").unwrap();

    let mut lifecycle = Lifecycle::new(&config("v9"), cache).unwrap();
    assert!(lifecycle.needs_deploy().unwrap());
    lifecycle.deploy(&network, &clients).await.unwrap();

    assert_eq!(
      clients.controller("tab-1").unwrap().as_deref(),
      Some("hospice-static-v9")
    );
    assert_eq!(
      clients.controller("tab-2").unwrap().as_deref(),
      Some("hospice-static-v9")
    );
    assert!(!lifecycle.needs_deploy().unwrap());
  }

  #[test]
  fn test_activate_requires_install() {
    let mut lifecycle = Lifecycle::new(&config("v1"), cache()).unwrap();
    assert!(lifecycle.activate(&ClientRegistry::new()).is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Pending);
  }

  #[tokio::test]
  async fn test_foreign_generations_survive_activation() {
    let cache = cache();
    cache.open("other-app-static-v1").unwrap();
    cache.open("hospice-dynamic").unwrap();

    let mut lifecycle = Lifecycle::new(&config("v2"), cache.clone()).unwrap();
    let deleted = lifecycle
      .deploy(&network(), &ClientRegistry::new())
      .await
      .unwrap();
    assert!(deleted.is_empty());
    assert_eq!(cache.list_generations().unwrap().len(), 3);
  }
}
