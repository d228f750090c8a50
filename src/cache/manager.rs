//! Cache manager: named generations and their contents.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CachedEntry, RequestKey};
use crate::net::{Network, Request, Response};

/// Owns every cache generation. Constructed once per process and shared by
/// cloning.
pub struct CacheManager<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheManager<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Handle to the named generation, creating it if absent.
  pub fn open(&self, name: &str) -> Result<Generation<S>> {
    self.storage.create_generation(name)?;
    Ok(Generation {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
    })
  }

  /// Fetch every URL and store the responses into `name`.
  ///
  /// All-or-nothing: if any fetch errors or answers with a non-2xx status,
  /// nothing is written and the generation is not created.
  pub async fn put_all<N: Network>(&self, name: &str, network: &N, urls: &[Url]) -> Result<()> {
    let requests: Vec<Request> = urls.iter().cloned().map(Request::get).collect();

    let responses = try_join_all(requests.iter().map(|request| fetch_ok(network, request))).await?;

    let entries: Vec<(RequestKey, Response)> = requests
      .iter()
      .map(RequestKey::from)
      .zip(responses)
      .collect();

    self.storage.put_entries(name, &entries)?;
    debug!(generation = name, count = entries.len(), "precached");
    Ok(())
  }

  /// Exact lookup in one generation. No network.
  pub fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.get_entry(name, key)
  }

  /// First match across all generations, oldest generation first.
  pub fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    for name in self.storage.generation_names()? {
      if let Some(entry) = self.storage.get_entry(&name, key)? {
        return Ok(Some(entry));
      }
    }
    Ok(None)
  }

  /// Insert or overwrite one entry. The response is taken by value; callers
  /// that also return it must clone first.
  pub fn put(&self, name: &str, key: RequestKey, response: Response) -> Result<()> {
    self.storage.put_entries(name, &[(key, response)])
  }

  pub fn list_generations(&self) -> Result<Vec<String>> {
    self.storage.generation_names()
  }

  /// Returns whether the generation existed.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_generation(name)
  }

  /// Name of the static generation adopted by the last completed activation.
  pub fn active_static(&self) -> Result<Option<String>> {
    self.storage.get_meta(ACTIVE_STATIC_KEY)
  }

  pub fn set_active_static(&self, name: &str) -> Result<()> {
    self.storage.set_meta(ACTIVE_STATIC_KEY, name)
  }
}

/// Fetch that also treats a non-2xx status as failure.
async fn fetch_ok<N: Network>(network: &N, request: &Request) -> Result<Response> {
  let response = network.fetch(request).await?;
  if !response.ok() {
    return Err(eyre!(
      "Precache of {} answered {} {}",
      request.url,
      response.status,
      response.status_text
    ));
  }
  Ok(response)
}

const ACTIVE_STATIC_KEY: &str = "active_static_generation";

impl<S: CacheStorage> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Handle to a single open generation.
pub struct Generation<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> Generation<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn entries(&self) -> Result<Vec<CachedEntry>> {
    self.storage.entries(&self.name)
  }
}

impl<S: CacheStorage> Clone for Generation<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}
