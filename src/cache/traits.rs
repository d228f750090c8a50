//! Core types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Method, Request, Response};

/// Identity of a cached response: method plus URL (fragment ignored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.to_string(),
    }
  }

  /// Key for a plain GET of `url`.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// SHA256 hash for stable, fixed-length row keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

impl From<&Request> for RequestKey {
  fn from(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }
}

/// A response held in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub key: RequestKey,
  pub response: Response,
  /// When the entry was last written
  pub cached_at: DateTime<Utc>,
}

/// Result of serving a request, including metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Network unavailable, exact cached match.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Network unavailable, root document served for a navigation.
  pub fn root_fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::RootDocument,
      cached_at: Some(cached_at),
    }
  }

  /// Produced locally without network or cache.
  pub fn synthesized(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthesized,
      cached_at: None,
    }
  }

  /// Write accepted into the outbox for later delivery.
  pub fn queued(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Queued,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Offline mode - exact match from the dynamic generation
  Offline,
  /// Offline navigation answered with the cached root document
  RootDocument,
  /// Offline placeholder built locally
  Synthesized,
  /// Acknowledgement for a write held in the outbox
  Queued,
}
