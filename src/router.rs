//! Per-request classification and caching strategies.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::cache::{CacheManager, CacheResult, CacheStorage, Generation, RequestKey};
use crate::config::Config;
use crate::net::{AbortSignal, Method, Network, Request, Response, ResponseType};
use crate::outbox::{OutboxStore, SyncCoordinator};

/// Body of the synthesized offline response.
pub const UNAVAILABLE_BODY: &str = "Offline - Content not available";

/// What happened to an intercepted request.
#[derive(Debug)]
pub enum Outcome {
  /// Not ours to handle; the host's default behaviour applies
  Ignored,
  /// Answered, with the source of the answer
  Respond(CacheResult<Response>),
  /// Network failed and the cache had nothing for this request
  NotFound,
  /// The request was aborted before completing; nothing was written
  Aborted,
}

impl Outcome {
  #[cfg(test)]
  pub fn response(&self) -> Option<&Response> {
    match self {
      Self::Respond(result) => Some(&result.data),
      _ => None,
    }
  }
}

/// Which path a request takes through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Non-network scheme
  Ignore,
  /// The designated mutating endpoint
  Outbox,
  /// Any other non-GET request
  Passthrough,
  /// GET under the API prefix
  CacheThrough,
  /// Any other GET
  NetworkFirst,
}

/// Plain-text 503 served when neither network nor cache can answer.
pub fn unavailable() -> Response {
  Response::new(503, UNAVAILABLE_BODY)
    .with_header("Content-Type", "text/plain")
    .with_type(ResponseType::Error)
}

/// Stateless classifier that dispatches each request to a strategy.
pub struct Router<N: Network, S: CacheStorage, O: OutboxStore> {
  network: Arc<N>,
  cache: CacheManager<S>,
  dynamic: Generation<S>,
  sync: Arc<SyncCoordinator<N, O>>,
  api_prefix: String,
  endpoint: String,
  root_document: Url,
}

impl<N: Network, S: CacheStorage, O: OutboxStore> Router<N, S, O> {
  pub fn new(
    config: &Config,
    network: Arc<N>,
    cache: CacheManager<S>,
    sync: Arc<SyncCoordinator<N, O>>,
  ) -> Result<Self> {
    let dynamic = cache.open(&config.cache.dynamic_name())?;
    Ok(Self {
      network,
      cache,
      dynamic,
      sync,
      api_prefix: config.api_prefix.clone(),
      endpoint: config.outbox.endpoint.clone(),
      root_document: config.resolve(&config.cache.root_document)?,
    })
  }

  pub fn classify(&self, request: &Request) -> Route {
    if !matches!(request.url.scheme(), "http" | "https") {
      return Route::Ignore;
    }

    if request.method != Method::GET {
      if request.method == Method::POST && request.url.path() == self.endpoint {
        return Route::Outbox;
      }
      return Route::Passthrough;
    }

    if request.url.path().starts_with(&self.api_prefix) {
      Route::CacheThrough
    } else {
      Route::NetworkFirst
    }
  }

  /// Handle one intercepted request.
  pub async fn handle(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    let route = self.classify(request);
    debug!(method = %request.method, url = %request.url, ?route, "routing request");

    match route {
      Route::Ignore => Ok(Outcome::Ignored),
      Route::Outbox => self.sync.handle(request, signal).await,
      Route::Passthrough => self.passthrough(request, signal).await,
      Route::CacheThrough => self.cache_through(request, signal).await,
      Route::NetworkFirst => self.network_first(request, signal).await,
    }
  }

  /// Forward to the network, no caching. Transport errors propagate.
  async fn passthrough(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    let response = self.network.fetch(request).await?;
    if signal.is_aborted() {
      return Ok(Outcome::Aborted);
    }
    Ok(Outcome::Respond(CacheResult::from_network(response)))
  }

  /// Network, mirroring every response into the dynamic generation; on
  /// failure the mirrored copy, or `NotFound`.
  async fn cache_through(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    let key = RequestKey::from(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if signal.is_aborted() {
          return Ok(Outcome::Aborted);
        }
        self.cache.put(self.dynamic.name(), key, response.clone())?;
        Ok(Outcome::Respond(CacheResult::from_network(response)))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        if signal.is_aborted() {
          return Ok(Outcome::Aborted);
        }
        match self.cache.match_entry(self.dynamic.name(), &key)? {
          Some(entry) => Ok(Outcome::Respond(CacheResult::offline(
            entry.response,
            entry.cached_at,
          ))),
          None => Ok(Outcome::NotFound),
        }
      }
    }
  }

  /// Network first; cache only 200 same-origin responses that were not
  /// redirected. Offline fallback order is exact match, root document for
  /// navigations, then 503.
  async fn network_first(&self, request: &Request, signal: &AbortSignal) -> Result<Outcome> {
    let key = RequestKey::from(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if signal.is_aborted() {
          return Ok(Outcome::Aborted);
        }
        if response.status == 200
          && response.response_type == ResponseType::Basic
          && !response.redirected
        {
          self.cache.put(self.dynamic.name(), key, response.clone())?;
        } else {
          debug!(
            url = %request.url,
            status = response.status,
            redirected = response.redirected,
            "not caching response"
          );
        }
        Ok(Outcome::Respond(CacheResult::from_network(response)))
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        if signal.is_aborted() {
          return Ok(Outcome::Aborted);
        }

        if let Some(entry) = self.cache.match_entry(self.dynamic.name(), &key)? {
          return Ok(Outcome::Respond(CacheResult::offline(
            entry.response,
            entry.cached_at,
          )));
        }

        if request.is_navigation() {
          if let Some(entry) = self.cache.match_any(&RequestKey::get(&self.root_document))? {
            return Ok(Outcome::Respond(CacheResult::root_fallback(
              entry.response,
              entry.cached_at,
            )));
          }
        }

        Ok(Outcome::Respond(CacheResult::synthesized(unavailable())))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::db::Database;
  use crate::net::testing::{url, StubNetwork, ORIGIN};
  use crate::net::AbortController;
  use crate::outbox::SqliteOutbox;

  type TestRouter = Router<StubNetwork, SqliteStorage, SqliteOutbox>;

  struct Fixture {
    router: TestRouter,
    network: Arc<StubNetwork>,
    cache: CacheManager<SqliteStorage>,
    config: Config,
  }

  fn fixture() -> Fixture {
    let config = Config {
      origin: ORIGIN.to_string(),
      ..Config::default()
    };
    let db = Arc::new(Database::open_in_memory().unwrap());
    let network = Arc::new(StubNetwork::new());
    let cache = CacheManager::new(SqliteStorage::new(Arc::clone(&db)));
    let sync = Arc::new(SyncCoordinator::new(
      &config,
      Arc::clone(&network),
      SqliteOutbox::new(db),
    ));
    let router = Router::new(&config, Arc::clone(&network), cache.clone(), sync).unwrap();
    Fixture {
      router,
      network,
      cache,
      config,
    }
  }

  fn never() -> AbortSignal {
    AbortSignal::never()
  }

  #[test]
  fn test_classification() {
    let f = fixture();
    let r = &f.router;

    let ext = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
    assert_eq!(r.classify(&ext), Route::Ignore);

    let send = Request::post_json(url("/api/chat/send"), b"{}".to_vec());
    assert_eq!(r.classify(&send), Route::Outbox);

    let upload = Request::post_json(url("/api/documents/upload"), b"{}".to_vec());
    assert_eq!(r.classify(&upload), Route::Passthrough);

    let mut put_send = Request::post_json(url("/api/chat/send"), b"{}".to_vec());
    put_send.method = Method::PUT;
    assert_eq!(r.classify(&put_send), Route::Passthrough);

    assert_eq!(r.classify(&Request::get(url("/api/documents"))), Route::CacheThrough);
    assert_eq!(r.classify(&Request::get(url("/about"))), Route::NetworkFirst);
  }

  #[tokio::test]
  async fn test_api_get_served_from_cache_during_outage() {
    let f = fixture();
    f.network
      .route("/api/documents", Response::new(200, r#"[{"id":1}]"#));
    let request = Request::get(url("/api/documents"));

    let online = f.router.handle(&request, &never()).await.unwrap();
    assert_eq!(online.response().unwrap().text(), r#"[{"id":1}]"#);

    f.network.set_offline(true);
    let offline = f.router.handle(&request, &never()).await.unwrap();
    match offline {
      Outcome::Respond(result) => {
        assert_eq!(result.source, CacheSource::Offline);
        assert_eq!(result.data.text(), r#"[{"id":1}]"#);
      }
      other => panic!("expected cached response, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_api_get_without_prior_fetch_is_not_found() {
    let f = fixture();
    f.network.set_offline(true);

    let outcome = f
      .router
      .handle(&Request::get(url("/api/documents/7")), &never())
      .await
      .unwrap();
    assert!(matches!(outcome, Outcome::NotFound));
  }

  #[tokio::test]
  async fn test_api_cache_overwritten_by_newer_fetch() {
    let f = fixture();
    let request = Request::get(url("/api/health"));
    f.network.route("/api/health", Response::new(200, "old"));
    f.router.handle(&request, &never()).await.unwrap();
    f.network.route("/api/health", Response::new(200, "new"));
    f.router.handle(&request, &never()).await.unwrap();

    f.network.set_offline(true);
    let outcome = f.router.handle(&request, &never()).await.unwrap();
    assert_eq!(outcome.response().unwrap().text(), "new");
  }

  #[tokio::test]
  async fn test_navigation_falls_back_to_root_document() {
    let f = fixture();
    f.cache
      .put(
        &f.config.cache.static_name(),
        RequestKey::get(&url("/index.html")),
        Response::new(200, "<html>app</html>"),
      )
      .unwrap();
    f.network.set_offline(true);

    let outcome = f
      .router
      .handle(&Request::navigate(url("/documents/42")), &never())
      .await
      .unwrap();
    match outcome {
      Outcome::Respond(result) => {
        assert_eq!(result.source, CacheSource::RootDocument);
        assert_eq!(result.data.text(), "<html>app</html>");
      }
      other => panic!("expected root document, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_subresource_outage_synthesizes_503() {
    let f = fixture();
    f.network.set_offline(true);

    let outcome = f
      .router
      .handle(&Request::get(url("/assets/app.js")), &never())
      .await
      .unwrap();
    let response = outcome.response().unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert_eq!(response.text(), UNAVAILABLE_BODY);
  }

  #[tokio::test]
  async fn test_network_first_prefers_exact_cached_match() {
    let f = fixture();
    f.network.route("/about", Response::new(200, "about page"));
    let request = Request::navigate(url("/about"));
    f.router.handle(&request, &never()).await.unwrap();

    f.network.set_offline(true);
    let outcome = f.router.handle(&request, &never()).await.unwrap();
    match outcome {
      Outcome::Respond(result) => {
        assert_eq!(result.source, CacheSource::Offline);
        assert_eq!(result.data.text(), "about page");
      }
      other => panic!("expected cached page, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_network_first_skips_non_cacheable_responses() {
    let f = fixture();
    f.network.route(
      "/cdn/font.woff",
      Response::new(200, "font").with_type(ResponseType::Cors),
    );
    f.network.route("/moved", Response::new(302, ""));

    for path in ["/cdn/font.woff", "/moved", "/missing"] {
      let outcome = f
        .router
        .handle(&Request::get(url(path)), &never())
        .await
        .unwrap();
      assert!(outcome.response().is_some());
    }

    let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
    assert!(dynamic.entries().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_passthrough_does_not_cache() {
    let f = fixture();
    f.network
      .route("/api/documents/upload", Response::new(201, "created"));

    let request = Request::post_json(url("/api/documents/upload"), b"{}".to_vec());
    let outcome = f.router.handle(&request, &never()).await.unwrap();
    assert_eq!(outcome.response().unwrap().status, 201);

    let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
    assert!(dynamic.entries().unwrap().is_empty());

    f.network.set_offline(true);
    assert!(f.router.handle(&request, &never()).await.is_err());
  }

  #[tokio::test]
  async fn test_ignored_scheme_never_touches_network() {
    let f = fixture();
    let request = Request::get(Url::parse("data:text/plain,hello").unwrap());
    let outcome = f.router.handle(&request, &never()).await.unwrap();
    assert!(matches!(outcome, Outcome::Ignored));
    assert_eq!(f.network.call_count(), 0);
  }

  #[tokio::test]
  async fn test_aborted_request_writes_nothing() {
    let f = fixture();
    f.network.route("/api/documents", Response::new(200, "[]"));
    let controller = AbortController::new();
    controller.abort();

    let outcome = f
      .router
      .handle(&Request::get(url("/api/documents")), &controller.signal())
      .await
      .unwrap();
    assert!(matches!(outcome, Outcome::Aborted));

    let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
    assert!(dynamic.entries().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_redirected_response_is_not_cached() {
    let f = fixture();
    f.network.route("/login", Response::new(200, "login page"));
    f.network.redirect("/old", "/login");
    let request = Request::navigate(url("/old"));

    let outcome = f.router.handle(&request, &never()).await.unwrap();
    let response = outcome.response().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.redirected);

    let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
    assert!(dynamic.entries().unwrap().is_empty());

    f.network.set_offline(true);
    let offline = f.router.handle(&request, &never()).await.unwrap();
    assert_eq!(offline.response().unwrap().status, 503);
  }

  #[tokio::test]
  async fn test_abort_during_fetch_writes_nothing() {
    for path in ["/api/documents", "/about"] {
      let f = fixture();
      f.network.route(path, Response::new(200, "fresh"));
      let controller = Arc::new(AbortController::new());
      f.network.abort_during_fetch(Arc::clone(&controller));

      let outcome = f
        .router
        .handle(&Request::get(url(path)), &controller.signal())
        .await
        .unwrap();
      assert!(matches!(outcome, Outcome::Aborted), "{}", path);

      let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
      assert!(dynamic.entries().unwrap().is_empty(), "{}", path);
    }
  }

  #[tokio::test]
  async fn test_abort_during_failed_fetch_skips_fallback() {
    for path in ["/api/documents", "/about"] {
      let f = fixture();
      f.cache
        .put(
          &f.config.cache.dynamic_name(),
          RequestKey::get(&url(path)),
          Response::new(200, "stale"),
        )
        .unwrap();
      f.network.set_offline(true);
      let controller = Arc::new(AbortController::new());
      f.network.abort_during_fetch(Arc::clone(&controller));

      let outcome = f
        .router
        .handle(&Request::navigate(url(path)), &controller.signal())
        .await
        .unwrap();
      assert!(matches!(outcome, Outcome::Aborted), "{}", path);

      let dynamic = f.cache.open(&f.config.cache.dynamic_name()).unwrap();
      let entries = dynamic.entries().unwrap();
      assert_eq!(entries.len(), 1, "{}", path);
      assert_eq!(entries[0].response.text(), "stale");
    }
  }
}
