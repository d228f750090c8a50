//! Scripted network for tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use url::Url;

use super::abort::AbortController;
use super::types::{Request, Response};
use super::Network;

pub const ORIGIN: &str = "http://app.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN)
    .and_then(|base| base.join(path))
    .unwrap()
}

#[derive(Default)]
struct StubState {
  routes: HashMap<String, Response>,
  redirects: HashMap<String, String>,
  abort_on_fetch: Option<Arc<AbortController>>,
  offline: bool,
  failing: HashSet<String>,
  rejected_bodies: HashSet<Vec<u8>>,
  calls: Vec<Request>,
}

/// Answers from a fixed route table; unknown URLs get a 404.
#[derive(Default)]
pub struct StubNetwork {
  state: Mutex<StubState>,
}

impl StubNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, path: &str, response: Response) {
    let mut state = self.state.lock().unwrap();
    state.routes.insert(url(path).to_string(), response);
  }

  /// Requests for `from` are followed to the route for `to`.
  pub fn redirect(&self, from: &str, to: &str) {
    let mut state = self.state.lock().unwrap();
    state.redirects.insert(url(from).to_string(), url(to).to_string());
  }

  /// Fire `controller` while the next requests are in flight.
  pub fn abort_during_fetch(&self, controller: Arc<AbortController>) {
    self.state.lock().unwrap().abort_on_fetch = Some(controller);
  }

  pub fn set_offline(&self, offline: bool) {
    self.state.lock().unwrap().offline = offline;
  }

  /// Transport failure for one URL only.
  pub fn fail_path(&self, path: &str) {
    let mut state = self.state.lock().unwrap();
    state.failing.insert(url(path).to_string());
  }

  /// Transport failure for any request carrying exactly this body.
  pub fn reject_body(&self, body: &[u8]) {
    let mut state = self.state.lock().unwrap();
    state.rejected_bodies.insert(body.to_vec());
  }

  pub fn accept_all(&self) {
    let mut state = self.state.lock().unwrap();
    state.offline = false;
    state.failing.clear();
    state.rejected_bodies.clear();
  }

  pub fn calls(&self) -> Vec<Request> {
    self.state.lock().unwrap().calls.clone()
  }

  pub fn call_count(&self) -> usize {
    self.state.lock().unwrap().calls.len()
  }
}

impl Network for StubNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(request.clone());

    if let Some(controller) = &state.abort_on_fetch {
      controller.abort();
    }

    let mut key = request.url.to_string();
    let redirected = match state.redirects.get(&key) {
      Some(target) => {
        key = target.clone();
        true
      }
      None => false,
    };
    let rejected = request
      .body
      .as_ref()
      .is_some_and(|b| state.rejected_bodies.contains(b));

    if state.offline || state.failing.contains(&key) || rejected {
      return Err(eyre!("network unreachable: {}", key));
    }

    let mut response = state
      .routes
      .get(&key)
      .cloned()
      .unwrap_or_else(|| Response::new(404, "not found"));
    response.redirected = redirected;
    Ok(response)
  }
}
