use url::Url;

pub use reqwest::Method;

/// How the request was initiated by its client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full document load
  Navigate,
  /// Subresource or API call
  #[default]
  Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      headers: Vec::new(),
      body: None,
    }
  }

  /// A GET issued as a top-level document load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn post_json(url: Url, body: Vec<u8>) -> Self {
    Self {
      method: Method::POST,
      url,
      mode: RequestMode::default(),
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
    }
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Response classification, mirroring what a browser exposes as `Response.type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  #[default]
  Basic,
  /// Cross-origin response
  Cors,
  /// Cross-origin response whose contents cannot be inspected
  Opaque,
  /// Produced locally, never came from the network
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(Self::Basic),
      "cors" => Some(Self::Cors),
      "opaque" => Some(Self::Opaque),
      "error" => Some(Self::Error),
      _ => None,
    }
  }
}

/// A fully buffered response.
///
/// The body is owned, so handing one copy to a cache and another to the
/// caller is an explicit `clone()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
  /// The transport followed at least one redirect to produce this response
  pub redirected: bool,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Vec::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
      redirected: false,
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Case-insensitive header lookup.
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
