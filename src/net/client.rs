use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::types::{Request, Response, ResponseType};
use super::Network;

/// Network transport backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.network.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    // Redirects are followed; the final URL tells whether one happened.
    // Anything that ended up on another origin is a cross-origin response.
    let redirected = response.url() != &request.url;
    let response_type = if response.url().origin() == request.url.origin() {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    };

    let status = response.status();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      response_type,
      redirected,
    })
  }
}
