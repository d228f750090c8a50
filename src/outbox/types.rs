use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// A mutating request waiting for delivery. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxItem {
  /// `{millis:013}_{random}`, so lexical order is enqueue order
  pub id: String,
  pub url: String,
  pub method: String,
  /// Serialized JSON body
  pub body: String,
  pub enqueued_at: DateTime<Utc>,
}

impl OutboxItem {
  pub fn new(id: String, url: &str, body: String) -> Self {
    Self {
      id,
      url: url.to_string(),
      method: "POST".to_string(),
      body,
      enqueued_at: Utc::now(),
    }
  }
}

/// Serialize a captured request body for storage. Bodies that are not valid
/// JSON are stored as `null`.
pub fn serialize_body(body: Option<&[u8]>) -> String {
  body
    .and_then(|b| serde_json::from_slice::<serde_json::Value>(b).ok())
    .unwrap_or(serde_json::Value::Null)
    .to_string()
}

/// Time + random ids, strictly increasing within a process even when two
/// are generated in the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
  last_millis: AtomicI64,
}

impl IdGenerator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn next_id(&self) -> String {
    self.next_at(Utc::now().timestamp_millis())
  }

  fn next_at(&self, now: i64) -> String {
    let millis = match self
      .last_millis
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
      }) {
      Ok(last) | Err(last) => now.max(last + 1),
    };

    let random = Uuid::new_v4().simple().to_string();
    format!("{:013}_{}", millis, &random[..6])
  }
}
