//! Outbox storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use super::types::OutboxItem;
use crate::db::Database;

/// Durable queue of pending writes. Every method is one atomic transaction.
pub trait OutboxStore: Send + Sync {
  /// Insert a new item.
  fn enqueue(&self, item: &OutboxItem) -> Result<()>;

  /// Every stored item in ascending id order.
  fn list_all(&self) -> Result<Vec<OutboxItem>>;

  /// Delete an item. Removing an absent id is not an error.
  fn remove_by_id(&self, id: &str) -> Result<()>;

  /// Number of stored items.
  fn count(&self) -> Result<usize>;
}

/// SQLite-based outbox.
pub struct SqliteOutbox {
  db: Arc<Database>,
}

impl SqliteOutbox {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl OutboxStore for SqliteOutbox {
  fn enqueue(&self, item: &OutboxItem) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT INTO outbox (id, url, method, body, enqueued_at) VALUES (?, ?, ?, ?, ?)",
        params![
          item.id,
          item.url,
          item.method,
          item.body,
          item.enqueued_at.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue outbox item {}: {}", item.id, e))?;
    Ok(())
  }

  fn list_all(&self) -> Result<Vec<OutboxItem>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT id, url, method, body, enqueued_at FROM outbox ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare outbox query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query outbox: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read outbox item: {}", e))?;

    rows
      .into_iter()
      .map(|(id, url, method, body, enqueued_at)| {
        let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse enqueued_at of {}: {}", id, e))?;
        Ok(OutboxItem {
          id,
          url,
          method,
          body,
          enqueued_at,
        })
      })
      .collect()
  }

  fn remove_by_id(&self, id: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute("DELETE FROM outbox WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove outbox item {}: {}", id, e))?;
    Ok(())
  }

  fn count(&self) -> Result<usize> {
    self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count outbox: {}", e))
  }
}
