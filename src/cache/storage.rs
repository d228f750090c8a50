//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use super::traits::{CachedEntry, RequestKey};
use crate::db::Database;
use crate::net::{Response, ResponseType};

/// Trait for cache storage backends.
///
/// Every method is a single atomic transaction.
pub trait CacheStorage: Send + Sync {
  /// Create the named generation if absent.
  fn create_generation(&self, name: &str) -> Result<()>;

  /// Names of all generations, oldest first.
  fn generation_names(&self) -> Result<Vec<String>>;

  /// Drop a generation and its entries. Returns whether it existed.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  /// Exact lookup of one entry.
  fn get_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite entries, creating the generation if needed.
  /// Either all entries are written or none are.
  fn put_entries(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// All entries of a generation in insertion order.
  fn entries(&self, generation: &str) -> Result<Vec<CachedEntry>>;

  /// Read a metadata value.
  fn get_meta(&self, key: &str) -> Result<Option<String>>;

  /// Write a metadata value.
  fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const ENTRY_COLUMNS: &str =
  "method, url, status, status_text, response_type, headers, body, cached_at";

/// Columns as read straight from a row, before decoding.
struct RawEntry {
  method: String,
  url: String,
  status: u16,
  status_text: String,
  response_type: String,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl RawEntry {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      method: row.get(0)?,
      url: row.get(1)?,
      status: row.get(2)?,
      status_text: row.get(3)?,
      response_type: row.get(4)?,
      headers: row.get(5)?,
      body: row.get(6)?,
      cached_at: row.get(7)?,
    })
  }

  fn decode(self) -> Result<CachedEntry> {
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", self.url, e))?;
    let response_type = ResponseType::parse(&self.response_type)
      .ok_or_else(|| eyre!("Unknown response type '{}'", self.response_type))?;

    Ok(CachedEntry {
      response: Response {
        status: self.status,
        status_text: self.status_text,
        headers,
        body: self.body,
        response_type,
        redirected: false,
      },
      cached_at: parse_datetime(&self.cached_at)?,
      key: RequestKey {
        method: self.method,
        url: self.url,
      },
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn create_generation(&self, name: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache generation {}: {}", name, e))?;
    Ok(())
  }

  fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_generations ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache generation: {}", e))?;

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![name],
      )
      .map_err(|e| eyre!("Failed to delete cache generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get_entry(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.db.conn()?;
    let raw = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries WHERE generation = ? AND key_hash = ?",
          ENTRY_COLUMNS
        ),
        params![generation, key.cache_hash()],
        RawEntry::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.description(), e))?;

    raw.map(RawEntry::decode).transpose()
  }

  fn put_entries(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

      // Upsert keeps the original rowid, so an overwrite keeps its position.
      tx.execute(
        "INSERT INTO cache_entries
           (generation, key_hash, method, url, status, status_text, response_type, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
         ON CONFLICT (generation, key_hash) DO UPDATE SET
           status = excluded.status,
           status_text = excluded.status_text,
           response_type = excluded.response_type,
           headers = excluded.headers,
           body = excluded.body,
           cached_at = excluded.cached_at",
        params![
          generation,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          response.status_text,
          response.response_type.as_str(),
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key.description(), e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, generation: &str) -> Result<Vec<CachedEntry>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM cache_entries WHERE generation = ? ORDER BY rowid",
        ENTRY_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let raw = stmt
      .query_map(params![generation], RawEntry::from_row)
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    raw.into_iter().map(RawEntry::decode).collect()
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    self
      .db
      .conn()?
      .query_row(
        "SELECT value FROM meta WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
