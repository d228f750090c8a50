//! Generational response cache for offline support.
//!
//! This module provides:
//! - Named cache generations persisted in SQLite
//! - An all-or-nothing precache of a fixed manifest
//! - Exact lookups by method + URL, with no network involved

mod manager;
mod storage;
mod traits;

pub use manager::{CacheManager, Generation};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, RequestKey};
