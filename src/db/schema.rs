/// Schema for every durable table.
pub const SCHEMA: &str = r#"
-- Named cache buckets, in creation order
CREATE TABLE IF NOT EXISTS cache_generations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses; rowid preserves insertion order across overwrites
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_type TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);

-- Pending writes, keyed by monotonic id
CREATE TABLE IF NOT EXISTS outbox (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    method TEXT NOT NULL DEFAULT 'POST',
    body TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Small key/value facts (active static generation)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
