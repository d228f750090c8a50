//! Durable outbox for writes issued while disconnected.
//!
//! Delivery is at-least-once: a crash between a successful replay and the
//! item's removal re-sends that item on the next pass.

mod store;
mod sync;
mod types;

pub use store::{OutboxStore, SqliteOutbox};
pub use sync::{BackgroundSync, ReplaySummary, SyncCoordinator};
pub use types::OutboxItem;
