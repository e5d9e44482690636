//! Shared store boundary: per-room history logs, named string sets and a
//! pub/sub bus. Every process of a deployment talks to the same store; it is
//! the only thing they share.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::history::UndoPolicy;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Lazy, unbounded sequence of published messages. Ends only when the
/// backend goes away; callers resubscribe.
pub type Subscription = BoxStream<'static, StoreResult<Bytes>>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),

    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    #[error("store closed")]
    Closed,
}

/// Half-open index range over a room log. `end: None` reads to the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRange {
    pub start: usize,
    pub end:   Option<usize>,
}

impl LogRange {
    pub const ALL: LogRange = LogRange { start: 0, end: None };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end: Some(end) }
    }

    /// Number of entries to take after `start`, if bounded.
    pub fn limit(&self) -> Option<usize> {
        self.end.map(|e| e.saturating_sub(self.start))
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn ping(&self) -> StoreResult<()>;

    /* ---- history log ---- */
    async fn append(&self, room: &str, kind: &str, entry: Bytes) -> StoreResult<()>;
    async fn read_range(&self, room: &str, range: LogRange) -> StoreResult<Vec<Bytes>>;
    async fn len(&self, room: &str) -> StoreResult<usize>;
    async fn truncate(&self, room: &str) -> StoreResult<()>;
    /// Atomically removes the most recent entry whose kind the policy marks
    /// undoable, leaving every other entry in place.
    async fn pop_undoable(&self, room: &str, policy: &UndoPolicy) -> StoreResult<Option<Bytes>>;

    /* ---- pub/sub ---- */
    async fn publish(&self, topic: &str, body: Bytes) -> StoreResult<()>;
    async fn subscribe(&self, topic: &str) -> StoreResult<Subscription>;
    /// Appends to a room log and publishes the same bytes as one step, so
    /// log order and bus order agree for concurrent writers.
    async fn append_publish(&self, room: &str, kind: &str, entry: Bytes, topic: &str) -> StoreResult<()>;

    /* ---- sets ---- */
    async fn set_add(&self, set: &str, member: &str) -> StoreResult<()>;
    async fn set_remove(&self, set: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>>;
}

/// Backend knobs that only matter to the SQLite bus.
#[derive(Debug, Clone, Copy)]
pub struct BusOptions {
    pub poll_interval: Duration,
    pub retention:     Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(50), retention: Duration::from_secs(60) }
    }
}

/// `memory` / `memory://` selects the in-process store, anything else is
/// handed to SQLite.
pub async fn open(url: &str, bus: BusOptions) -> StoreResult<Arc<dyn Store>> {
    if url == "memory" || url.starts_with("memory://") {
        return Ok(Arc::new(MemoryStore::default()));
    }
    Ok(Arc::new(SqliteStore::connect(url, bus).await?))
}
