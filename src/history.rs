//! Per-room ordered history on top of the shared store, plus the undo rule.

use std::{collections::BTreeSet, sync::Arc};

use bytes::Bytes;

use crate::{
    event::{Event, Kind},
    store::{LogRange, Store, StoreResult},
};

/// Which entry kinds a client `undo` may remove.
///
/// Undo removes the most recent undoable entry. Entries that are not
/// undoable are stepped over and stay where they are; when no undoable entry
/// is left, undo does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoPolicy {
    Only(BTreeSet<String>),
    AllExcept(BTreeSet<String>),
}

impl Default for UndoPolicy {
    fn default() -> Self { UndoPolicy::Only(BTreeSet::from(["chat".to_string()])) }
}

impl UndoPolicy {
    pub fn is_undoable(&self, kind: &str) -> bool {
        match self {
            UndoPolicy::Only(k)      => k.contains(kind),
            UndoPolicy::AllExcept(k) => !k.contains(kind),
        }
    }

    /// `only:chat,draw`, `except:chat`, or a bare list (same as `only:`).
    pub fn parse(s: &str) -> Result<Self, String> {
        let (mode, list) = match s.split_once(':') {
            Some((m, l)) => (m.trim(), l),
            None         => ("only", s),
        };
        let kinds: BTreeSet<String> = list
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        match mode {
            "only"   => Ok(UndoPolicy::Only(kinds)),
            "except" => Ok(UndoPolicy::AllExcept(kinds)),
            other    => Err(format!("unknown undo mode `{other}` (expected only/except)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoOutcome {
    pub removed:   Option<Bytes>,
    pub remaining: Vec<Bytes>,
}

#[derive(Clone)]
pub struct HistoryLog {
    store:  Arc<dyn Store>,
    policy: Arc<UndoPolicy>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn Store>, policy: UndoPolicy) -> Self {
        Self { store, policy: Arc::new(policy) }
    }

    pub fn policy(&self) -> &UndoPolicy { &self.policy }

    /// Serializes and appends; returns the stored bytes so the caller can
    /// publish exactly what was persisted.
    pub async fn append(&self, event: &Event) -> crate::error::AppResult<Bytes> {
        let bytes = event.to_bytes()?;
        self.append_bytes(&event.room, &event.kind, bytes.clone()).await?;
        Ok(bytes)
    }

    pub async fn append_bytes(&self, room: &str, kind: &Kind, entry: Bytes) -> StoreResult<()> {
        self.store.append(room, kind.as_str(), entry).await
    }

    /// Appends and publishes on `topic` in one store step.
    pub async fn append_publish(&self, room: &str, kind: &Kind, entry: Bytes, topic: &str) -> StoreResult<()> {
        self.store.append_publish(room, kind.as_str(), entry, topic).await
    }

    pub async fn load(&self, room: &str) -> StoreResult<Vec<Bytes>> {
        self.store.read_range(room, LogRange::ALL).await
    }

    pub async fn read_range(&self, room: &str, range: LogRange) -> StoreResult<Vec<Bytes>> {
        self.store.read_range(room, range).await
    }

    pub async fn len(&self, room: &str) -> StoreResult<usize> {
        self.store.len(room).await
    }

    pub async fn clear(&self, room: &str) -> StoreResult<()> {
        self.store.truncate(room).await
    }

    pub async fn undo(&self, room: &str) -> StoreResult<UndoOutcome> {
        let removed = self.store.pop_undoable(room, &self.policy).await?;
        let remaining = self.load(room).await?;
        Ok(UndoOutcome { removed, remaining })
    }
}
