//! In-process store for single-node deployments and tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::sync::{broadcast, Mutex};

use super::{LogRange, Store, StoreError, StoreResult, Subscription};
use crate::history::UndoPolicy;

const TOPIC_BUFFER: usize = 1024;

#[derive(Default)]
pub struct MemoryStore {
    logs:   Mutex<HashMap<String, Vec<(String, Bytes)>>>, // room -> [(kind, entry)]
    sets:   Mutex<HashMap<String, BTreeSet<String>>>,
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> { Ok(()) }

    async fn append(&self, room: &str, kind: &str, entry: Bytes) -> StoreResult<()> {
        self.logs.lock().await
            .entry(room.to_string()).or_default()
            .push((kind.to_string(), entry));
        Ok(())
    }

    async fn read_range(&self, room: &str, range: LogRange) -> StoreResult<Vec<Bytes>> {
        let logs = self.logs.lock().await;
        let Some(log) = logs.get(room) else { return Ok(Vec::new()) };
        let end = range.end.unwrap_or(log.len()).min(log.len());
        if range.start >= end { return Ok(Vec::new()); }
        Ok(log[range.start..end].iter().map(|(_, e)| e.clone()).collect())
    }

    async fn len(&self, room: &str) -> StoreResult<usize> {
        Ok(self.logs.lock().await.get(room).map_or(0, Vec::len))
    }

    async fn truncate(&self, room: &str) -> StoreResult<()> {
        self.logs.lock().await.remove(room);
        Ok(())
    }

    async fn pop_undoable(&self, room: &str, policy: &UndoPolicy) -> StoreResult<Option<Bytes>> {
        let mut logs = self.logs.lock().await;
        let Some(log) = logs.get_mut(room) else { return Ok(None) };
        let Some(at) = log.iter().rposition(|(kind, _)| policy.is_undoable(kind)) else {
            return Ok(None);
        };
        Ok(Some(log.remove(at).1))
    }

    async fn publish(&self, topic: &str, body: Bytes) -> StoreResult<()> {
        if let Some(tx) = self.topics.lock().await.get(topic) {
            let _ = tx.send(body); // no subscribers is fine
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<Subscription> {
        let rx = self.topics.lock().await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .subscribe();

        let sub = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(body) => Some((Ok(body), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => Some((Err(StoreError::Lagged(n)), rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(sub.boxed())
    }

    async fn append_publish(&self, room: &str, kind: &str, entry: Bytes, topic: &str) -> StoreResult<()> {
        // log lock held across the send; lock order is always logs -> topics
        let mut logs = self.logs.lock().await;
        logs.entry(room.to_string()).or_default().push((kind.to_string(), entry.clone()));
        if let Some(tx) = self.topics.lock().await.get(topic) {
            let _ = tx.send(entry);
        }
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> StoreResult<()> {
        self.sets.lock().await.entry(set.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> StoreResult<()> {
        let mut sets = self.sets.lock().await;
        if let Some(s) = sets.get_mut(set) {
            s.remove(member);
            if s.is_empty() { sets.remove(set); }
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self.sets.lock().await.get(set).cloned().unwrap_or_default())
    }
}
