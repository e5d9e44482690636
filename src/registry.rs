//! In-process room membership: room name -> locally connected sessions.
//!
//! One lock guards the whole map. It is only ever held for map mutation or
//! to copy a member list, never across I/O. If contention shows up, shard
//! the map by room hash; each shard keeps the same per-room ordering.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc::error::TrySendError, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::Tx;

pub type SessionId = Uuid;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<SessionId, Tx>>>,
}

impl RoomRegistry {
    pub async fn join(&self, room: &str, id: SessionId, tx: Tx) {
        self.rooms.write().await.entry(room.to_string()).or_default().insert(id, tx);
        debug!(room, session = %id, "joined");
    }

    /// Unknown sessions are ignored. Empty rooms are pruned.
    pub async fn leave(&self, room: &str, id: SessionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() { rooms.remove(room); }
        }
        debug!(room, session = %id, "left");
    }

    /// Calls `f` for each member present when the call started. The lock is
    /// released before `f` runs, so members joining meanwhile are not
    /// included and members leaving meanwhile may still be visited.
    pub async fn for_each<F>(&self, room: &str, mut f: F) -> usize
    where
        F: FnMut(SessionId, &Tx),
    {
        let snapshot: Vec<(SessionId, Tx)> = match self.rooms.read().await.get(room) {
            Some(members) => members.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => return 0,
        };
        for (id, tx) in &snapshot {
            f(*id, tx);
        }
        snapshot.len()
    }

    /// Pushes one frame to every local member; returns how many queues
    /// accepted it. A member whose queue is full (a client that stopped
    /// reading) or already closed is evicted, so it can never hold frames
    /// back or grow without bound. Eviction drops the registry's sender,
    /// which ends that session's writer and with it the session.
    pub async fn deliver(&self, room: &str, frame: Arc<str>) -> usize {
        let mut sent = 0;
        let mut evict = Vec::new();
        self.for_each(room, |id, tx| match tx.try_send(frame.clone()) {
            Ok(()) => sent += 1,
            Err(TrySendError::Full(_)) => {
                warn!(room, session = %id, "outbound queue full, evicting stalled session");
                evict.push(id);
            }
            Err(TrySendError::Closed(_)) => evict.push(id),
        })
        .await;
        for id in evict {
            self.leave(room, id).await;
        }
        sent
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashMap::len)
    }

    /// Rooms with at least one local member.
    pub async fn rooms(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn session_count(&self) -> usize {
        self.rooms.read().await.values().map(HashMap::len).sum()
    }
}
