//! Room lifecycle operations for operators.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::{
    config::ACTIVE_ROOMS,
    error::AppResult,
    event::{Event, Kind},
    registry::RoomRegistry,
    store::{Store, StoreResult},
};

/// A room is `Active` from its first join or durable write until it is
/// destroyed; otherwise it is `Absent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Absent,
    Active,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomStatus {
    pub room:          String,
    pub state:         RoomState,
    pub history_len:   usize,
    pub local_members: usize,
}

#[derive(Clone)]
pub struct AdminOps {
    store:    Arc<dyn Store>,
    registry: Arc<RoomRegistry>,
    topic:    Arc<str>,
}

impl AdminOps {
    pub fn new(store: Arc<dyn Store>, registry: Arc<RoomRegistry>, topic: Arc<str>) -> Self {
        Self { store, registry, topic }
    }

    /// `Absent -> Active`; repeated calls are harmless.
    pub async fn activate(&self, room: &str) -> StoreResult<()> {
        self.store.set_add(ACTIVE_ROOMS, room).await
    }

    pub async fn list_rooms(&self) -> StoreResult<Vec<String>> {
        Ok(self.store.set_members(ACTIVE_ROOMS).await?.into_iter().collect())
    }

    /// Wipes history, drops the room from the active set and tells every
    /// connected client (on any process) to reset. Connections stay open.
    pub async fn destroy_room(&self, room: &str) -> AppResult<()> {
        self.store.truncate(room).await?;
        self.store.set_remove(ACTIVE_ROOMS, room).await?;
        let clear = Event::new(Kind::Clear, room, "").to_bytes()?;
        self.store.publish(&self.topic, clear).await?;
        info!(room, "room destroyed");
        Ok(())
    }

    pub async fn room_state(&self, room: &str) -> StoreResult<RoomStatus> {
        let listed = self.store.set_members(ACTIVE_ROOMS).await?.contains(room);
        let history_len = self.store.len(room).await?;
        let state = if listed || history_len > 0 { RoomState::Active } else { RoomState::Absent };
        Ok(RoomStatus {
            room: room.to_string(),
            state,
            history_len,
            local_members: self.registry.member_count(room).await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogRange, MemoryStore};
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn admin() -> (Arc<MemoryStore>, AdminOps) {
        let store = Arc::new(MemoryStore::default());
        let ops = AdminOps::new(store.clone(), Arc::default(), Arc::from("live_updates"));
        (store, ops)
    }

    #[tokio::test]
    async fn list_is_sorted_and_deduplicated() {
        let (_, ops) = admin();
        for r in ["zeta", "alpha", "zeta"] {
            ops.activate(r).await.unwrap();
        }
        assert_eq!(ops.list_rooms().await.unwrap(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn destroy_clears_history_membership_and_broadcasts() {
        let (store, ops) = admin();
        let mut bus = store.subscribe("live_updates").await.unwrap();
        ops.activate("r").await.unwrap();
        store.append("r", "chat", Bytes::from_static(b"{}")).await.unwrap();

        ops.destroy_room("r").await.unwrap();

        assert!(store.read_range("r", LogRange::ALL).await.unwrap().is_empty());
        assert!(ops.list_rooms().await.unwrap().is_empty());
        let msg = bus.next().await.unwrap().unwrap();
        let ev = Event::parse(&msg).unwrap();
        assert_eq!(ev.kind, Kind::Clear);
        assert_eq!(ev.room, "r");
        assert!(ev.payload.is_none());
    }

    #[tokio::test]
    async fn destroying_an_unknown_room_succeeds() {
        let (_, ops) = admin();
        ops.destroy_room("ghost").await.unwrap();
        ops.destroy_room("ghost").await.unwrap();
        assert_eq!(ops.room_state("ghost").await.unwrap().state, RoomState::Absent);
    }

    #[tokio::test]
    async fn lifecycle_follows_writes_and_destroy() {
        let (store, ops) = admin();
        assert_eq!(ops.room_state("r").await.unwrap().state, RoomState::Absent);

        store.append("r", "chat", Bytes::from_static(b"{}")).await.unwrap();
        let st = ops.room_state("r").await.unwrap();
        assert_eq!((st.state, st.history_len), (RoomState::Active, 1));

        ops.destroy_room("r").await.unwrap();
        assert_eq!(ops.room_state("r").await.unwrap().state, RoomState::Absent);
    }
}
