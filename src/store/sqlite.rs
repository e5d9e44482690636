//! Shared store on a SQLite file. Several server processes may open the same
//! database; the `bus` table carries pub/sub traffic between them and each
//! subscriber polls it from its own cursor.

use std::{
    collections::{BTreeSet, VecDeque},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Row, Sqlite, SqlitePool,
};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{BusOptions, LogRange, Store, StoreResult, Subscription};
use crate::history::UndoPolicy;

const POLL_BATCH: i64 = 512;
const PRUNE_EVERY: u64 = 64; // polls

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS history (
        id    INTEGER PRIMARY KEY AUTOINCREMENT,
        room  TEXT NOT NULL,
        kind  TEXT NOT NULL,
        entry BLOB NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS history_room ON history (room, id)",
    r#"CREATE TABLE IF NOT EXISTS room_sets (
        name   TEXT NOT NULL,
        member TEXT NOT NULL,
        PRIMARY KEY (name, member)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS bus (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        topic      TEXT NOT NULL,
        body       BLOB NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS bus_topic ON bus (topic, id)",
];

pub struct SqliteStore {
    pool: SqlitePool,
    bus:  BusOptions,
}

impl SqliteStore {
    pub async fn connect(url: &str, bus: BusOptions) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(opts).await?;
        info!(url, "sqlite store opened");
        Self::from_pool(pool, bus).await
    }

    pub async fn from_pool(pool: SqlitePool, bus: BusOptions) -> StoreResult<Self> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(Self { pool, bus })
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn append(&self, room: &str, kind: &str, entry: Bytes) -> StoreResult<()> {
        sqlx::query("INSERT INTO history (room, kind, entry) VALUES (?, ?, ?)")
            .bind(room)
            .bind(kind)
            .bind(entry.as_ref())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn read_range(&self, room: &str, range: LogRange) -> StoreResult<Vec<Bytes>> {
        // LIMIT -1 means unbounded in SQLite
        let limit = range.limit().map_or(-1, |n| n as i64);
        let rows = sqlx::query(
            "SELECT entry FROM history WHERE room = ? ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(room)
        .bind(limit)
        .bind(range.start as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| Ok(Bytes::from(r.try_get::<Vec<u8>, _>("entry")?)))
            .collect()
    }

    async fn len(&self, room: &str) -> StoreResult<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history WHERE room = ?")
            .bind(room)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn truncate(&self, room: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM history WHERE room = ?")
            .bind(room)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn pop_undoable(&self, room: &str, policy: &UndoPolicy) -> StoreResult<Option<Bytes>> {
        // one statement, so the pick and the delete cannot interleave with
        // another writer
        let mut qb = QueryBuilder::<Sqlite>::new(
            "DELETE FROM history WHERE id = (SELECT id FROM history WHERE room = ",
        );
        qb.push_bind(room.to_string());

        let (op, kinds) = match policy {
            UndoPolicy::Only(k) if k.is_empty() => return Ok(None),
            UndoPolicy::Only(k)      => (" AND kind IN (", k),
            UndoPolicy::AllExcept(k) => (" AND kind NOT IN (", k),
        };
        if !kinds.is_empty() {
            qb.push(op);
            let mut sep = qb.separated(", ");
            for k in kinds {
                sep.push_bind(k.clone());
            }
            sep.push_unseparated(")");
        }
        qb.push(" ORDER BY id DESC LIMIT 1) RETURNING entry");

        let row = qb.build().fetch_optional(&self.pool).await?;
        Ok(match row {
            Some(r) => Some(Bytes::from(r.try_get::<Vec<u8>, _>("entry")?)),
            None => None,
        })
    }

    async fn publish(&self, topic: &str, body: Bytes) -> StoreResult<()> {
        sqlx::query("INSERT INTO bus (topic, body, created_at) VALUES (?, ?, ?)")
            .bind(topic)
            .bind(body.as_ref())
            .bind(now_secs())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> StoreResult<Subscription> {
        // like a pub/sub channel: only messages published from now on
        let cursor: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM bus")
            .fetch_one(&self.pool)
            .await?;
        debug!(topic, cursor, "bus subscription opened");

        let mut tick = time::interval(self.bus.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let poller = BusPoller {
            pool: self.pool.clone(),
            topic: topic.to_string(),
            cursor,
            pending: VecDeque::new(),
            tick,
            retention: self.bus.retention,
            polls: 0,
        };

        let sub = stream::unfold(poller, |mut p| async move {
            loop {
                if let Some(body) = p.pending.pop_front() {
                    return Some((Ok(body), p));
                }
                p.tick.tick().await;
                if let Err(e) = p.poll().await {
                    return Some((Err(e), p));
                }
            }
        });
        Ok(sub.boxed())
    }

    async fn append_publish(&self, room: &str, kind: &str, entry: Bytes, topic: &str) -> StoreResult<()> {
        // SQLite serializes write transactions, so history ids and bus ids
        // are assigned in the same order
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO history (room, kind, entry) VALUES (?, ?, ?)")
            .bind(room)
            .bind(kind)
            .bind(entry.as_ref())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO bus (topic, body, created_at) VALUES (?, ?, ?)")
            .bind(topic)
            .bind(entry.as_ref())
            .bind(now_secs())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_add(&self, set: &str, member: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO room_sets (name, member) VALUES (?, ?)")
            .bind(set)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM room_sets WHERE name = ? AND member = ?")
            .bind(set)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>> {
        let members: Vec<String> =
            sqlx::query_scalar("SELECT member FROM room_sets WHERE name = ?")
                .bind(set)
                .fetch_all(&self.pool)
                .await?;
        Ok(members.into_iter().collect())
    }
}

/* ------------ bus polling ------------ */
struct BusPoller {
    pool:      SqlitePool,
    topic:     String,
    cursor:    i64,
    pending:   VecDeque<Bytes>,
    tick:      Interval,
    retention: Duration,
    polls:     u64,
}

impl BusPoller {
    async fn poll(&mut self) -> StoreResult<()> {
        let rows = sqlx::query(
            "SELECT id, body FROM bus WHERE topic = ? AND id > ? ORDER BY id LIMIT ?",
        )
        .bind(&self.topic)
        .bind(self.cursor)
        .bind(POLL_BATCH)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            self.cursor = row.try_get("id")?;
            self.pending.push_back(Bytes::from(row.try_get::<Vec<u8>, _>("body")?));
        }

        self.polls += 1;
        if self.polls % PRUNE_EVERY == 0 {
            let cutoff = now_secs() - self.retention.as_secs() as i64;
            sqlx::query("DELETE FROM bus WHERE created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn memory_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let bus = BusOptions { poll_interval: Duration::from_millis(5), ..Default::default() };
        SqliteStore::from_pool(pool, bus).await.expect("schema")
    }

    fn b(s: &'static str) -> Bytes { Bytes::from_static(s.as_bytes()) }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let store = memory_store().await;
        SqliteStore::from_pool(store.pool.clone(), store.bus).await.unwrap();
    }

    #[tokio::test]
    async fn append_then_read_is_byte_identical() {
        let store = memory_store().await;
        let entry = b(r#"{"type":"chat","room":"r","username":"ann","payload":{"x": 1.50}}"#);
        store.append("r", "chat", entry.clone()).await.unwrap();
        assert_eq!(store.read_range("r", LogRange::ALL).await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn ranges_and_rooms_are_isolated() {
        let store = memory_store().await;
        for e in ["a", "b", "c"] {
            store.append("r", "chat", b(e)).await.unwrap();
        }
        store.append("other", "chat", b("z")).await.unwrap();

        assert_eq!(store.read_range("r", LogRange::new(1, 2)).await.unwrap(), vec![b("b")]);
        assert_eq!(store.read_range("r", LogRange { start: 1, end: None }).await.unwrap(), vec![b("b"), b("c")]);
        assert_eq!(store.len("r").await.unwrap(), 3);

        store.truncate("r").await.unwrap();
        assert_eq!(store.len("r").await.unwrap(), 0);
        assert_eq!(store.len("other").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pop_undoable_honours_policy() {
        let store = memory_store().await;
        store.append("r", "chat", b("c1")).await.unwrap();
        store.append("r", "draw", b("d1")).await.unwrap();
        store.append("r", "chat", b("c2")).await.unwrap();

        let except_chat = UndoPolicy::AllExcept(["chat".to_string()].into());
        assert_eq!(store.pop_undoable("r", &except_chat).await.unwrap(), Some(b("d1")));
        assert_eq!(store.pop_undoable("r", &except_chat).await.unwrap(), None);

        let only_chat = UndoPolicy::default();
        assert_eq!(store.pop_undoable("r", &only_chat).await.unwrap(), Some(b("c2")));
        assert_eq!(store.read_range("r", LogRange::ALL).await.unwrap(), vec![b("c1")]);

        let nothing = UndoPolicy::Only(BTreeSet::new());
        assert_eq!(store.pop_undoable("r", &nothing).await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscribers_see_only_later_messages() {
        let store = memory_store().await;
        store.publish("t", b("before")).await.unwrap();

        let mut sub = store.subscribe("t").await.unwrap();
        store.publish("t", b("one")).await.unwrap();
        store.publish("other", b("skip")).await.unwrap();
        store.publish("t", b("two")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), async {
            vec![sub.next().await.unwrap().unwrap(), sub.next().await.unwrap().unwrap()]
        })
        .await
        .expect("bus delivery");
        assert_eq!(got, vec![b("one"), b("two")]);
    }

    #[tokio::test]
    async fn append_publish_keeps_log_and_bus_in_step() {
        let store = memory_store().await;
        let mut sub = store.subscribe("t").await.unwrap();
        for e in ["a", "b", "c"] {
            store.append_publish("r", "chat", b(e), "t").await.unwrap();
        }
        let mut published = Vec::new();
        for _ in 0..3 {
            let next = tokio::time::timeout(Duration::from_secs(2), sub.next()).await.expect("bus delivery");
            published.push(next.unwrap().unwrap());
        }
        assert_eq!(published, store.read_range("r", LogRange::ALL).await.unwrap());
    }

    #[tokio::test]
    async fn sets() {
        let store = memory_store().await;
        store.set_add("active_rooms", "a").await.unwrap();
        store.set_add("active_rooms", "a").await.unwrap();
        store.set_add("active_rooms", "b").await.unwrap();
        store.set_remove("active_rooms", "a").await.unwrap();
        store.set_remove("active_rooms", "nope").await.unwrap();
        let members = store.set_members("active_rooms").await.unwrap();
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn two_handles_on_one_file_share_everything() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("shared.db").display());
        let bus = BusOptions { poll_interval: Duration::from_millis(5), ..Default::default() };

        let a = SqliteStore::connect(&url, bus).await.unwrap();
        let b_store = SqliteStore::connect(&url, bus).await.unwrap();

        let mut sub = b_store.subscribe("live").await.unwrap();
        a.append("r", "chat", b("hello")).await.unwrap();
        a.publish("live", b("hello")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("cross-handle delivery")
            .unwrap()
            .unwrap();
        assert_eq!(got, b("hello"));
        assert_eq!(b_store.read_range("r", LogRange::ALL).await.unwrap(), vec![b("hello")]);
    }
}
