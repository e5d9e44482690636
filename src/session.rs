//! One connected client: `Connecting -> Joined -> Closed`.
//!
//! The session stamps its own room and username on everything the client
//! sends, turns each event into history/bus operations, and removes itself
//! from the registry when the read side ends.

use std::{sync::Arc, time::Duration};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, time};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{bad, AppErr, AppResult},
    event::{Event, Kind},
    registry::SessionId,
    state::{AppState, Tx, OUTBOUND_QUEUE},
    store::StoreResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Joined,
    Closed,
}

pub struct ConnectionSession {
    id:    SessionId,
    room:  String,
    user:  String,
    phase: Phase,
    tx:    Option<mpsc::WeakSender<Arc<str>>>, // the registry owns the strong end
    state: AppState,
}

impl ConnectionSession {
    pub fn new(state: AppState, room: String, user: String) -> Self {
        Self { id: Uuid::new_v4(), room, user, phase: Phase::Connecting, tx: None, state }
    }

    pub fn id(&self) -> SessionId { self.id }
    pub fn phase(&self) -> Phase { self.phase }

    /// Registers with the room and returns the `history_load` frame for this
    /// client alone, if the room has history. Registration comes first so
    /// that nothing published during the replay is lost; such events queue
    /// up behind the replay.
    pub async fn join(&mut self, tx: Tx) -> Option<String> {
        if self.phase != Phase::Connecting { return None; }

        self.tx = Some(tx.downgrade());
        self.state.registry.join(&self.room, self.id, tx).await;
        self.phase = Phase::Joined;

        let activated = self.state.admin.activate(&self.room).await;
        if let Err(e) = self.track(activated) {
            warn!(room = %self.room, error = %e, "could not mark room active");
        }

        let loaded = self.state.history.load(&self.room).await;
        let entries = match self.track(loaded) {
            Ok(entries) => entries,
            Err(e) => {
                error!(room = %self.room, error = %e, "history replay failed");
                self.report(&AppErr::Store(e));
                return None;
            }
        };
        if entries.is_empty() { return None; }

        match Event::wrap_entries(Kind::HistoryLoad, &self.room, &entries)
            .and_then(|ev| serde_json::to_string(&ev))
        {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(room = %self.room, error = %e, "could not encode history");
                None
            }
        }
    }

    /// Handles one inbound frame. Only an unparseable frame is an error (the
    /// caller ends the session); store failures are reported to this client
    /// and the session carries on.
    pub async fn handle_frame(&mut self, raw: &[u8]) -> AppResult<()> {
        if self.phase != Phase::Joined {
            return Err(bad("session is not joined"));
        }
        let mut ev = Event::parse(raw).map_err(bad)?;
        ev.room = self.room.clone();
        ev.username = self.user.clone();

        let res = match ev.kind {
            Kind::Clear => self.clear(&ev).await,
            Kind::Undo  => self.undo().await,
            ref k if k.server_only() => {
                warn!(room = %self.room, user = %self.user, kind = k.as_str(), "client sent a server-only event");
                Ok(())
            }
            _ => self.post(&ev).await,
        };

        if let Err(e) = res {
            error!(room = %self.room, user = %self.user, kind = ev.kind.as_str(), error = %e, "event failed");
            self.report(&e);
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        if self.phase == Phase::Joined {
            self.state.registry.leave(&self.room, self.id).await;
        }
        self.tx = None;
        self.phase = Phase::Closed;
    }

    /* ---------------- event kinds ---------------- */
    async fn post(&self, ev: &Event) -> AppResult<()> {
        let bytes = ev.to_bytes()?;
        // a write after destroy brings the room back into the active set
        let activated = self.state.admin.activate(&self.room).await;
        self.track(activated)?;
        let posted = self.state.history
            .append_publish(&self.room, &ev.kind, bytes, &self.state.topic)
            .await;
        Ok(self.track(posted)?)
    }

    async fn clear(&self, ev: &Event) -> AppResult<()> {
        let cleared = self.state.history.clear(&self.room).await;
        self.track(cleared)?;
        self.publish(ev.to_bytes()?).await
    }

    async fn undo(&self) -> AppResult<()> {
        let undone = self.state.history.undo(&self.room).await;
        let outcome = self.track(undone)?;
        debug!(room = %self.room, removed = outcome.removed.is_some(), left = outcome.remaining.len(), "undo");
        let refresh = Event::wrap_entries(Kind::Refresh, &self.room, &outcome.remaining)?;
        self.publish(refresh.to_bytes()?).await
    }

    async fn publish(&self, body: bytes::Bytes) -> AppResult<()> {
        let published = self.state.store.publish(&self.state.topic, body).await;
        Ok(self.track(published)?)
    }

    fn track<T>(&self, res: StoreResult<T>) -> StoreResult<T> {
        self.state.health.observe(&res);
        res
    }

    fn report(&self, err: &AppErr) {
        let Some(tx) = self.tx.as_ref().and_then(|w| w.upgrade()) else { return };
        if let Ok(frame) = serde_json::to_string(&Event::error(&self.room, &err.to_string())) {
            let _ = tx.try_send(Arc::from(frame));
        }
    }
}

fn ping_interval(idle: Duration) -> Duration {
    (idle / 3).max(Duration::from_millis(10))
}

/// Drives one upgraded socket until the client goes away.
pub async fn run(sock: WebSocket, state: AppState, room: String, user: String) {
    let idle = state.idle_timeout;
    let (mut sink, mut stream) = sock.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(OUTBOUND_QUEUE);

    let mut session = ConnectionSession::new(state, room, user);
    let id = session.id();
    info!(room = %session.room, user = %session.user, session = %id, "connected");

    /* replay goes straight to this socket, ahead of anything queued */
    if let Some(frame) = session.join(tx).await {
        if sink.send(Message::Text(frame)).await.is_err() {
            session.close().await;
            return;
        }
    }

    /* pings keep receive-only clients answering, which resets the read timer */
    let mut ping = time::interval(ping_interval(idle));
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ping.reset();
    let mut writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => Message::Text(frame.to_string()),
                    None => break, // evicted or closed
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            if sink.send(msg).await.is_err() { break; }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(session = %id, "writer stopped");
                break;
            }
            next = time::timeout(idle, stream.next()) => {
                let msg = match next {
                    Err(_) => { info!(session = %id, "idle timeout"); break; }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => { debug!(session = %id, error = %e, "read failed"); break; }
                    Ok(Some(Ok(m))) => m,
                };
                let raw = match msg {
                    Message::Text(t)   => t.into_bytes(),
                    Message::Binary(b) => b,
                    Message::Close(_)  => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                if let Err(e) = session.handle_frame(&raw).await {
                    warn!(session = %id, error = %e, "closing session");
                    break;
                }
            }
        }
    }

    session.close().await;
    writer.abort();
    info!(session = %id, "disconnected");
}
