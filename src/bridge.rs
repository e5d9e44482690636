//! Bus -> local members. Every process runs one bridge on the shared topic;
//! it is the only path by which room events (including a sender's own) reach
//! connected clients. Every process therefore sees every room's traffic,
//! which is the scaling ceiling of the single-topic layout.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{task::JoinHandle, time};
use tracing::{debug, error, info, warn};

use crate::{
    event::Event,
    registry::RoomRegistry,
    state::{AppState, StoreHealth},
    store::{Store, StoreResult, Subscription},
};

const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

pub struct BroadcastBridge {
    store:    Arc<dyn Store>,
    registry: Arc<RoomRegistry>,
    health:   Arc<StoreHealth>,
    topic:    Arc<str>,
}

impl BroadcastBridge {
    pub fn new(state: &AppState) -> Self {
        Self {
            store:    state.store.clone(),
            registry: state.registry.clone(),
            health:   state.health.clone(),
            topic:    state.topic.clone(),
        }
    }

    /// Subscribes before returning, so nothing published after `start`
    /// resolves can be missed; the receive loop then runs in the background.
    pub async fn start(self) -> StoreResult<JoinHandle<()>> {
        let sub = self.store.subscribe(&self.topic).await?;
        info!(topic = %self.topic, "bridge subscribed");
        Ok(tokio::spawn(self.run(sub)))
    }

    async fn run(self, mut sub: Subscription) {
        let mut backoff = BACKOFF_MIN;
        loop {
            while let Some(item) = sub.next().await {
                match item {
                    Ok(body) => {
                        self.health.mark_ok();
                        backoff = BACKOFF_MIN;
                        self.dispatch(&body).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "bus receive failed");
                        self.health.mark_failed(&e);
                    }
                }
            }

            warn!(topic = %self.topic, "bus subscription ended, resubscribing");
            sub = loop {
                time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                match self.store.subscribe(&self.topic).await {
                    Ok(s) => {
                        self.health.mark_ok();
                        break s;
                    }
                    Err(e) => {
                        error!(error = %e, "resubscribe failed");
                        self.health.mark_failed(&e);
                    }
                }
            };
        }
    }

    /// Routes one bus message to the members of its room. Returns how many
    /// local sessions it was queued for; malformed messages are dropped.
    pub async fn dispatch(&self, body: &[u8]) -> usize {
        let ev = match Event::parse(body) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "dropping malformed bus message");
                return 0;
            }
        };
        if ev.room.is_empty() {
            warn!(kind = ev.kind.as_str(), "dropping bus message without room");
            return 0;
        }
        let Ok(text) = std::str::from_utf8(body) else { return 0 };
        let sent = self.registry.deliver(&ev.room, Arc::from(text)).await;
        debug!(room = %ev.room, kind = ev.kind.as_str(), sent, "bridged");
        sent
    }
}
