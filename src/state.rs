use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    admin::AdminOps,
    config::Config,
    history::HistoryLog,
    registry::RoomRegistry,
    store::{Store, StoreResult},
};

/// Outbound queue of one session; frames are shared between all members.
pub type Tx = mpsc::Sender<Arc<str>>;

/// Frames a session may have queued before it counts as stalled.
pub const OUTBOUND_QUEUE: usize = 100;

/* ------------ store health -------------- */
/// Degraded while the most recent store call failed.
#[derive(Default)]
pub struct StoreHealth {
    degraded: AtomicBool,
}

impl StoreHealth {
    pub fn is_degraded(&self) -> bool { self.degraded.load(Ordering::Relaxed) }

    pub fn observe<T>(&self, res: &StoreResult<T>) {
        match res {
            Ok(_)  => self.mark_ok(),
            Err(e) => self.mark_failed(e),
        }
    }

    pub fn mark_ok(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("store recovered");
        }
    }

    pub fn mark_failed(&self, err: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %err, "store degraded");
        }
    }
}

/* ------------ shared app state ---------- */
#[derive(Clone)]
pub struct AppState {
    pub store:        Arc<dyn Store>,
    pub registry:     Arc<RoomRegistry>,
    pub history:      HistoryLog,
    pub admin:        AdminOps,
    pub health:       Arc<StoreHealth>,
    pub topic:        Arc<str>,
    pub idle_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, cfg: &Config) -> Self {
        let registry = Arc::new(RoomRegistry::default());
        let topic: Arc<str> = Arc::from(cfg.topic.as_str());
        Self {
            history: HistoryLog::new(store.clone(), cfg.undo.clone()),
            admin: AdminOps::new(store.clone(), registry.clone(), topic.clone()),
            store,
            registry,
            health: Arc::new(StoreHealth::default()),
            topic,
            idle_timeout: cfg.idle_timeout,
        }
    }
}
