//! Environment configuration. `.env` is loaded by `main` before this runs.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{
    error::{config, AppResult},
    history::UndoPolicy,
    store::BusOptions,
};

pub const DEFAULT_ROOM: &str = "general";
pub const DEFAULT_USER: &str = "Anon";
pub const ACTIVE_ROOMS: &str = "active_rooms";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr:          SocketAddr,
    pub database_url:  String,
    pub static_dir:    PathBuf,
    pub topic:         String,
    pub undo:          UndoPolicy,
    pub bus:           BusOptions,
    pub idle_timeout:  Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr:         SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://rooms.db".into(),
            static_dir:   "public".into(),
            topic:        "live_updates".into(),
            undo:         UndoPolicy::default(),
            bus:          BusOptions::default(),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let mut c = Config::default();
        let get = |k: &str| get(k).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ADDR") {
            c.addr = v.parse().map_err(|e| config("ADDR", e))?;
        }
        if let Some(v) = get("DATABASE_URL") { c.database_url = v; }
        if let Some(v) = get("STATIC_DIR")   { c.static_dir = v.into(); }
        if let Some(v) = get("BUS_TOPIC")    { c.topic = v; }
        if let Some(v) = get("UNDO_POLICY") {
            c.undo = UndoPolicy::parse(&v).map_err(|e| config("UNDO_POLICY", e))?;
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            c.bus.poll_interval = Duration::from_millis(number("POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("BUS_RETENTION_SECS") {
            c.bus.retention = Duration::from_secs(number("BUS_RETENTION_SECS", &v)?);
        }
        if let Some(v) = get("IDLE_TIMEOUT_SECS") {
            c.idle_timeout = Duration::from_secs(number("IDLE_TIMEOUT_SECS", &v)?);
        }
        Ok(c)
    }
}

fn number(key: &str, v: &str) -> AppResult<u64> {
    match v.trim().parse::<u64>() {
        Ok(0)  => Err(config(key, "must be greater than zero")),
        Ok(n)  => Ok(n),
        Err(e) => Err(config(key, e)),
    }
}
