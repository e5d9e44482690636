//! Wire events: `{type, room, username, payload}`.
//!
//! `payload` is never interpreted here; it is kept as raw JSON and forwarded
//! exactly as received.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Kind {
    #[default]
    Chat,
    Undo,
    Clear,
    HistoryLoad,
    Refresh,
    Error,
    Other(String),
}

impl Kind {
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Chat        => "chat",
            Kind::Undo        => "undo",
            Kind::Clear       => "clear",
            Kind::HistoryLoad => "history_load",
            Kind::Refresh     => "refresh",
            Kind::Error       => "error",
            Kind::Other(s)    => s,
        }
    }

    /// Kinds only the server emits; clients may not inject them.
    pub fn server_only(&self) -> bool {
        matches!(self, Kind::HistoryLoad | Kind::Refresh | Kind::Error)
    }
}

impl From<String> for Kind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" | "chat"    => Kind::Chat,
            "undo"         => Kind::Undo,
            "clear"        => Kind::Clear,
            "history_load" => Kind::HistoryLoad,
            "refresh"      => Kind::Refresh,
            "error"        => Kind::Error,
            _              => Kind::Other(s),
        }
    }
}

impl From<&str> for Kind {
    fn from(s: &str) -> Self { Kind::from(s.to_string()) }
}

impl From<Kind> for String {
    fn from(k: Kind) -> Self { k.as_str().to_string() }
}

impl Serialize for Kind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Kind::from(String::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub kind: Kind,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Event {
    pub fn new(kind: Kind, room: &str, username: &str) -> Self {
        Self { kind, room: room.into(), username: username.into(), payload: None }
    }

    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn with_payload(mut self, payload: Box<RawValue>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Wraps stored entries as one event whose payload is the array of
    /// entries, in log order. Entries that are not valid JSON are skipped.
    pub fn wrap_entries(
        kind: Kind,
        room: &str,
        entries: &[Bytes],
    ) -> Result<Self, serde_json::Error> {
        let items: Vec<&RawValue> = entries
            .iter()
            .filter_map(|e| match serde_json::from_slice::<&RawValue>(e) {
                Ok(v) => Some(v),
                Err(err) => {
                    warn!(room, error = %err, "skipping unreadable history entry");
                    None
                }
            })
            .collect();
        let payload = serde_json::value::to_raw_value(&items)?;
        Ok(Event::new(kind, room, "").with_payload(payload))
    }

    pub fn error(room: &str, message: &str) -> Self {
        let payload = serde_json::value::to_raw_value(&serde_json::json!({ "message": message }))
            .ok();
        Event { kind: Kind::Error, room: room.into(), username: String::new(), payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn missing_type_defaults_to_chat() {
        let ev = Event::parse(br#"{"payload":{"text":"hi"}}"#).unwrap();
        assert_eq!(ev.kind, Kind::Chat);
        assert_eq!(ev.room, "");
        assert_eq!(ev.payload.unwrap().get(), r#"{"text":"hi"}"#);
    }

    #[test]
    fn unknown_kinds_survive_a_round_trip() {
        let ev = Event::parse(br#"{"type":"draw","room":"r","username":"u","payload":[1,2]}"#)
            .unwrap();
        assert_eq!(ev.kind, Kind::Other("draw".into()));
        let back: Value = serde_json::from_slice(&ev.to_bytes().unwrap()).unwrap();
        assert_eq!(back, json!({"type":"draw","room":"r","username":"u","payload":[1,2]}));
    }

    #[test]
    fn payload_is_forwarded_verbatim() {
        let raw = br#"{"type":"chat","room":"r","username":"u","payload":{"b":1,  "a":[ 2 ]}}"#;
        let ev = Event::parse(raw).unwrap();
        assert_eq!(ev.payload.as_deref().unwrap().get(), r#"{"b":1,  "a":[ 2 ]}"#);
    }

    #[test]
    fn absent_payload_serializes_as_null() {
        let ev = Event::new(Kind::Clear, "r", "");
        let v: Value = serde_json::from_slice(&ev.to_bytes().unwrap()).unwrap();
        assert_eq!(v["payload"], Value::Null);
        assert_eq!(v["type"], "clear");
    }

    #[test]
    fn server_only_kinds() {
        assert!(Kind::HistoryLoad.server_only());
        assert!(Kind::Refresh.server_only());
        assert!(Kind::Error.server_only());
        assert!(!Kind::Chat.server_only());
        assert!(!Kind::from("marker").server_only());
    }

    #[test]
    fn wrap_entries_keeps_order_and_skips_garbage() {
        let entries = vec![
            Bytes::from_static(br#"{"type":"chat","payload":1}"#),
            Bytes::from_static(b"not json"),
            Bytes::from_static(br#"{"type":"chat","payload":2}"#),
        ];
        let ev = Event::wrap_entries(Kind::HistoryLoad, "r", &entries).unwrap();
        let v: Value = serde_json::from_slice(&ev.to_bytes().unwrap()).unwrap();
        assert_eq!(v["type"], "history_load");
        assert_eq!(v["room"], "r");
        assert_eq!(v["payload"][0]["payload"], 1);
        assert_eq!(v["payload"][1]["payload"], 2);
        assert_eq!(v["payload"].as_array().unwrap().len(), 2);
    }
}
