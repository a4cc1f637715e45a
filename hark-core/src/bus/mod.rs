//! Event bus capability and the messages the listener publishes on it.
//!
//! ## Event names
//!
//! | Constant | Type | When |
//! |----------|------|------|
//! | [`SLEEP`] | `recognizer_loop:sleep` | before streaming |
//! | [`LOCAL_LISTENER_START`] | `recognizer_loop:local_listener.start` | before streaming |
//! | [`RECORD_BEGIN`] | `recognizer_loop:record_begin` | before streaming |
//! | [`RECORD_END`] | `recognizer_loop:record_end` | after the loop exits |
//! | [`LOCAL_LISTENER_END`] | `recognizer_loop:local_listener.end` | after the loop exits |
//! | [`WAKE_UP`] | `recognizer_loop:wake_up` | after the loop exits |
//! | [`UTTERANCE`] | `recognizer_loop:utterance` | per async utterance |
//!
//! Messages serialise as `{"type": ..., "data": {...}, "context": {...}}`.

pub mod cue;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

pub const SLEEP: &str = "recognizer_loop:sleep";
pub const LOCAL_LISTENER_START: &str = "recognizer_loop:local_listener.start";
pub const RECORD_BEGIN: &str = "recognizer_loop:record_begin";
pub const RECORD_END: &str = "recognizer_loop:record_end";
pub const LOCAL_LISTENER_END: &str = "recognizer_loop:local_listener.end";
pub const WAKE_UP: &str = "recognizer_loop:wake_up";
pub const UTTERANCE: &str = "recognizer_loop:utterance";

/// Source tag attached to every message's context.
pub const MESSAGE_SOURCE: &str = "LocalListener";

/// Broadcast channel capacity: 256 messages buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// One bus message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Message {
    /// A message with empty data and the default listener context.
    pub fn new(msg_type: impl Into<String>) -> Self {
        let mut context = Map::new();
        context.insert("source".into(), Value::from(MESSAGE_SOURCE));
        Self {
            msg_type: msg_type.into(),
            data: Map::new(),
            context,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// `recognizer_loop:utterance` carrying one lower-cased utterance.
    pub fn utterance(text: &str, lang: &str) -> Self {
        let data = match json!({ "utterances": [text.to_lowercase()], "lang": lang }) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(UTTERANCE).with_data(data)
    }
}

/// Anything that can publish a [`Message`].
///
/// `emit` must not block for long: it is called from the listening loop.
pub trait EventBus: Send + Sync + 'static {
    fn emit(&self, message: Message);
}

/// Discards every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBus;

impl EventBus for NullBus {
    fn emit(&self, _message: Message) {}
}

/// In-process bus fanning messages out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<Message>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for BroadcastBus {
    fn emit(&self, message: Message) {
        // No subscribers is not an error.
        let _ = self.tx.send(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_type_field_and_default_context() {
        let json = serde_json::to_value(Message::new(RECORD_BEGIN)).unwrap();
        assert_eq!(json["type"], "recognizer_loop:record_begin");
        assert_eq!(json["context"]["source"], "LocalListener");
        assert!(json["data"].as_object().unwrap().is_empty());
    }

    #[test]
    fn utterance_message_lowercases_text() {
        let msg = Message::utterance("Hello World", "en-us");
        assert_eq!(msg.msg_type, UTTERANCE);
        assert_eq!(msg.data["utterances"], json!(["hello world"]));
        assert_eq!(msg.data["lang"], "en-us");

        let round_trip: Message =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(round_trip, msg);
    }

    #[test]
    fn message_without_data_or_context_deserializes() {
        let msg: Message = serde_json::from_str(r#"{"type":"recognizer_loop:wake_up"}"#).unwrap();
        assert_eq!(msg.msg_type, WAKE_UP);
        assert!(msg.context.is_empty());
    }

    #[test]
    fn broadcast_bus_delivers_to_subscribers() {
        let bus = BroadcastBus::new();
        bus.emit(Message::new(SLEEP));

        let mut rx = bus.subscribe();
        bus.emit(Message::new(WAKE_UP));
        assert_eq!(rx.try_recv().unwrap().msg_type, WAKE_UP);
        assert!(rx.try_recv().is_err());
    }
}
