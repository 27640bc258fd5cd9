//! Classification of reserved-channel frames the server sends to this client.

use enum_as_inner::EnumAsInner;
use serde_json::Value;

use crate::message::Message;

/// What a non-control frame on the reserved client channel is asking for.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum ServerFrame {
    /// the server asks the client to introduce itself
    ManifestRequest,

    /// the server publishes its corrected wall clock
    TimeSync {
        /// server time in epoch milliseconds
        server_time_ms: i64,
    },

    /// a frame this library does not interpret
    Unrecognized,
}

impl ServerFrame {
    /// Classify a client-channel message that is not a heartbeat frame.
    pub fn classify(message: &Message) -> Self {
        match (message.kind.as_str(), message.request.as_deref()) {
            ("request", Some("manifest")) => Self::ManifestRequest,
            ("time", _) => match server_time_ms(message.payload.as_ref()) {
                Some(server_time_ms) => Self::TimeSync { server_time_ms },
                None => Self::Unrecognized,
            },
            _ => Self::Unrecognized,
        }
    }
}

// Accepts both payload shapes seen from servers: a bare number of epoch
// milliseconds, or an object carrying it under "time".
fn server_time_ms(payload: Option<&Value>) -> Option<i64> {
    match payload? {
        Value::Number(n) => n.as_i64(),
        Value::Object(map) => map.get("time")?.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(kind: &str, request: Option<&str>, payload: Option<serde_json::Value>) -> Message {
        let mut message = Message::new("client", kind);
        message.request = request.map(str::to_string);
        message.payload = payload;
        message
    }

    #[test]
    fn manifest_request() {
        let classified = ServerFrame::classify(&frame("request", Some("manifest"), None));

        assert!(matches!(classified, ServerFrame::ManifestRequest));
    }

    #[test]
    fn time_sync_number_payload() {
        let classified = ServerFrame::classify(&frame(
            "time",
            None,
            Some(serde_json::json!(1700000000000_i64)),
        ));

        assert_eq!(classified.into_time_sync().unwrap(), 1700000000000);
    }

    #[test]
    fn time_sync_object_payload() {
        let classified = ServerFrame::classify(&frame(
            "time",
            None,
            Some(serde_json::json!({"time": 42})),
        ));

        assert_eq!(classified.into_time_sync().unwrap(), 42);
    }

    #[test]
    fn time_sync_without_usable_payload() {
        let classified = ServerFrame::classify(&frame("time", None, None));

        assert!(matches!(classified, ServerFrame::Unrecognized));
    }

    #[test]
    fn unknown_request_kind() {
        let classified = ServerFrame::classify(&frame("request", Some("reboot"), None));

        assert!(matches!(classified, ServerFrame::Unrecognized));
    }

    #[test]
    fn unknown_kind() {
        let classified = ServerFrame::classify(&frame("settings", None, None));

        assert!(matches!(classified, ServerFrame::Unrecognized));
    }
}
