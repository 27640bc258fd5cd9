//! The JSON wire message exchanged with the companion server.

pub(crate) mod stream;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::manager::Manifest;

/// Reserved channel for frames addressed to this client.
pub const CLIENT_CHANNEL: &str = "client";

/// Reserved channel for frames this client addresses to the server.
pub const SERVER_CHANNEL: &str = "server";

/// Message kind of a liveness probe.
pub const KIND_PING: &str = "ping";

/// Message kind of a liveness probe reply.
pub const KIND_PONG: &str = "pong";

const KIND_MANIFEST: &str = "manifest";

/// Decode text frame to message error
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum DecodeMessageError {
    /// the frame text is not valid json
    #[snafu(display("parse text frame as json failed: {source}"))]
    ParseJSONFailed {
        /// frame text
        text: String,
        /// source error
        source: serde_json::Error,
    },

    /// the frame json is not an object
    #[snafu(display("the frame json is not an object: {json}"))]
    NotObject {
        /// frame json
        json: Value,
    },

    /// the frame object lacks required fields
    #[snafu(display("the frame object has invalid shape: {source}"))]
    InvalidShape {
        /// frame json
        json: Value,
        /// source error
        source: serde_json::Error,
    },
}

/// One frame of application traffic.
///
/// `app` names the channel, `kind` the message type within it. `request`,
/// `payload` and `client` are optional; any other fields a server includes
/// are preserved in `extra` so listeners see the frame unaltered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// target channel, an application name or a reserved channel
    pub app: String,

    /// message type within the channel
    #[serde(rename = "type")]
    pub kind: String,

    /// sub-type qualifier, present on request-style messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,

    /// free-form message body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// id of the client the frame concerns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// fields this library does not interpret, carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Construct a message with only a channel and kind set.
    pub fn new<A: Into<String>, K: Into<String>>(app: A, kind: K) -> Self {
        Self {
            app: app.into(),
            kind: kind.into(),
            request: None,
            payload: None,
            client: None,
            extra: Map::new(),
        }
    }

    /// Decode a text frame into a message.
    pub fn decode(text: &str) -> Result<Self, DecodeMessageError> {
        let json: Value = serde_json::from_str(text).context(error::ParseJSONFailed { text })?;

        ensure!(json.is_object(), error::NotObject { json });

        serde_json::from_value(json.clone()).context(error::InvalidShape { json })
    }

    /// Encode the message as a text frame.
    pub fn encode(&self) -> String {
        // serializing a map-backed struct to a string can't fail
        serde_json::to_string(self).unwrap()
    }

    /// True if the frame arrived on the reserved client channel.
    pub fn is_client_channel(&self) -> bool {
        self.app == CLIENT_CHANNEL
    }

    pub(crate) fn ping_probe() -> Self {
        Self::new(SERVER_CHANNEL, KIND_PING)
    }

    pub(crate) fn pong_reply() -> Self {
        Self::new(SERVER_CHANNEL, KIND_PONG)
    }

    pub(crate) fn manifest_reply(manifest: &Manifest) -> Self {
        let mut message = Self::new(SERVER_CHANNEL, KIND_MANIFEST);
        message.payload = Some(serde_json::json!({
            "name": manifest.name,
            "version": manifest.version,
        }));
        message
    }
}

#[cfg(test)]
mod test {
    mod decode {
        use crate::message::Message;

        #[test]
        fn full_frame() {
            let message = Message::decode(
                r#"{
                    "app": "weather",
                    "type": "update",
                    "request": "current",
                    "payload": {"temp": 21},
                    "client": "cabin-1",
                    "trace": "abc"
                }"#,
            )
            .unwrap();

            assert_eq!(message.app, "weather");
            assert_eq!(message.kind, "update");
            assert_eq!(message.request.as_deref(), Some("current"));
            assert_eq!(message.payload.unwrap()["temp"], 21);
            assert_eq!(message.client.as_deref(), Some("cabin-1"));
            assert_eq!(message.extra["trace"], "abc");
        }

        #[test]
        fn minimal_frame() {
            let message = Message::decode(r#"{"app": "client", "type": "ping"}"#).unwrap();

            assert!(message.is_client_channel());
            assert_eq!(message.kind, "ping");
            assert!(message.request.is_none());
            assert!(message.payload.is_none());
            assert!(message.client.is_none());
            assert!(message.extra.is_empty());
        }

        #[test]
        fn missing_type() {
            let result = Message::decode(r#"{"app": "client"}"#);

            assert!(matches!(
                result,
                Err(crate::message::DecodeMessageError::InvalidShape { .. })
            ));
        }

        #[test]
        fn not_an_object() {
            let result = Message::decode("[1, 2, 3]");

            assert!(matches!(
                result,
                Err(crate::message::DecodeMessageError::NotObject { .. })
            ));
        }

        #[test]
        fn not_json() {
            let result = Message::decode("{nope");

            assert!(matches!(
                result,
                Err(crate::message::DecodeMessageError::ParseJSONFailed { .. })
            ));
        }
    }

    mod encode {
        use crate::message::Message;

        #[test]
        fn renames_kind_and_skips_absent_fields() {
            let text = Message::new("weather", "update").encode();
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();

            assert_eq!(json["type"], "update");
            assert_eq!(json["app"], "weather");
            assert!(json.get("request").is_none());
            assert!(json.get("payload").is_none());
            assert!(json.get("client").is_none());
        }

        #[test]
        fn probe_shape() {
            let text = Message::ping_probe().encode();
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();

            assert_eq!(json, serde_json::json!({"app": "server", "type": "ping"}));
        }

        #[test]
        fn round_trips_extra_fields() {
            let mut message = Message::new("media", "play");
            message
                .extra
                .insert("track".to_string(), serde_json::json!("song-9"));

            let decoded = Message::decode(&message.encode()).unwrap();

            assert_eq!(decoded.extra["track"], "song-9");
        }
    }
}
