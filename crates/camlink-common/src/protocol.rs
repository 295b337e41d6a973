use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::helpers::iso_timestamp;

/// Event name used when an `event` message arrives without one.
pub const UNKNOWN_EVENT_NAME: &str = "unknown_event";

/// Signaling message exchanged over the WebSocket as a JSON text frame.
///
/// The wire shape is `{"type": "...", "payload": {...}}`, except for the
/// server greeting which carries a top-level `message`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// SDP offer from the publishing panel.
    Offer {
        #[serde(default)]
        payload: SdpPayload,
    },

    /// SDP answer from the receiving server.
    Answer {
        #[serde(default)]
        payload: SdpPayload,
    },

    /// Panel state notification (camera toggled, device changed, ...).
    Event {
        #[serde(default)]
        payload: EventPayload,
    },

    /// Greeting sent by the server as soon as a connection is accepted.
    Welcome { message: String },

    /// Any `type` this side does not understand.
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::Offer {
            payload: SdpPayload::new(sdp, "offer"),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::Answer {
            payload: SdpPayload::new(sdp, "answer"),
        }
    }

    /// Build an `event` message stamped with the current time.
    pub fn event(event: &PanelEvent) -> Self {
        Self::Event {
            payload: EventPayload {
                event_name: event.name().to_string(),
                data: event.data(),
                timestamp: Some(iso_timestamp()),
            },
        }
    }

    pub fn welcome(message: impl Into<String>) -> Self {
        Self::Welcome {
            message: message.into(),
        }
    }

    /// Wire name of the message type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Event { .. } => "event",
            Self::Welcome { .. } => "welcome",
            Self::Unknown => "unknown",
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Session description as browsers serialize `RTCSessionDescription`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SdpPayload {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sdp: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub kind: String,
}

impl SdpPayload {
    pub fn new(sdp: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: kind.into(),
        }
    }

    /// Both the SDP body and its type are present.
    pub fn is_complete(&self) -> bool {
        !self.sdp.trim().is_empty() && !self.kind.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventPayload {
    #[serde(rename = "eventName", default = "unknown_event_name")]
    pub event_name: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Default for EventPayload {
    fn default() -> Self {
        Self {
            event_name: unknown_event_name(),
            data: empty_object(),
            timestamp: None,
        }
    }
}

impl EventPayload {
    /// The typed event, if the name is one the panel emits.
    pub fn panel_event(&self) -> Option<PanelEvent> {
        PanelEvent::from_payload(self)
    }
}

/// State changes the control panel reports to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    CameraOn,
    CameraOff,
    DeviceChanged { device_id: String },
    StreamingStarted,
    StreamingStopped,
    ManualDisconnect,
}

impl PanelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CameraOn => "camera_on",
            Self::CameraOff => "camera_off",
            Self::DeviceChanged { .. } => "device_changed",
            Self::StreamingStarted => "streaming_started",
            Self::StreamingStopped => "streaming_stopped",
            Self::ManualDisconnect => "manual_disconnect",
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Self::DeviceChanged { device_id } => serde_json::json!({ "deviceId": device_id }),
            _ => empty_object(),
        }
    }

    /// Whether the receiving side must discard its peer connection and
    /// wait for a fresh offer.
    pub fn resets_receiver(&self) -> bool {
        matches!(
            self,
            Self::DeviceChanged { .. } | Self::StreamingStarted | Self::StreamingStopped
        )
    }

    pub fn from_payload(payload: &EventPayload) -> Option<Self> {
        let event = match payload.event_name.as_str() {
            "camera_on" => Self::CameraOn,
            "camera_off" => Self::CameraOff,
            "device_changed" => Self::DeviceChanged {
                device_id: payload
                    .data
                    .get("deviceId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "streaming_started" => Self::StreamingStarted,
            "streaming_stopped" => Self::StreamingStopped,
            "manual_disconnect" => Self::ManualDisconnect,
            _ => return None,
        };
        Some(event)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn unknown_event_name() -> String {
    UNKNOWN_EVENT_NAME.to_string()
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_browser_offer() {
        let text = r#"{"type":"offer","payload":{"sdp":"v=0\r\n","type":"offer"}}"#;
        let msg = SignalMessage::from_json(text).expect("parse");
        match msg {
            SignalMessage::Offer { payload } => {
                assert_eq!(payload.sdp, "v=0\r\n");
                assert_eq!(payload.kind, "offer");
                assert!(payload.is_complete());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_offer_without_payload_is_incomplete() {
        let msg = SignalMessage::from_json(r#"{"type":"offer"}"#).expect("parse");
        let SignalMessage::Offer { payload } = msg else {
            panic!("expected offer");
        };
        assert!(!payload.is_complete());

        let msg =
            SignalMessage::from_json(r#"{"type":"offer","payload":{"sdp":null,"type":"offer"}}"#)
                .expect("parse");
        let SignalMessage::Offer { payload } = msg else {
            panic!("expected offer");
        };
        assert!(payload.sdp.is_empty());
        assert!(!payload.is_complete());
    }

    #[test]
    fn test_answer_wire_shape() {
        let value: Value =
            serde_json::from_str(&SignalMessage::answer("v=0").to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "answer", "payload": {"sdp": "v=0", "type": "answer"}})
        );
    }

    #[test]
    fn test_welcome_wire_shape() {
        let value: Value =
            serde_json::from_str(&SignalMessage::welcome("hello").to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "welcome", "message": "hello"}));
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let msg = SignalMessage::from_json(r#"{"type":"candidate","payload":{}}"#).unwrap();
        assert_eq!(msg, SignalMessage::Unknown);
        assert!(SignalMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_event_defaults() {
        let msg = SignalMessage::from_json(r#"{"type":"event","payload":{}}"#).unwrap();
        let SignalMessage::Event { payload } = msg else {
            panic!("expected event");
        };
        assert_eq!(payload.event_name, UNKNOWN_EVENT_NAME);
        assert_eq!(payload.data, json!({}));
        assert!(payload.panel_event().is_none());
    }

    #[test]
    fn test_device_changed_round_trip_through_payload() {
        let event = PanelEvent::DeviceChanged {
            device_id: "abc123".into(),
        };
        let SignalMessage::Event { payload } = SignalMessage::event(&event) else {
            panic!("expected event");
        };
        assert_eq!(payload.event_name, "device_changed");
        assert_eq!(payload.data, json!({"deviceId": "abc123"}));
        assert!(payload.timestamp.as_deref().unwrap().ends_with('Z'));
        assert_eq!(payload.panel_event(), Some(event));
    }

    #[test]
    fn test_receiver_reset_events() {
        assert!(PanelEvent::StreamingStarted.resets_receiver());
        assert!(PanelEvent::StreamingStopped.resets_receiver());
        assert!(PanelEvent::DeviceChanged {
            device_id: String::new()
        }
        .resets_receiver());
        assert!(!PanelEvent::CameraOn.resets_receiver());
        assert!(!PanelEvent::CameraOff.resets_receiver());
        assert!(!PanelEvent::ManualDisconnect.resets_receiver());
    }
}
