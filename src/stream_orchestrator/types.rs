//! StreamOrchestrator message types

use crate::detection_filter::Detection;
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Inbound client message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `{"session_id": "..."}`
    Handshake { session_id: String },
    /// `{"type": "frame", "data": "..."}`; `data` is validated later
    Frame { data: Value },
    /// `{"type": "ping"}`
    Ping,
    /// Well-formed JSON of a kind this server does not handle
    Unknown(String),
}

impl InboundMessage {
    /// Parse one text message
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Protocol("message is not an object".to_string()))?;

        match obj.get("type") {
            Some(Value::String(kind)) => Ok(match kind.as_str() {
                "frame" => InboundMessage::Frame {
                    data: obj.get("data").cloned().unwrap_or(Value::Null),
                },
                "ping" => InboundMessage::Ping,
                other => InboundMessage::Unknown(other.to_string()),
            }),
            Some(other) => Err(Error::Protocol(format!("type must be a string, got {}", other))),
            None => match obj.get("session_id") {
                Some(Value::String(id)) => Ok(InboundMessage::Handshake {
                    session_id: id.clone(),
                }),
                Some(_) => Err(Error::Protocol("session_id must be a string".to_string())),
                None => Ok(InboundMessage::Unknown("untyped".to_string())),
            },
        }
    }
}

/// Outbound server message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Handshake acknowledgement
    Connected { session_id: String, message: String },

    /// Per-frame result; `error` is set and `detections` empty when the frame failed
    DetectionResult {
        session_id: String,
        detections: Vec<Detection>,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotated_frame: Option<String>,
        timestamp: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Pong,

    /// Periodic server-wide stats
    Stats {
        active_connections: u64,
        timestamp: String,
    },
}

impl OutboundMessage {
    /// Frame result carrying an error and no detections
    pub fn failed_frame(session_id: &str, error: impl Into<String>) -> Self {
        OutboundMessage::DetectionResult {
            session_id: session_id.to_string(),
            detections: Vec::new(),
            annotated_frame: None,
            timestamp: unix_timestamp(),
            error: Some(error.into()),
        }
    }
}

/// Transport-level event from the client connection
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Text(String),
    Closed,
    Failed(String),
}

/// Seconds since the epoch with millisecond precision
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            InboundMessage::parse(r#"{"session_id":"abc-1"}"#).unwrap(),
            InboundMessage::Handshake {
                session_id: "abc-1".to_string()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            InboundMessage::Ping
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"frame","data":"AAAA"}"#).unwrap(),
            InboundMessage::Frame {
                data: Value::String("AAAA".to_string())
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"frame"}"#).unwrap(),
            InboundMessage::Frame { data: Value::Null }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"subscribe"}"#).unwrap(),
            InboundMessage::Unknown("subscribe".to_string())
        );
    }

    #[test]
    fn test_parse_protocol_errors() {
        assert!(matches!(InboundMessage::parse("not json"), Err(Error::Protocol(_))));
        assert!(matches!(InboundMessage::parse("[1,2]"), Err(Error::Protocol(_))));
        assert!(matches!(
            InboundMessage::parse(r#"{"session_id":42}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(InboundMessage::parse(r#"{"type":7}"#), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_outbound_wire_format() {
        let pong = serde_json::to_value(OutboundMessage::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let failed = serde_json::to_value(OutboundMessage::failed_frame("s1", "Processing timeout")).unwrap();
        assert_eq!(failed["type"], "detection_result");
        assert_eq!(failed["session_id"], "s1");
        assert_eq!(failed["detections"], serde_json::json!([]));
        assert_eq!(failed["error"], "Processing timeout");
        assert!(failed["timestamp"].is_number());
        assert!(failed.get("annotated_frame").is_none());

        let connected = serde_json::to_value(OutboundMessage::Connected {
            session_id: "s1".to_string(),
            message: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(connected["type"], "connected");
    }
}
