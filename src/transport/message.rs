//! graphql-ws protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message type, serialized with its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ConnectionInit,
    ConnectionAck,
    ConnectionError,
    ConnectionTerminate,
    #[serde(rename = "ka")]
    KeepAlive,
    Start,
    Data,
    Error,
    Complete,
    Stop,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::ConnectionTerminate => "connection_terminate",
            Self::KeepAlive => "ka",
            Self::Start => "start",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Stop => "stop",
        }
    }

    pub fn is_connection_related(&self) -> bool {
        matches!(
            self,
            Self::ConnectionInit
                | Self::ConnectionAck
                | Self::ConnectionError
                | Self::ConnectionTerminate
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol message. Not modified after it is handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl OperationMessage {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            id: None,
            message_type,
            payload: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn keep_alive() -> Self {
        Self::new(MessageType::KeepAlive)
    }

    pub fn connection_ack() -> Self {
        Self::new(MessageType::ConnectionAck)
    }

    pub fn connection_error(payload: Value) -> Self {
        Self::new(MessageType::ConnectionError).with_payload(payload)
    }

    pub fn data(id: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Data).with_id(id).with_payload(payload)
    }

    pub fn error(id: impl Into<String>, payload: Value) -> Self {
        Self::new(MessageType::Error).with_id(id).with_payload(payload)
    }

    pub fn complete(id: impl Into<String>) -> Self {
        Self::new(MessageType::Complete).with_id(id)
    }

    /// Id for log fields; `-` when the message has none.
    pub fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or("-")
    }
}

/// Timestamps in payloads: `yyyy-MM-ddTHH:mm:ss.fffffffZ`, always seven
/// fractional digits and a literal `Z`.
///
/// Use with `#[serde(with = "timestamp")]` on `DateTime<Utc>` fields.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(value: &DateTime<Utc>) -> String {
        // leap seconds report up to 1_999_999_999 nanoseconds
        let ticks = value.timestamp_subsec_nanos().min(999_999_999) / 100;
        format!("{}.{:07}Z", value.format("%Y-%m-%dT%H:%M:%S"), ticks)
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|value| value.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let message = OperationMessage::data("1", json!({"data": {"ticks": 3}}));
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(
            encoded,
            json!({"id": "1", "type": "data", "payload": {"data": {"ticks": 3}}})
        );

        let keep_alive = serde_json::to_string(&OperationMessage::keep_alive()).unwrap();
        assert_eq!(keep_alive, r#"{"type":"ka"}"#);
    }

    #[test]
    fn test_decode_start_message() {
        let message: OperationMessage = serde_json::from_str(
            r#"{"id":"7","type":"start","payload":{"query":"subscription { ticks }"}}"#,
        )
        .unwrap();
        assert_eq!(message.message_type, MessageType::Start);
        assert_eq!(message.log_id(), "7");
    }

    #[test]
    fn test_connection_related_types() {
        assert!(MessageType::ConnectionAck.is_connection_related());
        assert!(!MessageType::KeepAlive.is_connection_related());
        assert_eq!(MessageType::KeepAlive.to_string(), "ka");
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Event {
        #[serde(with = "timestamp")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_timestamp_has_seven_fraction_digits() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::nanoseconds(120_000_000);
        assert_eq!(timestamp::format(&at), "2024-03-09T07:05:01.1200000Z");

        let whole = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(timestamp::format(&whole), "2024-03-09T07:05:01.0000000Z");
    }

    #[test]
    fn test_timestamp_serde() {
        let at = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap()
            + chrono::Duration::nanoseconds(1_234_567_800);
        let encoded = serde_json::to_string(&Event { at }).unwrap();
        assert_eq!(encoded, r#"{"at":"2024-01-01T00:00:00.2345678Z"}"#);

        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.at, at);
    }
}
