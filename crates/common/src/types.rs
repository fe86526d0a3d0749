use serde::{Deserialize, Serialize};

/// Identifier of a chat room that receives notifications (e.g. `!abc:example.org`).
///
/// Treated as opaque everywhere except the Matrix transport, which places it in a
/// request path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Alert payload layout produced by the monitoring source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertFormat {
    /// Legacy payloads carrying alerts under `"alert"`
    V1,
    /// Current payloads carrying alerts under `"alerts"`
    V2,
}

impl std::fmt::Display for AlertFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertFormat::V1 => write!(f, "v1"),
            AlertFormat::V2 => write!(f, "v2"),
        }
    }
}

/// Inbound webhook body. Either list may be absent; alerts are kept as raw JSON
/// objects because message templates address arbitrary fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Version 1 alerts
    #[serde(default)]
    pub alert: Vec<serde_json::Value>,
    /// Version 2+ alerts
    #[serde(default)]
    pub alerts: Vec<serde_json::Value>,
    /// Receiver name reported by Alertmanager, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
}

impl WebhookPayload {
    /// Iterate over every alert paired with the format it arrived in,
    /// version 1 alerts first.
    pub fn alerts_with_format(&self) -> impl Iterator<Item = (AlertFormat, &serde_json::Value)> {
        self.alert
            .iter()
            .map(|a| (AlertFormat::V1, a))
            .chain(self.alerts.iter().map(|a| (AlertFormat::V2, a)))
    }

    pub fn is_empty(&self) -> bool {
        self.alert.is_empty() && self.alerts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_is_transparent() {
        let room = RoomId::from("!abc:example.org");
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"!abc:example.org\"");
        assert_eq!(room.to_string(), "!abc:example.org");
    }

    #[test]
    fn test_payload_accepts_both_formats() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "alert": [{"summary": "old"}],
            "alerts": [{"status": "firing"}, {"status": "resolved"}]
        }))
        .unwrap();

        let formats: Vec<AlertFormat> = payload.alerts_with_format().map(|(f, _)| f).collect();
        assert_eq!(formats, vec![AlertFormat::V1, AlertFormat::V2, AlertFormat::V2]);
    }

    #[test]
    fn test_payload_missing_lists_default_to_empty() {
        let payload: WebhookPayload =
            serde_json::from_value(serde_json::json!({"receiver": "herald"})).unwrap();
        assert!(payload.is_empty());
        assert_eq!(payload.receiver.as_deref(), Some("herald"));
    }
}
