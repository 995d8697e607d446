//! Real-time channel event frames
//!
//! Frames are JSON objects of the form `{"event": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{EmployeeId, EntityKind, RecordId};
use crate::Result;

/// Event names a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    DataUpdate,
    Notification,
    ConnectionEstablished,
    Error,
}

impl EventName {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataUpdate => "data_update",
            Self::Notification => "notification",
            Self::ConnectionEstablished => "connection_established",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records changed on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataUpdate {
    /// Affected kind, when the change is limited to one
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub record_ids: Vec<RecordId>,
    /// Backend change time (Unix ms)
    #[serde(default)]
    pub changed_at: Option<i64>,
}

/// Free-form message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
}

/// Sent by the backend once the subscription is live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub employee_id: EmployeeId,
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Channel-level failure, from the backend or the local connection task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelError {
    pub message: String,
}

/// One frame on the real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    DataUpdate(DataUpdate),
    Notification(Notification),
    ConnectionEstablished(ConnectionInfo),
    Error(ChannelError),
}

impl RealtimeEvent {
    pub const fn name(&self) -> EventName {
        match self {
            Self::DataUpdate(_) => EventName::DataUpdate,
            Self::Notification(_) => EventName::Notification,
            Self::ConnectionEstablished(_) => EventName::ConnectionEstablished,
            Self::Error(_) => EventName::Error,
        }
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn channel_error(message: impl Into<String>) -> Self {
        Self::Error(ChannelError {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_data_update_frame() {
        let event = RealtimeEvent::parse(
            r#"{"event":"data_update","data":{"kind":"trip","changed_at":1700000000000}}"#,
        )
        .unwrap();
        assert_eq!(event.name(), EventName::DataUpdate);
        assert_eq!(
            event,
            RealtimeEvent::DataUpdate(DataUpdate {
                kind: Some(EntityKind::Trip),
                record_ids: Vec::new(),
                changed_at: Some(1_700_000_000_000),
            })
        );
    }

    #[test]
    fn frame_uses_event_and_data_keys() {
        let event = RealtimeEvent::ConnectionEstablished(ConnectionInfo {
            employee_id: EmployeeId::new("emp-1").unwrap(),
            connection_id: None,
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();
        assert_eq!(value["event"], "connection_established");
        assert_eq!(value["data"]["employee_id"], "emp-1");
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(RealtimeEvent::parse(r#"{"event":"presence","data":{}}"#).is_err());
    }
}
