//! Signaling wire events and bus events.
//!
//! Wire frames are JSON objects `{"event": "<name>", "data": <payload>}`.

use chrono::{DateTime, Utc};
use common::secret::{serialize_exposed, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One participant in the roster snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: String,
    #[serde(default)]
    pub socket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        rename = "photoURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub photo_url: Option<String>,
}

/// A chat message as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client-generated id, used to recognize our own messages echoed back.
    #[serde(default = "new_message_id")]
    pub id: String,
    pub meeting_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatMessage {
    #[must_use]
    pub fn new(meeting_id: &str, user_id: &str, name: Option<String>, text: &str) -> Self {
        Self {
            id: new_message_id(),
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            name,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Events the client emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Presence announcement after registering with the membership service.
    #[serde(rename_all = "camelCase")]
    NewUser {
        #[serde(serialize_with = "serialize_exposed")]
        token: SecretString,
        user_id: String,
        meeting_id: String,
    },

    SendMessage(ChatMessage),

    /// Host-only room-wide termination.
    #[serde(rename_all = "camelCase")]
    EndMeeting { meeting_id: String },
}

impl ClientEvent {
    /// Wire name, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::NewUser { .. } => "newUser",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::EndMeeting { .. } => "endMeeting",
        }
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full roster snapshot, with the user that caused it if known.
    #[serde(rename_all = "camelCase")]
    UsersOnline {
        users: Vec<RosterEntry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        joining_user: Option<RosterEntry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leaving_user: Option<RosterEntry>,
    },

    NewMessage(ChatMessage),

    #[serde(rename = "error")]
    ServerError { message: String },

    MeetingEnded,
}

/// Everything published on the signaling event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Connected { socket_id: String },
    Disconnected { reason: String },
    ConnectError { message: String },
    ReconnectAttempt { attempt: u32 },
    Reconnected { attempt: u32 },
    ReconnectFailed { attempts: u32 },
    Server(ServerEvent),
}

/// Subscription key on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    ConnectError,
    ReconnectAttempt,
    Reconnect,
    ReconnectFailed,
    UsersOnline,
    NewMessage,
    ServerError,
    MeetingEnded,
}

/// Domain listeners removed by `SignalingClient::disconnect` before the
/// transport is closed.
pub const DOMAIN_EVENT_KINDS: [EventKind; 3] = [
    EventKind::UsersOnline,
    EventKind::NewMessage,
    EventKind::ServerError,
];

impl SignalingEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            SignalingEvent::Connected { .. } => EventKind::Connect,
            SignalingEvent::Disconnected { .. } => EventKind::Disconnect,
            SignalingEvent::ConnectError { .. } => EventKind::ConnectError,
            SignalingEvent::ReconnectAttempt { .. } => EventKind::ReconnectAttempt,
            SignalingEvent::Reconnected { .. } => EventKind::Reconnect,
            SignalingEvent::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            SignalingEvent::Server(ServerEvent::UsersOnline { .. }) => EventKind::UsersOnline,
            SignalingEvent::Server(ServerEvent::NewMessage(_)) => EventKind::NewMessage,
            SignalingEvent::Server(ServerEvent::ServerError { .. }) => EventKind::ServerError,
            SignalingEvent::Server(ServerEvent::MeetingEnded) => EventKind::MeetingEnded,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;
    use serde_json::json;

    #[test]
    fn test_new_user_wire_format() {
        let event = ClientEvent::NewUser {
            token: SecretString::from("id-token"),
            user_id: "u1".to_string(),
            meeting_id: "m1".to_string(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "newUser",
                "data": {"token": "id-token", "userId": "u1", "meetingId": "m1"}
            })
        );

        // Debug never shows the token
        assert!(!format!("{event:?}").contains("id-token"));
    }

    #[test]
    fn test_new_user_parses_back() {
        let raw = r#"{"event":"newUser","data":{"token":"t","userId":"u1","meetingId":"m1"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::NewUser { token, user_id, .. } => {
                assert_eq!(token.expose_secret(), "t");
                assert_eq!(user_id, "u1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_end_meeting_wire_format() {
        let event = ClientEvent::EndMeeting {
            meeting_id: "m9".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "endMeeting", "data": {"meetingId": "m9"}})
        );
        assert_eq!(event.name(), "endMeeting");
    }

    #[test]
    fn test_users_online_parses_roster() {
        let raw = json!({
            "event": "usersOnline",
            "data": {
                "users": [
                    {"userId": "u1", "socketId": "s1", "name": "Ana", "photoURL": "http://x/a.png"},
                    {"userId": "u2", "socketId": "s2"}
                ],
                "joiningUser": {"userId": "u2", "socketId": "s2"}
            }
        });

        let event: ServerEvent = serde_json::from_value(raw).unwrap();
        let ServerEvent::UsersOnline {
            users,
            joining_user,
            leaving_user,
        } = event
        else {
            panic!("expected usersOnline");
        };
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name.as_deref(), Some("Ana"));
        assert_eq!(users[0].photo_url.as_deref(), Some("http://x/a.png"));
        assert_eq!(joining_user.unwrap().user_id, "u2");
        assert!(leaving_user.is_none());
    }

    #[test]
    fn test_server_error_and_meeting_ended_parse() {
        let error: ServerEvent =
            serde_json::from_str(r#"{"event":"error","data":{"message":"Meeting is full"}}"#)
                .unwrap();
        assert_eq!(
            error,
            ServerEvent::ServerError {
                message: "Meeting is full".to_string()
            }
        );

        let ended: ServerEvent = serde_json::from_str(r#"{"event":"meetingEnded"}"#).unwrap();
        assert_eq!(ended, ServerEvent::MeetingEnded);
        assert_eq!(
            SignalingEvent::Server(ended).kind(),
            EventKind::MeetingEnded
        );
    }

    #[test]
    fn test_chat_message_defaults_fill_missing_fields() {
        let raw = r#"{"event":"newMessage","data":{"meetingId":"m1","userId":"u2","text":"hi"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        let ServerEvent::NewMessage(message) = event else {
            panic!("expected newMessage");
        };
        assert!(!message.id.is_empty());
        assert_eq!(message.text, "hi");
        assert!(message.name.is_none());
    }
}
