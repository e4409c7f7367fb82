//! Wire message alphabets exchanged over the framed TCP connection.
//!
//! Both directions are closed tagged unions keyed on a `type` field;
//! unrecognized fields on incoming frames are ignored by construction
//! (serde only reads the fields each variant declares).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A channel as presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A single channel member as presented in `channel_joined` / `user_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    pub username: String,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// A stored chat message, as replayed in history or broadcast live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub channel: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "auth_register")]
    AuthRegister { username: String, password: String },
    #[serde(rename = "auth_login")]
    AuthLogin { username: String, password: String },
    #[serde(rename = "channel_join")]
    ChannelJoin { channel: String },
    #[serde(rename = "channel_leave")]
    ChannelLeave { channel: String },
    #[serde(rename = "channel_create")]
    ChannelCreate { name: String, description: String },
    #[serde(rename = "channel_list")]
    ChannelList {},
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        channel: Option<String>,
        content: String,
    },
    #[serde(rename = "private_message")]
    PrivateMessage { to: String, content: String },
    #[serde(rename = "action")]
    Action {
        #[serde(default)]
        channel: Option<String>,
        content: String,
    },
    #[serde(rename = "user_list")]
    UserList {
        #[serde(default)]
        channel: Option<String>,
    },
}

/// Frames the server may send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth_result")]
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "channel_info")]
    ChannelInfo { channels: Vec<ChannelInfo> },
    #[serde(rename = "channel_joined")]
    ChannelJoined {
        channel: String,
        history: Vec<ChatMessage>,
        users: Vec<MemberInfo>,
    },
    #[serde(rename = "channel_created")]
    ChannelCreated { channel: ChannelInfo },
    #[serde(rename = "message")]
    Message {
        id: i64,
        channel: String,
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "private_message")]
    PrivateMessage {
        from: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "action")]
    Action {
        channel: String,
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "user_joined")]
    UserJoined { channel: String, username: String },
    #[serde(rename = "user_left")]
    UserLeft { channel: String, username: String },
    #[serde(rename = "user_list")]
    UserList {
        channel: String,
        users: Vec<MemberInfo>,
    },
    #[serde(rename = "status_change")]
    StatusChange {
        username: String,
        status: PresenceStatus,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(rename = "system")]
    System { message: String },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_ignores_unknown_fields() {
        let raw = r#"{"type":"auth_login","username":"alice","password":"hunter2","extra":123}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::AuthLogin { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "hunter2");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn message_defaults_missing_channel_to_none() {
        let raw = r#"{"type":"message","content":"hi"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Message { channel, content } => {
                assert_eq!(channel, None);
                assert_eq!(content, "hi");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_message_tags_by_type() {
        let msg = ServerMessage::error("not_found", "no such channel");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "not_found");
    }

    #[test]
    fn auth_result_omits_absent_optionals() {
        let msg = ServerMessage::AuthResult {
            success: false,
            token: None,
            username: None,
            error: Some("bad credentials".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("token").is_none());
        assert!(json.get("username").is_none());
        assert_eq!(json["error"], "bad credentials");
    }
}
