use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a message.
pub type MessageId = Uuid;

/// Unique identifier for a live connection (one per socket, not per user).
pub type ConnectionId = Uuid;

pub type UserId = Uuid;

pub type ChannelId = Uuid;

/// Durable presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    /// Unknown values read as offline.
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            _ => Self::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Minimal author projection attached to every delivered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorInfo {
    pub id: UserId,
    pub username: String,
    pub profile_picture: Option<String>,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentAuthorInfo {
    pub id: UserId,
    pub username: String,
}

/// The message a reply points at, when it exists in the same channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentMessageInfo {
    pub id: MessageId,
    pub user: ParentAuthorInfo,
}

/// A persisted message joined with its author. Both the room broadcast and
/// the request/response path hand out exactly this representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithAuthor {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub content: String,
    pub reply_to: Option<MessageId>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub is_moderated: bool,
    pub moderation_flags: Vec<String>,
    pub user: AuthorInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message: Option<ParentMessageInfo>,
}

/// Durable per-(message, user) marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub id: Uuid,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Commands sent from a client over the live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Subscribe this connection to every channel the user belongs to.
    JoinChannels,

    SendMessage {
        channel_id: ChannelId,
        content: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },

    TypingStart { channel_id: ChannelId },

    TypingStop { channel_id: ChannelId },
}

/// Events pushed from the server to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Sent once after the connection is authenticated and registered.
    Ready { user_id: UserId, username: String },

    /// A message was committed to a channel this connection is subscribed to.
    NewMessage { message: MessageWithAuthor },

    /// Typing indicator relay. Stateless, last write wins on the client.
    UserTyping {
        user_id: UserId,
        username: String,
        channel_id: ChannelId,
        is_typing: bool,
    },

    /// Global presence transition: the user's first connection opened.
    UserOnline {
        user_id: UserId,
        username: String,
        status: PresenceStatus,
    },

    /// Global presence transition: the user's last connection closed.
    UserOffline {
        user_id: UserId,
        username: String,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },

    /// A command from this connection failed.
    Error { message: String },
}
