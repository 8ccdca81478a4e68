use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Public profile of a user as embedded in conversations and messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

/// Type tag of a message payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "document" => Ok(MessageKind::Document),
            other => Err(format!("unknown message type `{other}`")),
        }
    }
}

/// One entry of a message's reader set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: i64,
}

/// A persisted message with its sender populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserProfile,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub encrypted_content: Option<String>,
    pub delivered: bool,
    pub read: bool,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub created_at: i64,
}

/// Unread counter of one participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub user_id: Uuid,
    pub count: u32,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub participants: Vec<UserProfile>,
    pub is_group: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub admin: Option<Uuid>,
    #[serde(default)]
    pub last_message: Option<Message>,
    pub unread_counts: Vec<UnreadCount>,
    /// Unread counter of the viewing participant.
    pub unread_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    /// Unread counter for a given participant, zero when absent.
    pub fn unread_for(&self, user_id: &Uuid) -> u32 {
        self.unread_counts
            .iter()
            .find(|u| &u.user_id == user_id)
            .map(|u| u.count)
            .unwrap_or(0)
    }
}
