use crate::models::{Message, MessageKind};
use crate::DecodeError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events a client may emit over its live connection.
///
/// Frames are adjacently tagged: `{"event": "send-message", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage(SendMessage),
    Typing(TypingSignal),
    Read(ReadRequest),
    Delivered(DeliveredAck),
    DeleteMessage(DeleteMessage),
}

/// Payload of `send-message`. The sender is always taken from the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Recipient of a direct conversation to create when `conversation_id` is absent.
    #[serde(default)]
    pub to: Option<Uuid>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub encrypted_content: Option<String>,
}

impl SendMessage {
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.conversation_id.is_none() && self.to.is_none() {
            return Err(DecodeError::Invalid("conversationId is required".into()));
        }
        if self.content.trim().is_empty() {
            return Err(DecodeError::Invalid("content is required".into()));
        }
        if self.file.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(DecodeError::Invalid("file must not be blank".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub conversation_id: Uuid,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub message_id: Option<Uuid>,
}

/// Client acknowledgement that it received the conversation's messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredAck {
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: Uuid,
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected(Connected),
    NewMessage(Message),
    Typing(TypingNotice),
    MessagesRead(ReadNotice),
    MessagesDelivered(DeliveryNotice),
    MessageDeleted(DeletionNotice),
    UserOnline(PresenceNotice),
    UserOffline(PresenceNotice),
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Wire name of the event, as found in the `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::MessagesRead(_) => "messages-read",
            ServerEvent::MessagesDelivered(_) => "messages-delivered",
            ServerEvent::MessageDeleted(_) => "message-deleted",
            ServerEvent::UserOnline(_) => "user-online",
            ServerEvent::UserOffline(_) => "user-offline",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub user_id: Uuid,
    pub connection_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub message_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNotice {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}
