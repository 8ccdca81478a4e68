use chat_protocol::ServerEvent;
use uuid::Uuid;

/// Identifier of one live client connection.
pub type ConnectionId = Uuid;

/// Fan-out of server events to named groups of connections.
///
/// Every conversation has a group, and so does every user (all of that
/// user's connections). Delivery is fire-and-forget: a connection that has
/// gone away is dropped from its groups on the next send.
pub trait Broadcaster: Send + Sync {
    /// Send to every connection subscribed to the conversation, except
    /// `except` when given.
    fn to_conversation(&self, conversation_id: &Uuid, event: &ServerEvent, except: Option<ConnectionId>);

    /// Send to every connection of a user.
    fn to_user(&self, user_id: &Uuid, event: &ServerEvent);

    /// Send to a single connection.
    fn to_connection(&self, connection: &ConnectionId, event: &ServerEvent);

    /// Subscribe every live connection of `user_id` to a conversation group.
    fn subscribe_user(&self, user_id: &Uuid, conversation_id: &Uuid);

    /// Whether `connection` is subscribed to the conversation group.
    fn is_member(&self, connection: &ConnectionId, conversation_id: &Uuid) -> bool;
}
