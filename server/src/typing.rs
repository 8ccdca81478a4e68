use crate::auth::Identity;
use crate::broadcast::{Broadcaster, ConnectionId};
use chat_protocol::{ServerEvent, TypingNotice, TypingSignal};
use std::sync::Arc;
use tracing::debug;

/// Forwards typing start/stop to the other members of a conversation group.
///
/// Nothing is persisted and nothing is acknowledged. A signal for a group the
/// connection never joined is dropped.
pub struct TypingRelay {
    broadcaster: Arc<dyn Broadcaster>,
}

impl TypingRelay {
    pub fn new(broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Returns true if the signal was relayed.
    pub fn relay(&self, who: &Identity, origin: ConnectionId, signal: TypingSignal) -> bool {
        if !self.broadcaster.is_member(&origin, &signal.conversation_id) {
            debug!(user_id = %who.user_id, conversation_id = %signal.conversation_id, "typing outside joined groups dropped");
            return false;
        }
        let event = ServerEvent::Typing(TypingNotice {
            conversation_id: signal.conversation_id,
            user_id: who.user_id,
            user_name: who.user_name.clone(),
            is_typing: signal.is_typing,
        });
        self.broadcaster
            .to_conversation(&signal.conversation_id, &event, Some(origin));
        true
    }
}
