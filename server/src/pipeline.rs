use crate::auth::Identity;
use crate::broadcast::Broadcaster;
use crate::conversations;
use crate::db::Db;
use crate::error::ChatError;
use crate::messages::{self, Deleted};
use crate::notify::OfflineNotifier;
use crate::obfuscation;
use chat_protocol::{DeletionNotice, Message, SendMessage, ServerEvent};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Send and delete, from validation through fan-out.
///
/// A send runs as one linear sequence: persist, broadcast, then the offline
/// sweep. Nothing reaches the group unless the write committed.
pub struct MessagePipeline {
    db: Db,
    broadcaster: Arc<dyn Broadcaster>,
    notifier: Arc<dyn OfflineNotifier>,
}

impl MessagePipeline {
    pub fn new(db: Db, broadcaster: Arc<dyn Broadcaster>, notifier: Arc<dyn OfflineNotifier>) -> Self {
        Self {
            db,
            broadcaster,
            notifier,
        }
    }

    pub async fn send(&self, who: &Identity, req: SendMessage) -> Result<Message, ChatError> {
        req.validate()?;
        if let Some(enc) = req.encrypted_content.as_deref() {
            obfuscation::check_envelope(enc)?;
        }
        let sender = who.user_id;
        let (message, created_with) = self
            .db
            .run(move |conn| match (req.conversation_id, req.to) {
                (Some(id), _) => Ok((messages::insert_message(conn, &id, &sender, &req)?, None)),
                (None, Some(to)) => {
                    let (message, created) = messages::insert_direct_message(conn, &sender, &to, &req)?;
                    Ok((message, created.then_some(to)))
                }
                (None, None) => Err(ChatError::Validation("conversationId is required".into())),
            })
            .await?;
        let conversation_id = message.conversation_id;
        if let Some(peer) = created_with {
            self.broadcaster.subscribe_user(&sender, &conversation_id);
            self.broadcaster.subscribe_user(&peer, &conversation_id);
        }
        debug!(message_id = %message.id, conversation_id = %conversation_id, sender = %sender, "message stored");
        self.broadcaster
            .to_conversation(&conversation_id, &ServerEvent::NewMessage(message.clone()), None);
        self.notify_offline(&message).await;
        Ok(message)
    }

    async fn notify_offline(&self, message: &Message) {
        let conversation_id = message.conversation_id;
        let members = match self
            .db
            .run(move |conn| conversations::participants(conn, &conversation_id))
            .await
        {
            Ok(members) => members,
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "offline sweep failed");
                return;
            }
        };
        for (recipient, _) in members
            .iter()
            .filter(|(p, _)| p.id != message.sender.id && !p.is_online)
        {
            if let Err(e) = self.notifier.notify(recipient, message) {
                warn!(recipient = %recipient.id, error = %e, "offline notification failed");
            }
        }
    }

    pub async fn delete(&self, who: &Identity, message_id: Uuid) -> Result<Deleted, ChatError> {
        let requester = who.user_id;
        let deleted = self
            .db
            .run(move |conn| messages::delete_message(conn, &message_id, &requester))
            .await?;
        let event = ServerEvent::MessageDeleted(DeletionNotice {
            conversation_id: deleted.conversation_id,
            message_id,
        });
        self.broadcaster
            .to_conversation(&deleted.conversation_id, &event, None);
        Ok(deleted)
    }
}
