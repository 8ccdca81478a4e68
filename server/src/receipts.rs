use crate::auth::Identity;
use crate::broadcast::Broadcaster;
use crate::db::{now_ms, Db};
use crate::error::ChatError;
use crate::{messages, reads};
use chat_protocol::{DeliveryNotice, Message, ReadNotice, ReadRequest, ServerEvent};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Delivered/read transitions and the receipt events they produce.
pub struct ReceiptTracker {
    db: Db,
    broadcaster: Arc<dyn Broadcaster>,
}

impl ReceiptTracker {
    pub fn new(db: Db, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { db, broadcaster }
    }

    fn announce_delivered(&self, conversation_id: Uuid, user_id: Uuid, changed: usize) {
        if changed == 0 {
            return;
        }
        debug!(conversation_id = %conversation_id, user_id = %user_id, changed, "messages delivered");
        let event = ServerEvent::MessagesDelivered(DeliveryNotice {
            conversation_id,
            user_id,
        });
        self.broadcaster.to_conversation(&conversation_id, &event, None);
    }

    /// Mark everything others sent in the conversation as delivered to `who`.
    pub async fn mark_delivered(&self, who: &Identity, conversation_id: Uuid) -> Result<usize, ChatError> {
        let user_id = who.user_id;
        let changed = self
            .db
            .run(move |conn| reads::mark_delivered(conn, &conversation_id, &user_id))
            .await?;
        self.announce_delivered(conversation_id, user_id, changed);
        Ok(changed)
    }

    /// Mark the conversation, or one message in it, as read by `who`.
    pub async fn mark_read(&self, who: &Identity, req: ReadRequest) -> Result<(), ChatError> {
        let user_id = who.user_id;
        let ReadRequest {
            conversation_id,
            message_id,
        } = req;
        let added = self
            .db
            .run(move |conn| {
                reads::mark_read(conn, &conversation_id, &user_id, message_id.as_ref(), now_ms())
            })
            .await?;
        debug!(conversation_id = %conversation_id, user_id = %user_id, added, "messages read");
        let event = ServerEvent::MessagesRead(ReadNotice {
            conversation_id,
            user_id,
            message_id,
        });
        self.broadcaster.to_conversation(&conversation_id, &event, None);
        Ok(())
    }

    /// One page of history for `who`. Fetching counts as receipt, so
    /// undelivered messages from others flip to delivered first.
    pub async fn fetch_history(
        &self,
        who: &Identity,
        conversation_id: Uuid,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Message>, ChatError> {
        let user_id = who.user_id;
        let (changed, page) = self
            .db
            .run(move |conn| {
                let changed = reads::mark_delivered(conn, &conversation_id, &user_id)?;
                let page = messages::list_messages(conn, &conversation_id, page, limit)?;
                Ok((changed, page))
            })
            .await?;
        self.announce_delivered(conversation_id, user_id, changed);
        Ok(page)
    }
}
