use crate::auth::Identity;
use crate::broadcast::{Broadcaster, ConnectionId};
use crate::db::Db;
use crate::error::ChatError;
use crate::groups::GroupRegistry;
use crate::membership::MembershipManager;
use crate::notify::OfflineNotifier;
use crate::pipeline::MessagePipeline;
use crate::presence::{PresencePolicy, PresenceTracker};
use crate::receipts::ReceiptTracker;
use crate::typing::TypingRelay;
use chat_protocol::{decode_client_event, ClientEvent, Connected, ServerEvent};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Owns the live connections and routes their events to the components.
///
/// Per connection: `activate` once authenticated, `dispatch` for every inbound
/// frame in arrival order, `close` once the transport is gone.
pub struct ChatHub {
    registry: Arc<GroupRegistry>,
    membership: MembershipManager,
    presence: PresenceTracker,
    pipeline: MessagePipeline,
    receipts: ReceiptTracker,
    typing: TypingRelay,
}

impl ChatHub {
    pub fn new(db: Db, policy: PresencePolicy, notifier: Arc<dyn OfflineNotifier>) -> Self {
        let registry = Arc::new(GroupRegistry::new());
        let broadcaster: Arc<dyn Broadcaster> = registry.clone();
        Self {
            membership: MembershipManager::new(db.clone(), registry.clone()),
            presence: PresenceTracker::new(db.clone(), broadcaster.clone(), policy),
            pipeline: MessagePipeline::new(db.clone(), broadcaster.clone(), notifier),
            receipts: ReceiptTracker::new(db, broadcaster.clone()),
            typing: TypingRelay::new(broadcaster),
            registry,
        }
    }

    pub fn broadcaster(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &MessagePipeline {
        &self.pipeline
    }

    pub fn receipts(&self) -> &ReceiptTracker {
        &self.receipts
    }

    /// Bring an authenticated session to Active: join its groups, announce
    /// it online, then greet it. Returns the outbound frame stream.
    pub async fn activate(&self, who: &Identity) -> (ConnectionId, UnboundedReceiver<String>) {
        let (connection, rx) = self.registry.register(who.user_id);
        let joined = self.membership.join_all(connection, who.user_id).await;
        self.presence.connected(who.user_id).await;
        self.registry.to_connection(
            &connection,
            &ServerEvent::Connected(Connected {
                user_id: who.user_id,
                connection_id: connection,
            }),
        );
        info!(user_id = %who.user_id, connection_id = %connection, joined, "session active");
        (connection, rx)
    }

    /// Handle one inbound text frame.
    pub async fn dispatch(&self, who: &Identity, origin: ConnectionId, text: &str) {
        let event = match decode_client_event(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(user_id = %who.user_id, error = %e, "rejected frame");
                self.reply_error(&origin, &ChatError::from(e));
                return;
            }
        };
        let res = match event {
            ClientEvent::SendMessage(req) => self.pipeline.send(who, req).await.map(drop),
            ClientEvent::Typing(signal) => {
                self.typing.relay(who, origin, signal);
                Ok(())
            }
            ClientEvent::Read(req) => self.receipts.mark_read(who, req).await,
            ClientEvent::Delivered(ack) => self
                .receipts
                .mark_delivered(who, ack.conversation_id)
                .await
                .map(drop),
            ClientEvent::DeleteMessage(req) => self.pipeline.delete(who, req.message_id).await.map(drop),
        };
        if let Err(e) = res {
            self.reply_error(&origin, &e);
        }
    }

    fn reply_error(&self, origin: &ConnectionId, e: &ChatError) {
        if let ChatError::Storage(detail) | ChatError::Internal(detail) = e {
            warn!(connection_id = %origin, error = %detail, "operation failed");
        }
        self.registry
            .to_connection(origin, &ServerEvent::error(e.client_message()));
    }

    /// Tear down a connection: leave every group, then run the offline
    /// transition. Clean and abrupt closes take the same path.
    pub async fn close(&self, who: &Identity, connection: ConnectionId) {
        let groups = self.registry.groups_of(&connection).len();
        self.registry.remove(&connection);
        self.presence.disconnected(who.user_id).await;
        info!(user_id = %who.user_id, connection_id = %connection, groups, "session closed");
    }
}
