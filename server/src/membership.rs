use crate::broadcast::ConnectionId;
use crate::conversations;
use crate::db::Db;
use crate::groups::{Group, GroupRegistry};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Subscribes a fresh connection to its user group and one group per
/// conversation the user participates in.
pub struct MembershipManager {
    db: Db,
    registry: Arc<GroupRegistry>,
}

impl MembershipManager {
    pub fn new(db: Db, registry: Arc<GroupRegistry>) -> Self {
        Self { db, registry }
    }

    /// Returns the number of conversation groups joined. Enumeration failures
    /// are logged and leave the connection in its user group only.
    pub async fn join_all(&self, connection: ConnectionId, user_id: Uuid) -> usize {
        self.registry.join(connection, Group::User(user_id));
        let ids = match self
            .db
            .run(move |conn| conversations::conversation_ids_for_user(conn, &user_id))
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "could not enumerate conversations");
                return 0;
            }
        };
        for id in &ids {
            self.registry.join(connection, Group::Conversation(*id));
        }
        debug!(user_id = %user_id, groups = ids.len(), "joined conversation groups");
        ids.len()
    }
}
