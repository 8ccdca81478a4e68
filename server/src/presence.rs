use crate::broadcast::Broadcaster;
use crate::conversations;
use crate::db::{now_ms, Db};
use crate::error::ChatError;
use crate::users;
use chat_protocol::{PresenceNotice, ServerEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// When a disconnect takes a user offline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresencePolicy {
    /// Every disconnect flips the user offline, even with other sessions open.
    #[default]
    AnyDisconnect,
    /// Offline only once the user's last connection closes.
    LastConnection,
}

/// Persists the online flag and announces transitions to every conversation
/// the user belongs to.
pub struct PresenceTracker {
    db: Db,
    broadcaster: Arc<dyn Broadcaster>,
    policy: PresencePolicy,
    state: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    counts: HashMap<Uuid, usize>,
    seq: i64,
}

impl Sessions {
    /// Next transition stamp. Seeded from the clock so stamps stay above
    /// those persisted by an earlier run.
    fn next_seq(&mut self) -> i64 {
        self.seq = self.seq.max(now_ms().saturating_mul(1000)) + 1;
        self.seq
    }
}

impl PresenceTracker {
    pub fn new(db: Db, broadcaster: Arc<dyn Broadcaster>, policy: PresencePolicy) -> Self {
        Self {
            db,
            broadcaster,
            policy,
            state: Mutex::new(Sessions::default()),
        }
    }

    /// Register a connection. Returns true if an online transition was announced.
    pub async fn connected(&self, user_id: Uuid) -> bool {
        let stamp = {
            let mut state = self.state.lock();
            let c = state.counts.entry(user_id).or_insert(0);
            *c += 1;
            let first = *c == 1;
            match self.policy {
                PresencePolicy::AnyDisconnect => Some(state.next_seq()),
                PresencePolicy::LastConnection => first.then(|| state.next_seq()),
            }
        };
        match stamp {
            Some(seq) => {
                self.transition(user_id, true, seq).await;
                true
            }
            None => false,
        }
    }

    /// Deregister a connection. Returns true if an offline transition was announced.
    pub async fn disconnected(&self, user_id: Uuid) -> bool {
        let stamp = {
            let mut state = self.state.lock();
            let last = match state.counts.get_mut(&user_id) {
                Some(c) if *c > 1 => {
                    *c -= 1;
                    false
                }
                _ => {
                    state.counts.remove(&user_id);
                    true
                }
            };
            match self.policy {
                PresencePolicy::AnyDisconnect => Some(state.next_seq()),
                PresencePolicy::LastConnection => last.then(|| state.next_seq()),
            }
        };
        match stamp {
            Some(seq) => {
                self.transition(user_id, false, seq).await;
                true
            }
            None => false,
        }
    }

    /// Persist and announce one transition. The stamp is taken under the
    /// session lock, so when writes race the later transition wins and a
    /// superseded one is neither stored nor announced.
    async fn transition(&self, user_id: Uuid, online: bool, seq: i64) {
        let at = now_ms();
        let res = self
            .db
            .run(move |conn| {
                if !users::set_presence(conn, &user_id, online, at, seq)? {
                    return Ok(None);
                }
                conversations::conversation_ids_for_user(conn, &user_id).map(Some)
            })
            .await;
        let ids = match res {
            Ok(Some(ids)) => ids,
            Ok(None) => {
                debug!(user_id = %user_id, online, "superseded presence transition dropped");
                return;
            }
            Err(e) => {
                error!(user_id = %user_id, online, error = %e, "presence update failed");
                return;
            }
        };
        debug!(user_id = %user_id, online, conversations = ids.len(), "presence transition");
        for conversation_id in ids {
            let notice = PresenceNotice {
                conversation_id,
                user_id,
                last_seen: if online { None } else { Some(at) },
            };
            let event = if online {
                ServerEvent::UserOnline(notice)
            } else {
                ServerEvent::UserOffline(notice)
            };
            self.broadcaster.to_conversation(&conversation_id, &event, None);
        }
    }
}

impl PresencePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresencePolicy::AnyDisconnect => "any-disconnect",
            PresencePolicy::LastConnection => "last-connection",
        }
    }
}

impl std::str::FromStr for PresencePolicy {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any-disconnect" => Ok(PresencePolicy::AnyDisconnect),
            "last-connection" => Ok(PresencePolicy::LastConnection),
            other => Err(ChatError::Validation(format!(
                "unknown presence policy: {other}"
            ))),
        }
    }
}
