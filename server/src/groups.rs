use crate::broadcast::{Broadcaster, ConnectionId};
use chat_protocol::ServerEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;
use uuid::Uuid;

/// Named fan-out group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Conversation(Uuid),
    User(Uuid),
}

struct Outbox {
    user_id: Uuid,
    tx: UnboundedSender<String>,
    groups: HashSet<Group>,
}

#[derive(Default)]
struct Inner {
    outboxes: HashMap<ConnectionId, Outbox>,
    members: HashMap<Group, HashSet<ConnectionId>>,
}

impl Inner {
    fn join(&mut self, connection: ConnectionId, group: Group) {
        if let Some(out) = self.outboxes.get_mut(&connection) {
            out.groups.insert(group);
            self.members.entry(group).or_default().insert(connection);
        }
    }

    fn remove(&mut self, connection: &ConnectionId) -> Option<Outbox> {
        let out = self.outboxes.remove(connection)?;
        for group in &out.groups {
            if let Some(set) = self.members.get_mut(group) {
                set.remove(connection);
                if set.is_empty() {
                    self.members.remove(group);
                }
            }
        }
        Some(out)
    }

    /// Deliver a frame to one connection; a closed receiver unregisters it.
    fn deliver(&mut self, connection: &ConnectionId, frame: &str) {
        let alive = match self.outboxes.get(connection) {
            Some(out) => out.tx.send(frame.to_owned()).is_ok(),
            None => return,
        };
        if !alive {
            self.remove(connection);
        }
    }

    fn publish(&mut self, group: Group, frame: &str, except: Option<ConnectionId>) {
        let targets: Vec<ConnectionId> = match self.members.get(&group) {
            Some(set) => set.iter().copied().filter(|c| Some(*c) != except).collect(),
            None => return,
        };
        for connection in targets {
            self.deliver(&connection, frame);
        }
    }
}

/// In-process registry of live connections and the groups they belong to.
#[derive(Default)]
pub struct GroupRegistry {
    inner: Mutex<Inner>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `user_id`, returning its id and the stream
    /// of encoded frames addressed to it. The connection joins its user group.
    pub fn register(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock();
        inner.outboxes.insert(
            id,
            Outbox {
                user_id,
                tx,
                groups: HashSet::new(),
            },
        );
        inner.join(id, Group::User(user_id));
        (id, rx)
    }

    /// Add a connection to a group. Joining twice is a no-op.
    pub fn join(&self, connection: ConnectionId, group: Group) {
        self.inner.lock().join(connection, group);
    }

    /// Drop a connection from every group. Returns its user when it was known.
    pub fn remove(&self, connection: &ConnectionId) -> Option<Uuid> {
        self.inner.lock().remove(connection).map(|out| out.user_id)
    }

    /// Live connections of a user.
    pub fn connection_count(&self, user_id: &Uuid) -> usize {
        self.inner
            .lock()
            .members
            .get(&Group::User(*user_id))
            .map_or(0, HashSet::len)
    }

    pub fn groups_of(&self, connection: &ConnectionId) -> Vec<Group> {
        self.inner
            .lock()
            .outboxes
            .get(connection)
            .map(|out| out.groups.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match event.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to encode event");
            None
        }
    }
}

impl Broadcaster for GroupRegistry {
    fn to_conversation(&self, conversation_id: &Uuid, event: &ServerEvent, except: Option<ConnectionId>) {
        if let Some(frame) = encode(event) {
            self.inner
                .lock()
                .publish(Group::Conversation(*conversation_id), &frame, except);
        }
    }

    fn to_user(&self, user_id: &Uuid, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.inner.lock().publish(Group::User(*user_id), &frame, None);
        }
    }

    fn to_connection(&self, connection: &ConnectionId, event: &ServerEvent) {
        if let Some(frame) = encode(event) {
            self.inner.lock().deliver(connection, &frame);
        }
    }

    fn subscribe_user(&self, user_id: &Uuid, conversation_id: &Uuid) {
        let mut inner = self.inner.lock();
        let connections: Vec<ConnectionId> = inner
            .members
            .get(&Group::User(*user_id))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for connection in connections {
            inner.join(connection, Group::Conversation(*conversation_id));
        }
    }

    fn is_member(&self, connection: &ConnectionId, conversation_id: &Uuid) -> bool {
        self.inner
            .lock()
            .members
            .get(&Group::Conversation(*conversation_id))
            .is_some_and(|set| set.contains(connection))
    }
}
