use crate::db::{now_ms, opt_uuid_at, uuid_at};
use crate::error::ChatError;
use crate::messages;
use crate::users::{row_to_profile, PROFILE_COLUMNS};
use chat_protocol::{Conversation, UnreadCount, UserProfile};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Namespace for deterministic direct-conversation ids.
const DIRECT_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

fn direct_key(a: &Uuid, b: &Uuid) -> String {
    let (min, max) = if a < b { (a, b) } else { (b, a) };
    format!("direct:{}:{}", min, max)
}

/// Deterministic id of the direct conversation between two users.
pub fn direct_conversation_id(a: &Uuid, b: &Uuid) -> Uuid {
    Uuid::new_v5(&DIRECT_NAMESPACE, direct_key(a, b).as_bytes())
}

fn user_exists(conn: &Connection, id: &Uuid) -> Result<bool, ChatError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn insert_participants(conn: &Connection, id: &Uuid, members: &[Uuid]) -> Result<(), ChatError> {
    let mut stmt = conn.prepare(
        "INSERT INTO conversation_participants (conversation_id, user_id, position, unread_count) VALUES (?1, ?2, ?3, 0)",
    )?;
    for (pos, user) in members.iter().enumerate() {
        stmt.execute(params![id.to_string(), user.to_string(), pos as i64])?;
    }
    Ok(())
}

/// Fetch or create the direct conversation between `a` and `b`.
///
/// Returns the conversation id and whether it was created by this call.
pub fn get_or_create_direct(
    conn: &mut Connection,
    a: &Uuid,
    b: &Uuid,
) -> Result<(Uuid, bool), ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let found = ensure_direct(&tx, a, b)?;
    tx.commit()?;
    Ok(found)
}

/// Body of [`get_or_create_direct`] for callers that already hold a
/// transaction.
pub(crate) fn ensure_direct(tx: &Connection, a: &Uuid, b: &Uuid) -> Result<(Uuid, bool), ChatError> {
    if a == b {
        return Err(ChatError::Validation(
            "cannot create a conversation with yourself".into(),
        ));
    }
    if !user_exists(tx, b)? || !user_exists(tx, a)? {
        return Err(ChatError::NotFound("user"));
    }
    let id = direct_conversation_id(a, b);
    let now = now_ms();
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO conversations (id, is_group, direct_key, created_at, updated_at) VALUES (?1, 0, ?2, ?3, ?3)",
        params![id.to_string(), direct_key(a, b), now],
    )?;
    if inserted == 1 {
        let mut pair = [*a, *b];
        pair.sort();
        insert_participants(tx, &id, &pair)?;
    }
    Ok((id, inserted == 1))
}

/// Create a group conversation administered by `creator`.
pub fn create_group(
    conn: &mut Connection,
    creator: &Uuid,
    name: &str,
    participants: &[Uuid],
) -> Result<Uuid, ChatError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("group name is required".into()));
    }
    if participants.len() < 2 {
        return Err(ChatError::Validation(
            "group must have at least 2 participants".into(),
        ));
    }
    let members: Vec<Uuid> = participants
        .iter()
        .chain(std::iter::once(creator))
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for member in &members {
        if !user_exists(&tx, member)? {
            return Err(ChatError::NotFound("user"));
        }
    }
    let id = Uuid::new_v4();
    let now = now_ms();
    tx.execute(
        "INSERT INTO conversations (id, is_group, name, admin_id, created_at, updated_at) VALUES (?1, 1, ?2, ?3, ?4, ?4)",
        params![id.to_string(), name, creator.to_string(), now],
    )?;
    insert_participants(&tx, &id, &members)?;
    tx.commit()?;
    Ok(id)
}

pub fn is_participant(conn: &Connection, id: &Uuid, user: &Uuid) -> Result<bool, ChatError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Participant-scoped existence check. Non-participants see `NotFound`.
pub fn require_participant(conn: &Connection, id: &Uuid, user: &Uuid) -> Result<(), ChatError> {
    if is_participant(conn, id, user)? {
        Ok(())
    } else {
        Err(ChatError::NotFound("conversation"))
    }
}

/// Ids of every conversation the user participates in.
pub fn conversation_ids_for_user(conn: &Connection, user: &Uuid) -> Result<Vec<Uuid>, ChatError> {
    let mut stmt =
        conn.prepare("SELECT conversation_id FROM conversation_participants WHERE user_id = ?1")?;
    let ids = stmt
        .query_map([user.to_string()], |row| uuid_at(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Participant profiles in conversation order, with their unread counters.
pub fn participants(conn: &Connection, id: &Uuid) -> Result<Vec<(UserProfile, u32)>, ChatError> {
    let sql = format!(
        "SELECT {PROFILE_COLUMNS}, p.unread_count FROM conversation_participants p JOIN users u ON u.id = p.user_id WHERE p.conversation_id = ?1 ORDER BY p.position"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([id.to_string()], |row| {
            Ok((row_to_profile(row, 0)?, row.get::<_, u32>(6)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn unread_count(conn: &Connection, id: &Uuid, user: &Uuid) -> Result<u32, ChatError> {
    let count: Option<u32> = conn
        .query_row(
            "SELECT unread_count FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
            params![id.to_string(), user.to_string()],
            |r| r.get(0),
        )
        .optional()?;
    count.ok_or(ChatError::NotFound("conversation"))
}

pub fn last_message_id(conn: &Connection, id: &Uuid) -> Result<Option<Uuid>, ChatError> {
    let found = conn
        .query_row(
            "SELECT last_message_id FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| opt_uuid_at(row, 0),
        )
        .optional()?;
    found.ok_or(ChatError::NotFound("conversation"))
}

struct ConversationRow {
    id: Uuid,
    is_group: bool,
    name: Option<String>,
    admin: Option<Uuid>,
    last_message_id: Option<Uuid>,
    created_at: i64,
    updated_at: i64,
}

const CONVERSATION_COLUMNS: &str =
    "c.id, c.is_group, c.name, c.admin_id, c.last_message_id, c.created_at, c.updated_at";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: uuid_at(row, 0)?,
        is_group: row.get::<_, i64>(1)? != 0,
        name: row.get(2)?,
        admin: opt_uuid_at(row, 3)?,
        last_message_id: opt_uuid_at(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn populate(
    conn: &Connection,
    row: ConversationRow,
    viewer: &Uuid,
) -> Result<Conversation, ChatError> {
    let members = participants(conn, &row.id)?;
    let unread_counts: Vec<UnreadCount> = members
        .iter()
        .map(|(p, count)| UnreadCount {
            user_id: p.id,
            count: *count,
        })
        .collect();
    let unread_count = unread_counts
        .iter()
        .find(|u| &u.user_id == viewer)
        .map(|u| u.count)
        .unwrap_or(0);
    let last_message = match row.last_message_id {
        Some(mid) => messages::load_message(conn, &mid)?,
        None => None,
    };
    Ok(Conversation {
        id: row.id,
        participants: members.into_iter().map(|(p, _)| p).collect(),
        is_group: row.is_group,
        name: row.name,
        admin: row.admin,
        last_message,
        unread_counts,
        unread_count,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Load a conversation as seen by `viewer`, who must participate in it.
pub fn load_for_viewer(conn: &Connection, id: &Uuid, viewer: &Uuid) -> Result<Conversation, ChatError> {
    require_participant(conn, id, viewer)?;
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], row_to_conversation)
        .optional()?
        .ok_or(ChatError::NotFound("conversation"))?;
    populate(conn, row, viewer)
}

/// Conversations of a user, most recently active first.
pub fn list_for_user(conn: &Connection, user: &Uuid) -> Result<Vec<Conversation>, ChatError> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations c JOIN conversation_participants p ON p.conversation_id = c.id WHERE p.user_id = ?1 ORDER BY c.updated_at DESC, c.rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user.to_string()], row_to_conversation)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|row| populate(conn, row, user))
        .collect()
}
