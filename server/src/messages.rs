use crate::conversations;
use crate::db::{now_ms, uuid_at};
use crate::error::ChatError;
use crate::users::{row_to_profile, PROFILE_COLUMNS};
use chat_protocol::{Message, MessageKind, ReadReceipt, SendMessage};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

/// Upper bound for one history page.
pub const MAX_PAGE_SIZE: usize = 200;

fn select_messages() -> String {
    format!(
        "SELECT m.id, m.conversation_id, m.content, m.kind, m.file, m.encrypted_content, m.is_delivered, m.is_read, m.created_at, {PROFILE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id"
    )
}

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        conversation_id: uuid_at(row, 1)?,
        content: row.get(2)?,
        kind: row
            .get::<_, String>(3)?
            .parse::<MessageKind>()
            .unwrap_or_default(),
        file: row.get(4)?,
        encrypted_content: row.get(5)?,
        delivered: row.get::<_, i64>(6)? != 0,
        read: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        sender: row_to_profile(row, 9)?,
        read_by: Vec::new(),
    })
}

fn readers(conn: &Connection, message_id: &Uuid) -> Result<Vec<ReadReceipt>, ChatError> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id, read_at FROM message_reads WHERE message_id = ?1 ORDER BY read_at, user_id",
    )?;
    let rows = stmt
        .query_map([message_id.to_string()], |row| {
            Ok(ReadReceipt {
                user_id: uuid_at(row, 0)?,
                read_at: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Load one message with its sender and reader set populated.
pub fn load_message(conn: &Connection, id: &Uuid) -> Result<Option<Message>, ChatError> {
    let sql = format!("{} WHERE m.id = ?1", select_messages());
    let msg = conn
        .query_row(&sql, [id.to_string()], row_to_msg)
        .optional()?;
    match msg {
        Some(mut m) => {
            m.read_by = readers(conn, &m.id)?;
            Ok(Some(m))
        }
        None => Ok(None),
    }
}

/// Persist a message from `sender` into `conversation_id`.
///
/// The insert, the conversation's last-message pointer and the unread
/// increments for every other participant commit together or not at all.
pub fn insert_message(
    conn: &mut Connection,
    conversation_id: &Uuid,
    sender: &Uuid,
    req: &SendMessage,
) -> Result<Message, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let id = append(&tx, conversation_id, sender, req)?;
    tx.commit()?;
    load_message(conn, &id)?.ok_or(ChatError::NotFound("message"))
}

/// Send to the direct conversation with `peer`, creating it in the same
/// transaction. A failed insert leaves no conversation behind. The flag is
/// true when this call created the conversation.
pub fn insert_direct_message(
    conn: &mut Connection,
    sender: &Uuid,
    peer: &Uuid,
    req: &SendMessage,
) -> Result<(Message, bool), ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (conversation_id, created) = conversations::ensure_direct(&tx, sender, peer)?;
    let id = append(&tx, &conversation_id, sender, req)?;
    tx.commit()?;
    let message = load_message(conn, &id)?.ok_or(ChatError::NotFound("message"))?;
    Ok((message, created))
}

fn append(
    tx: &Connection,
    conversation_id: &Uuid,
    sender: &Uuid,
    req: &SendMessage,
) -> Result<Uuid, ChatError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(ChatError::Validation("content is required".into()));
    }
    conversations::require_participant(tx, conversation_id, sender)?;
    let id = Uuid::new_v4();
    let now = now_ms();
    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, content, kind, file, encrypted_content, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            conversation_id.to_string(),
            sender.to_string(),
            content,
            req.kind.as_str(),
            req.file.as_deref(),
            req.encrypted_content.as_deref().filter(|s| !s.is_empty()),
            now
        ],
    )?;
    tx.execute(
        "UPDATE conversations SET last_message_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![conversation_id.to_string(), id.to_string(), now],
    )?;
    tx.execute(
        "UPDATE conversation_participants SET unread_count = unread_count + 1 WHERE conversation_id = ?1 AND user_id <> ?2",
        params![conversation_id.to_string(), sender.to_string()],
    )?;
    Ok(id)
}

/// One page of history, newest page first, returned oldest to newest.
pub fn list_messages(
    conn: &Connection,
    conversation_id: &Uuid,
    page: usize,
    limit: usize,
) -> Result<Vec<Message>, ChatError> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    // Pages past the end come back empty.
    let offset = page.saturating_sub(1).saturating_mul(limit);
    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    let sql = format!(
        "{} WHERE m.conversation_id = ?1 ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?2 OFFSET ?3",
        select_messages()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut msgs = stmt
        .query_map(
            params![conversation_id.to_string(), limit as i64, offset],
            row_to_msg,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for m in msgs.iter_mut() {
        m.read_by = readers(conn, &m.id)?;
    }
    msgs.reverse();
    Ok(msgs)
}

/// Most recent remaining message of a conversation.
pub fn latest_message_id(conn: &Connection, conversation_id: &Uuid) -> Result<Option<Uuid>, ChatError> {
    let id = conn
        .query_row(
            "SELECT id FROM messages WHERE conversation_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [conversation_id.to_string()],
            |row| uuid_at(row, 0),
        )
        .optional()?;
    Ok(id)
}

/// Outcome of a successful deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deleted {
    pub conversation_id: Uuid,
    /// New last-message pointer when the deleted message held it.
    pub new_last_message: Option<Option<Uuid>>,
}

/// Delete a message; only its sender may do so.
pub fn delete_message(
    conn: &mut Connection,
    message_id: &Uuid,
    requester: &Uuid,
) -> Result<Deleted, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (conversation_id, sender) = tx
        .query_row(
            "SELECT conversation_id, sender_id FROM messages WHERE id = ?1",
            [message_id.to_string()],
            |row| Ok((uuid_at(row, 0)?, uuid_at(row, 1)?)),
        )
        .optional()?
        .ok_or(ChatError::NotFound("message"))?;
    if &sender != requester {
        return Err(ChatError::NotAuthorized(
            "only the sender may delete a message".into(),
        ));
    }
    tx.execute("DELETE FROM messages WHERE id = ?1", [message_id.to_string()])?;
    let mut new_last_message = None;
    if conversations::last_message_id(&tx, &conversation_id)? == Some(*message_id) {
        let replacement = latest_message_id(&tx, &conversation_id)?;
        tx.execute(
            "UPDATE conversations SET last_message_id = ?2 WHERE id = ?1",
            params![
                conversation_id.to_string(),
                replacement.map(|id| id.to_string())
            ],
        )?;
        new_last_message = Some(replacement);
    }
    tx.commit()?;
    Ok(Deleted {
        conversation_id,
        new_last_message,
    })
}
