use crate::conversations;
use crate::db::uuid_at;
use crate::error::ChatError;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

/// Flag every undelivered message authored by someone other than `user` as
/// delivered. Returns how many messages flipped.
pub fn mark_delivered(
    conn: &mut Connection,
    conversation_id: &Uuid,
    user: &Uuid,
) -> Result<usize, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    conversations::require_participant(&tx, conversation_id, user)?;
    let changed = tx.execute(
        "UPDATE messages SET is_delivered = 1 WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_delivered = 0",
        params![conversation_id.to_string(), user.to_string()],
    )?;
    tx.commit()?;
    Ok(changed)
}

/// Record that `reader` has read the conversation, or one message of it.
///
/// For a whole conversation only messages not yet read are flipped and gain a
/// reader entry. Entries are keyed by (message, reader), so repeating the call
/// adds nothing. The reader's unread counter is reset in every case. Returns the
/// number of new reader entries.
pub fn mark_read(
    conn: &mut Connection,
    conversation_id: &Uuid,
    reader: &Uuid,
    message_id: Option<&Uuid>,
    read_at: i64,
) -> Result<usize, ChatError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    conversations::require_participant(&tx, conversation_id, reader)?;
    let added = match message_id {
        Some(mid) => {
            let sender = tx
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1 AND conversation_id = ?2",
                    params![mid.to_string(), conversation_id.to_string()],
                    |row| uuid_at(row, 0),
                )
                .optional()?
                .ok_or(ChatError::NotFound("message"))?;
            if &sender == reader {
                0
            } else {
                tx.execute(
                    "UPDATE messages SET is_read = 1 WHERE id = ?1 AND is_read = 0",
                    [mid.to_string()],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                    params![mid.to_string(), reader.to_string(), read_at],
                )?
            }
        }
        None => {
            // Only messages that flip to read gain a reader entry.
            let added = tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) SELECT id, ?2, ?3 FROM messages WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                params![conversation_id.to_string(), reader.to_string(), read_at],
            )?;
            tx.execute(
                "UPDATE messages SET is_read = 1 WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                params![conversation_id.to_string(), reader.to_string()],
            )?;
            added
        }
    };
    tx.execute(
        "UPDATE conversation_participants SET unread_count = 0 WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id.to_string(), reader.to_string()],
    )?;
    tx.commit()?;
    Ok(added)
}
