use crate::db::{now_ms, uuid_at};
use crate::error::ChatError;
use chat_protocol::UserProfile;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

pub const PROFILE_COLUMNS: &str = "u.id, u.name, u.email, u.avatar, u.is_online, u.last_seen";

/// Map the six [`PROFILE_COLUMNS`] starting at `offset`.
pub fn row_to_profile(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: uuid_at(row, offset)?,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        avatar: row.get(offset + 3)?,
        is_online: row.get::<_, i64>(offset + 4)? != 0,
        last_seen: row.get(offset + 5)?,
    })
}

/// Register a user with an already hashed password.
pub fn create_user(
    conn: &Connection,
    name: &str,
    email: &str,
    password_hash: &str,
) -> Result<UserProfile, ChatError> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(ChatError::Validation("name and email are required".into()));
    }
    let id = Uuid::new_v4();
    let res = conn.execute(
        "INSERT INTO users (id, name, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id.to_string(), name, email, password_hash, now_ms()],
    );
    match res {
        Ok(_) => Ok(UserProfile {
            id,
            name: name.into(),
            email: email.into(),
            avatar: None,
            is_online: false,
            last_seen: None,
        }),
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            Err(ChatError::Validation("email already registered".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_profile(conn: &Connection, id: &Uuid) -> Result<Option<UserProfile>, ChatError> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM users u WHERE u.id = ?1");
    let profile = conn
        .query_row(&sql, [id.to_string()], |row| row_to_profile(row, 0))
        .optional()?;
    Ok(profile)
}

/// Profile and password hash for a login attempt.
pub fn find_credentials(
    conn: &Connection,
    email: &str,
) -> Result<Option<(UserProfile, String)>, ChatError> {
    let sql = format!("SELECT {PROFILE_COLUMNS}, u.password_hash FROM users u WHERE u.email = ?1");
    let found = conn
        .query_row(&sql, [email.trim()], |row| {
            Ok((row_to_profile(row, 0)?, row.get::<_, String>(6)?))
        })
        .optional()?;
    Ok(found)
}

/// Persist the presence flag and last-seen timestamp stamped with `seq`.
///
/// A write carrying a sequence number not above the stored one is dropped,
/// so a late transition never overwrites a newer one. Returns false in that
/// case.
pub fn set_presence(
    conn: &Connection,
    id: &Uuid,
    online: bool,
    seen_at: i64,
    seq: i64,
) -> Result<bool, ChatError> {
    let changed = conn.execute(
        "UPDATE users SET is_online = ?2, last_seen = ?3, presence_seq = ?4 WHERE id = ?1 AND presence_seq < ?4",
        params![id.to_string(), online as i64, seen_at, seq],
    )?;
    if changed == 0 && find_profile(conn, id)?.is_none() {
        return Err(ChatError::NotFound("user"));
    }
    Ok(changed == 1)
}
