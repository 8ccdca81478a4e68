//! Shape check for the optional `encryptedContent` field.
//!
//! Clients obfuscate message text with a passphrase-based AES envelope
//! (OpenSSL `Salted__` format) keyed by a secret shared by every client. That
//! is not confidentiality: anyone holding the client bundle can reverse it.
//! The server never sees the key; it only checks the envelope is well formed
//! and stores it verbatim. Real per-conversation key exchange is not provided.

use crate::error::ChatError;
use base64::{engine::general_purpose::STANDARD, Engine as _};

const MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const BLOCK: usize = 16;

/// Validate an obfuscated payload. Empty strings are treated as absent.
pub fn check_envelope(raw: &str) -> Result<(), ChatError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    let bytes = STANDARD
        .decode(raw)
        .map_err(|_| ChatError::Validation("encryptedContent is not base64".into()))?;
    let header = MAGIC.len() + SALT_LEN;
    if bytes.len() <= header || !bytes.starts_with(MAGIC) {
        return Err(ChatError::Validation(
            "encryptedContent is not a salted envelope".into(),
        ));
    }
    if (bytes.len() - header) % BLOCK != 0 {
        return Err(ChatError::Validation(
            "encryptedContent has a truncated block".into(),
        ));
    }
    Ok(())
}
