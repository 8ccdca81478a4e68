//! Wire types shared by the chat server and its clients.
//!
//! Every frame on the live connection is a JSON object carrying an `event`
//! tag and a `data` payload. Client frames are validated here, before they
//! reach any server component.

pub mod events;
pub mod models;

pub use events::*;
pub use models::*;

use thiserror::Error;

/// Failure to turn a client frame into a [`ClientEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Parse and validate one client frame.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, DecodeError> {
    let event: ClientEvent = serde_json::from_str(text)?;
    if let ClientEvent::SendMessage(send) = &event {
        send.validate()?;
    }
    Ok(event)
}
