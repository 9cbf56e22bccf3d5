use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{AppError, AppResult, CommunicationError};

/// Largest single wire message accepted from a peer.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Serializes `message` as one newline-terminated JSON document.
///
/// # Errors
///
/// Returns an error if the message cannot be serialized.
pub fn encode_line<M: Serialize>(message: &M) -> AppResult<Vec<u8>> {
    let mut payload = serde_json::to_vec(message).map_err(|err| {
        AppError::communication(CommunicationError::Serialize {
            context: "wire message",
            source: err,
        })
    })?;
    payload.push(b'\n');
    Ok(payload)
}

/// Decodes one line read from a peer. The trailing `\n` (and `\r`) are
/// optional.
///
/// # Errors
///
/// Returns an error if the line is oversized, not UTF-8, or not a valid
/// message.
pub fn decode_line<M: DeserializeOwned>(line: &[u8]) -> AppResult<M> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(AppError::communication(
            CommunicationError::WireMessageTooLarge {
                max_bytes: MAX_MESSAGE_BYTES,
            },
        ));
    }
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    let text = std::str::from_utf8(trimmed).map_err(|err| {
        AppError::communication(CommunicationError::WireMessageInvalidUtf8 { source: err })
    })?;
    serde_json::from_str::<M>(text).map_err(|err| {
        AppError::communication(CommunicationError::Deserialize {
            context: "wire message",
            source: err,
        })
    })
}
