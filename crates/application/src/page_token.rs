//! Opaque pagination tokens.
//!
//! A page token is never interpreted by callers; it round-trips whatever a
//! store adapter needs to resume a scan (a last-seen key, an offset, ...).
//! Adapters encode/decode their own cursor shape through this helper so the
//! wire representation (base64 of JSON) stays consistent across adapters.

use flowctl_core::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a cursor value into an opaque page token string.
pub fn encode<T: Serialize>(cursor: &T) -> AppResult<String> {
    let json = serde_json::to_vec(cursor)
        .map_err(|error| AppError::Internal(format!("failed to encode page token: {error}")))?;
    Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json))
}

/// Decodes a page token string back into a cursor value.
pub fn decode<T: DeserializeOwned>(token: &str) -> AppResult<T> {
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token)
        .map_err(|error| AppError::InvalidPageToken(format!("malformed page token: {error}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|error| AppError::InvalidPageToken(format!("malformed page token payload: {error}")))
}

#[cfg(test)]
mod tests {
    use super::{decode, encode};
    use flowctl_core::AppResult;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        offset: u32,
    }

    #[test]
    fn round_trips_a_cursor() {
        let token = encode(&Cursor { offset: 42 });
        assert!(token.is_ok());
        let decoded: AppResult<Cursor> = decode(&token.ok().unwrap_or(String::new()));
        assert_eq!(decoded.ok(), Some(Cursor { offset: 42 }));
    }

    #[test]
    fn rejects_garbage_tokens() {
        let result: Result<Cursor, _> = decode("not a valid token!!");
        assert!(result.is_err());
    }
}
