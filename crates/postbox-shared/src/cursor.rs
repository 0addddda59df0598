//! Opaque pagination cursor for inbox listings.
//!
//! A cursor records the `(sent_at, id)` key of the last message returned, so
//! a resumed listing continues strictly after it regardless of inserts made
//! in between. Tokens carry no server state and can be resumed by any
//! process.
//!
//! Wire format: base64url (no padding) of the bincode encoding of
//! [`CursorPayload`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::CURSOR_VERSION;
use crate::error::CursorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub sent_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    version: u8,
    sent_at_micros: i64,
    id: [u8; 16],
}

impl PageCursor {
    pub fn new(sent_at: DateTime<Utc>, id: Uuid) -> Self {
        Self { sent_at, id }
    }

    /// Encode the cursor as a base64url token.
    pub fn encode(&self) -> String {
        let payload = CursorPayload {
            version: CURSOR_VERSION,
            sent_at_micros: self.sent_at.timestamp_micros(),
            id: *self.id.as_bytes(),
        };
        // Fixed-size fields only; serializing into a Vec cannot fail.
        let bytes = bincode::serialize(&payload).unwrap_or_default();
        base64_url_encode(&bytes)
    }

    /// Decode a token produced by [`PageCursor::encode`].
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = base64_url_decode(token)?;
        let payload: CursorPayload =
            bincode::deserialize(&bytes).map_err(|_| CursorError::InvalidFormat)?;

        if payload.version != CURSOR_VERSION {
            return Err(CursorError::UnsupportedVersion(payload.version));
        }

        let sent_at = DateTime::from_timestamp_micros(payload.sent_at_micros)
            .ok_or(CursorError::TimestampOutOfRange)?;

        Ok(Self {
            sent_at,
            id: Uuid::from_bytes(payload.id),
        })
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for PageCursor {
    type Err = CursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, CursorError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| CursorError::Base64Decode)
}
