//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct JobCursorPayload {
    created_at: OffsetDateTime,
    id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LedgerCursorPayload {
    created_at: OffsetDateTime,
    id: Uuid,
}

/// Cursor for paginating render jobs in reverse chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobCursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

/// Cursor for paginating credit ledger entries in reverse chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerCursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

impl JobCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> String {
        let payload = JobCursorPayload {
            created_at: self.created_at,
            id: self.id,
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing job cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: JobCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            created_at: payload.created_at,
            id: payload.id,
        })
    }
}

impl LedgerCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> String {
        let payload = LedgerCursorPayload {
            created_at: self.created_at,
            id: self.id,
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing ledger cursor payload should succeed");
        URL_SAFE_NO_PAD.encode(serialized)
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: LedgerCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            created_at: payload.created_at,
            id: payload.id,
        })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_cursor_round_trip() {
        let id = Uuid::new_v4();
        let when = OffsetDateTime::now_utc();
        let cursor = JobCursor::new(when, id);
        let encoded = cursor.encode();
        let decoded = JobCursor::decode(&encoded).expect("decoded job cursor");

        assert_eq!(decoded.created_at(), when);
        assert_eq!(decoded.id(), id);
    }

    #[test]
    fn ledger_cursor_round_trip() {
        let id = Uuid::new_v4();
        let when = OffsetDateTime::now_utc();
        let cursor = LedgerCursor::new(when, id);
        let encoded = cursor.encode();
        let decoded = LedgerCursor::decode(&encoded).expect("decoded ledger cursor");

        assert_eq!(decoded.created_at(), when);
        assert_eq!(decoded.id(), id);
    }

    #[test]
    fn decoding_invalid_cursor_reports_error() {
        let err = JobCursor::decode("not-base64").expect_err("invalid cursor rejected");
        assert!(matches!(err, PaginationError::InvalidCursor(_)));
    }
}
