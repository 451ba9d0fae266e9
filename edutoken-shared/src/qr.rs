//! Event QR payload codec.
//!
//! The text encoded into an event QR code is a JSON envelope:
//! `{"eventId", "eventName", "tokenAmount", "tokenType", "timestamp"}`.
//! Bare identifiers are not accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Reward, TokenKind, now_utc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQrPayload {
    pub event_id: String,
    pub event_name: String,
    pub token_amount: i32,
    pub token_type: TokenKind,
    /// Unix epoch milliseconds at generation time.
    pub timestamp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("malformed QR payload: {0}")]
    Malformed(String),
    #[error("QR payload has non-positive token amount {0}")]
    InvalidAmount(i32),
    #[error("QR payload has empty event id")]
    MissingEventId,
}

impl EventQrPayload {
    pub fn new(event_id: impl Into<String>, event_name: impl Into<String>, reward: Reward) -> Self {
        let timestamp = (now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        Self {
            event_id: event_id.into(),
            event_name: event_name.into(),
            token_amount: reward.amount,
            token_type: reward.kind,
            timestamp,
        }
    }

    pub fn reward(&self) -> Reward {
        Reward::new(self.token_amount, self.token_type)
    }

    /// Text to render into the QR code.
    pub fn encode(&self) -> String {
        // Serializing a struct of plain fields cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses scanned text. Only the JSON envelope is accepted.
    pub fn decode(text: &str) -> Result<Self, QrError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(QrError::Malformed("expected a JSON object".into()));
        }
        let payload: EventQrPayload =
            serde_json::from_str(trimmed).map_err(|e| QrError::Malformed(e.to_string()))?;
        if payload.event_id.trim().is_empty() {
            return Err(QrError::MissingEventId);
        }
        if payload.token_amount <= 0 {
            return Err(QrError::InvalidAmount(payload.token_amount));
        }
        Ok(payload)
    }
}
