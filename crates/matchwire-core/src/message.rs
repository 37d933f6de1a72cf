//! Chat messages and drafts.
//!
//! A [`Message`] is immutable once created and lives as long as the session's
//! in-memory log. A [`MessageDraft`] is user input that passed validation and
//! is ready to be sent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DraftError, PayloadError};

/// Maximum draft length in characters (after trimming).
pub const MAX_DRAFT_CHARS: usize = 1000;

/// Unique message identifier.
///
/// Formatted as `<timestamp_ms>-<sequence>`, so ids sort roughly by creation
/// time and never collide within a session even when two messages share a
/// millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Build an id from a creation timestamp and a per-session sequence number.
    pub fn new(timestamp_ms: u64, sequence: u64) -> Self {
        Self(format!("{timestamp_ms}-{sequence}"))
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Regular chat text.
    Text,
    /// Notice generated by the system, not typed by a person.
    System,
}

/// A message in the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id.
    pub id: MessageId,
    /// Sender identifier (`"currentUser"` for locally sent messages).
    pub sender_id: String,
    /// Sender display name.
    pub sender_name: String,
    /// Message body.
    pub content: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Text or system notice.
    pub kind: MessageKind,
}

impl Message {
    /// True if this is a system notice.
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }

    /// Encode as CBOR for handing to a transport.
    pub fn to_cbor(&self) -> Result<Vec<u8>, PayloadError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| PayloadError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a CBOR payload produced by [`Message::to_cbor`].
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, PayloadError> {
        ciborium::from_reader(bytes).map_err(|e| PayloadError::Decode(e.to_string()))
    }
}

/// Validated message input.
///
/// Trimmed, non-empty, and at most [`MAX_DRAFT_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft(String);

impl MessageDraft {
    /// Validate raw user input.
    ///
    /// # Errors
    ///
    /// - `DraftError::Empty` if nothing but whitespace remains after trimming
    /// - `DraftError::TooLong` if the trimmed text exceeds [`MAX_DRAFT_CHARS`]
    pub fn parse(input: &str) -> Result<Self, DraftError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DraftError::Empty);
        }

        let len = trimmed.chars().count();
        if len > MAX_DRAFT_CHARS {
            return Err(DraftError::TooLong { len, max: MAX_DRAFT_CHARS });
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Validated content.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take ownership of the validated content.
    pub fn into_inner(self) -> String {
        self.0
    }
}
