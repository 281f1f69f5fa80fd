//! Wire Types
//!
//! Plain-text, prefix-tagged messages exchanged between peers, plus the
//! Sans-IO encode/decode helpers for each of them.

use crate::domain::entities::{PeerId, ShadowPosition, TextUpdate};
use crate::replication::diff::EditScript;
use serde::{Deserialize, Serialize};

/// Roster snapshot / heartbeat.
pub const THUMP_PREFIX: &str = "thump: ";
/// Incremental edit script.
pub const EDIT_PREFIX: &str = "edit: ";
/// Full document snapshot.
pub const TEXT_PREFIX: &str = "text: ";
/// Pointer position.
pub const SHADOW_PREFIX: &str = "shadow: ";
/// Request for a full snapshot after a failed apply.
pub const RESYNC_PREFIX: &str = "resync: ";

/// Malformed inbound payloads. Logged and dropped by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("malformed {prefix:?} message: {reason}")]
    Malformed { prefix: &'static str, reason: String },
}

impl MessageError {
    fn malformed(prefix: &'static str, reason: impl Into<String>) -> Self {
        MessageError::Malformed {
            prefix,
            reason: reason.into(),
        }
    }
}

/// One roster entry as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub peer_id: PeerId,
    pub display_name: String,
}

impl RosterEntry {
    pub fn new(peer_id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            peer_id,
            display_name: display_name.into(),
        }
    }
}

/// Roster snapshot. The first entry identifies the sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RosterSnapshot {
    pub entries: Vec<RosterEntry>,
}

impl RosterSnapshot {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self { entries }
    }

    /// The sender, i.e. the first entry.
    pub fn sender(&self) -> Option<&PeerId> {
        self.entries.first().map(|e| &e.peer_id)
    }

    /// Encode as `thump: id1=name1,id2=name2`.
    pub fn encode(&self) -> String {
        let body: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{}={}", e.peer_id, e.display_name))
            .collect();
        format!("{}{}", THUMP_PREFIX, body.join(","))
    }

    /// Parse the body of a `thump: ` message (prefix already stripped).
    pub fn parse(body: &str) -> Result<Self, MessageError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(MessageError::malformed(THUMP_PREFIX, "empty roster"));
        }

        let mut entries = Vec::new();
        for pair in body.split(',') {
            let (id, name) = pair
                .split_once('=')
                .ok_or_else(|| MessageError::malformed(THUMP_PREFIX, format!("missing '=' in {:?}", pair)))?;
            if id.is_empty() {
                return Err(MessageError::malformed(THUMP_PREFIX, "empty peer id"));
            }
            entries.push(RosterEntry::new(PeerId::new(id), name));
        }
        Ok(Self { entries })
    }
}

/// Incremental update: a line script plus enough baseline information for
/// the receiver to notice that it has diverged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessage {
    /// Line count of the anchored baseline the script was computed from.
    pub base_lines: usize,
    /// CRC32 of the baseline text.
    pub base_crc: u32,
    /// CRC32 of the text the script should produce.
    pub result_crc: u32,
    pub edits: EditScript<String>,
}

impl EditMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}{}", EDIT_PREFIX, serde_json::to_string(self)?))
    }

    pub fn parse(body: &str) -> Result<Self, MessageError> {
        serde_json::from_str(body).map_err(|e| MessageError::malformed(EDIT_PREFIX, e.to_string()))
    }
}

/// Checksum used for baseline checks.
pub fn text_crc(text: &str) -> u32 {
    crc32fast::hash(text.as_bytes())
}

/// Encode a full snapshot message.
pub fn encode_text_update(update: &TextUpdate) -> Result<String, serde_json::Error> {
    Ok(format!("{}{}", TEXT_PREFIX, serde_json::to_string(update)?))
}

/// Parse the body of a `text: ` message.
pub fn parse_text_update(body: &str) -> Result<TextUpdate, MessageError> {
    serde_json::from_str(body).map_err(|e| MessageError::malformed(TEXT_PREFIX, e.to_string()))
}

/// Encode a pointer position message.
pub fn encode_shadow(shadow: &ShadowPosition) -> Result<String, serde_json::Error> {
    Ok(format!("{}{}", SHADOW_PREFIX, serde_json::to_string(shadow)?))
}

/// Parse the body of a `shadow: ` message.
pub fn parse_shadow(body: &str) -> Result<ShadowPosition, MessageError> {
    serde_json::from_str(body).map_err(|e| MessageError::malformed(SHADOW_PREFIX, e.to_string()))
}

/// Encode a snapshot request.
pub fn encode_resync() -> String {
    RESYNC_PREFIX.to_string()
}
