//! Domain Entities - Core collaboration objects
//!
//! These entities represent the core concepts shared by the membership and
//! synchronization layers. They carry no I/O and no locking.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier assigned to a peer by the transport.
///
/// Stable for the lifetime of a session and used as a map key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selection range inside the document, in characters.
///
/// `start == end` is a plain cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A collapsed selection at `pos`.
    pub fn caret(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }

    /// Clamp both endpoints to a document of `len` characters.
    pub fn clamped(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }

    /// Shift both endpoints by `delta` characters, saturating at zero and
    /// clamping to `len`.
    pub fn shifted(self, delta: i64, len: usize) -> Self {
        let shift = |pos: usize| -> usize {
            let moved = pos as i64 + delta;
            (moved.max(0) as usize).min(len)
        };
        Self {
            start: shift(self.start),
            end: shift(self.end),
        }
    }
}

/// The shared text document as seen by one peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub text: String,
    pub selection: Selection,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection: Selection::default(),
        }
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Cosmetic pointer marker for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowPosition {
    pub owner_id: PeerId,
    pub x: f64,
    pub y: f64,
    /// Hue rotation in turns (0.0..1.0).
    pub hue: f64,
}

impl ShadowPosition {
    pub fn new(owner_id: PeerId, hue: f64) -> Self {
        Self {
            owner_id,
            x: 0.0,
            y: 0.0,
            hue,
        }
    }
}

/// Full-document snapshot pushed to a newly met peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUpdate {
    /// Full document text.
    pub text: String,
    /// Selection start of the sender when the snapshot was taken.
    pub source_position: usize,
}
