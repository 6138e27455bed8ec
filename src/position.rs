// ABOUTME: Durable resume cursor for the container stream
// ABOUTME: Encodes phase, object key and watermark timestamp as an opaque byte blob

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SourceError};

/// Smallest step the watermark is advanced past an observed timestamp, so the
/// boundary object is never examined twice.
pub fn minimal_increment() -> Duration {
    Duration::nanoseconds(1)
}

/// Which producer is authoritative for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Snapshot = 0,
    Change = 1,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Snapshot => "snapshot",
            Phase::Change => "change",
        }
    }
}

impl TryFrom<u8> for Phase {
    type Error = SourceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Phase::Snapshot),
            1 => Ok(Phase::Change),
            other => Err(SourceError::InvalidPositionPhase(other)),
        }
    }
}

/// Where in the stream a record sits.
///
/// A `Change` position means "resume change detection strictly after
/// `timestamp`". A `Snapshot` position always restarts the snapshot from the
/// beginning; its key and timestamp are informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
}

#[derive(Serialize, Deserialize)]
struct WirePosition {
    key: String,
    timestamp: DateTime<Utc>,
    phase: u8,
}

impl Default for Position {
    fn default() -> Self {
        Self::default_snapshot()
    }
}

impl Position {
    /// Snapshot phase, empty key, zero timestamp.
    pub fn default_snapshot() -> Self {
        Self {
            key: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            phase: Phase::Snapshot,
        }
    }

    pub fn snapshot(key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            timestamp,
            phase: Phase::Snapshot,
        }
    }

    pub fn change(key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            timestamp,
            phase: Phase::Change,
        }
    }

    /// Same key and timestamp, re-labelled as a change-phase position.
    pub fn into_change(self) -> Self {
        Self {
            phase: Phase::Change,
            ..self
        }
    }

    /// True for the position produced by [`Position::default_snapshot`].
    pub fn is_default_snapshot(&self) -> bool {
        *self == Self::default_snapshot()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WirePosition {
            key: self.key.clone(),
            timestamp: self.timestamp,
            phase: self.phase as u8,
        };
        serde_json::to_vec(&wire).map_err(SourceError::EncodePosition)
    }

    /// Decodes a position previously produced by [`Position::encode`].
    ///
    /// An empty byte sequence yields the default snapshot position.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default_snapshot());
        }
        let wire: WirePosition =
            serde_json::from_slice(bytes).map_err(SourceError::CorruptPosition)?;
        Ok(Self {
            key: wire.key,
            timestamp: wire.timestamp,
            phase: Phase::try_from(wire.phase)?,
        })
    }

    /// Like [`Position::decode`], treating an absent position as empty.
    pub fn decode_optional(bytes: Option<&[u8]>) -> Result<Self> {
        Self::decode(bytes.unwrap_or_default())
    }
}
