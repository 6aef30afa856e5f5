//! Shared types for the parking gate controller

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an opaque, URL-safe random identifier (22 chars)
pub fn new_opaque_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

/// Newtype wrapper for slot IDs (stable, pre-provisioned 1..=N)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for session IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(new_opaque_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Occupancy status of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Free,
    Reserved,
    Occupied,
}

impl SlotStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "free",
            SlotStatus::Reserved => "reserved",
            SlotStatus::Occupied => "occupied",
        }
    }
}

/// A single parking space.
///
/// `session_id` is set iff `status` is reserved or occupied; the
/// constructors below are the only way the pair changes together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub id: SlotId,
    pub status: SlotStatus,
    pub session_id: Option<SessionId>,
}

impl Slot {
    pub fn free(id: SlotId) -> Self {
        Self { id, status: SlotStatus::Free, session_id: None }
    }

    pub fn reserved(id: SlotId, session_id: SessionId) -> Self {
        Self { id, status: SlotStatus::Reserved, session_id: Some(session_id) }
    }

    pub fn occupied(id: SlotId, session_id: SessionId) -> Self {
        Self { id, status: SlotStatus::Occupied, session_id: Some(session_id) }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.status == SlotStatus::Free
    }

    /// True if this slot is currently held by the given session
    pub fn is_held_by(&self, session_id: &SessionId) -> bool {
        self.session_id.as_ref() == Some(session_id)
    }
}

/// One vehicle's occupancy of a slot, from entry claim to exit.
///
/// Sessions are never deleted once committed; exit stamps `end_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: SessionId,
    /// Claim token the session originated from
    pub token: String,
    pub slot_id: SlotId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Session {
    pub fn start(token: &str, slot_id: SlotId) -> Self {
        Self {
            id: SessionId::generate(),
            token: token.to_string(),
            slot_id,
            start_time: Utc::now(),
            end_time: None,
            is_active: true,
        }
    }

    /// Mark the session inactive, stamping the end time
    pub fn finish(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.end_time = Some(at);
    }
}

/// What a claim token authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Entry,
    Exit,
}

impl TokenKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Entry => "entry",
            TokenKind::Exit => "exit",
        }
    }
}

/// A short-lived credential scanned from a QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}

impl PendingToken {
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Which beam sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeamSide {
    Entry,
    Exit,
}

impl BeamSide {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            BeamSide::Entry => "entry",
            BeamSide::Exit => "exit",
        }
    }
}

/// Both beam sensors at one instant (true = blocked, vehicle present)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "entry")]
    pub entry_blocked: bool,
    #[serde(rename = "exit")]
    pub exit_blocked: bool,
}

impl SensorReading {
    #[inline]
    pub fn is_blocked(&self, side: BeamSide) -> bool {
        match side {
            BeamSide::Entry => self.entry_blocked,
            BeamSide::Exit => self.exit_blocked,
        }
    }
}
