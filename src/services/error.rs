//! Claim outcomes
//!
//! A `Rejection` is a normal answer to a client ("FULL", "drive to entry
//! gate", ...). `ClaimError` wraps it together with the internal failures
//! that must surface loudly.

use crate::domain::types::SlotId;
use crate::services::sensors::SnapshotError;
use crate::services::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidToken,
    TokenExpired,
    WrongTokenKind,
    SensorCheckFailed,
    DriveToEntryGate,
    DriveToExitGate,
    Full,
    GateOffline,
    SessionNotFound,
    InvalidSession,
    SlotNotFound,
    InvalidSlotCount,
    SlotInUse,
}

impl Rejection {
    /// Reason string returned to clients
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::InvalidToken => "invalid token",
            Rejection::TokenExpired => "token expired",
            Rejection::WrongTokenKind => "invalid token type",
            Rejection::SensorCheckFailed => "sensor check failed",
            Rejection::DriveToEntryGate => "drive to entry gate",
            Rejection::DriveToExitGate => "drive to exit gate",
            Rejection::Full => "FULL",
            Rejection::GateOffline => "GATE_OFFLINE",
            Rejection::SessionNotFound => "session not found",
            Rejection::InvalidSession => "invalid session",
            Rejection::SlotNotFound => "slot not found",
            Rejection::InvalidSlotCount => "invalid slot count",
            Rejection::SlotInUse => "slot in use",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SnapshotError> for Rejection {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::LinkDown => Rejection::GateOffline,
            SnapshotError::Timeout => Rejection::SensorCheckFailed,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("rejected: {0}")]
    Rejected(Rejection),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The gate did not open and the reservation could not be undone
    #[error("rollback of slot {slot} failed: {source}")]
    RollbackFailed { slot: SlotId, source: StoreError },
}

impl ClaimError {
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            ClaimError::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}

impl From<Rejection> for ClaimError {
    fn from(r: Rejection) -> Self {
        ClaimError::Rejected(r)
    }
}

impl From<SnapshotError> for ClaimError {
    fn from(err: SnapshotError) -> Self {
        ClaimError::Rejected(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(Rejection::Full.as_str(), "FULL");
        assert_eq!(Rejection::GateOffline.to_string(), "GATE_OFFLINE");
        assert_eq!(Rejection::WrongTokenKind.as_str(), "invalid token type");
    }

    #[test]
    fn test_snapshot_errors_are_distinct_from_not_present() {
        assert_eq!(Rejection::from(SnapshotError::Timeout), Rejection::SensorCheckFailed);
        assert_eq!(Rejection::from(SnapshotError::LinkDown), Rejection::GateOffline);
        assert_ne!(Rejection::SensorCheckFailed, Rejection::DriveToEntryGate);
    }

    #[test]
    fn test_rejection_accessor() {
        let err: ClaimError = Rejection::SlotInUse.into();
        assert_eq!(err.rejection(), Some(Rejection::SlotInUse));

        let err = ClaimError::Store(StoreError::Backend("disk".into()));
        assert_eq!(err.rejection(), None);
    }
}
