//! Domain models - core parking types and observer events
//!
//! This module contains the canonical data types used throughout the system:
//! - `Slot` / `SlotStatus` - a physical parking space and its occupancy
//! - `Session` - one vehicle's stay in a slot
//! - `PendingToken` / `TokenKind` - QR claim credentials
//! - `SensorReading` - both beam sensors at one instant
//! - `ParkingEvent` - transitions pushed to observers

pub mod events;
pub mod types;

pub use events::ParkingEvent;
pub use types::{
    BeamSide, PendingToken, SensorReading, Session, SessionId, Slot, SlotId, SlotStatus,
    TokenKind,
};
