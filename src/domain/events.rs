//! Events pushed to connected observers
//!
//! Each event has a wire type name and a flat JSON payload. Observers
//! receive `{"type": <name>, ...payload}`.

use crate::domain::types::{BeamSide, SessionId, SlotId};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParkingEvent {
    GateOpened,
    GateClosed,
    Beam { side: BeamSide, blocked: bool },
    SlotReserved { slot: SlotId, session: SessionId },
    SlotOccupied { slot: SlotId },
    SlotFreed { slot: SlotId },
}

impl ParkingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ParkingEvent::GateOpened => "gate_opened",
            ParkingEvent::GateClosed => "gate_closed",
            ParkingEvent::Beam { side: BeamSide::Entry, .. } => "beam_entry",
            ParkingEvent::Beam { side: BeamSide::Exit, .. } => "beam_exit",
            ParkingEvent::SlotReserved { .. } => "slot_reserved",
            ParkingEvent::SlotOccupied { .. } => "slot_occupied",
            ParkingEvent::SlotFreed { .. } => "slot_freed",
        }
    }

    pub fn payload(&self) -> Map<String, Value> {
        let value = match self {
            ParkingEvent::GateOpened | ParkingEvent::GateClosed => json!({}),
            ParkingEvent::Beam { blocked, .. } => {
                json!({ "state": if *blocked { "blocked" } else { "clear" } })
            }
            ParkingEvent::SlotReserved { slot, session } => {
                json!({ "slot": slot.0, "session": session.as_str() })
            }
            ParkingEvent::SlotOccupied { slot } | ParkingEvent::SlotFreed { slot } => {
                json!({ "slot": slot.0 })
            }
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beam_event_names_and_state() {
        let blocked = ParkingEvent::Beam { side: BeamSide::Entry, blocked: true };
        assert_eq!(blocked.event_type(), "beam_entry");
        assert_eq!(blocked.payload()["state"], "blocked");

        let clear = ParkingEvent::Beam { side: BeamSide::Exit, blocked: false };
        assert_eq!(clear.event_type(), "beam_exit");
        assert_eq!(clear.payload()["state"], "clear");
    }

    #[test]
    fn test_slot_reserved_payload() {
        let event =
            ParkingEvent::SlotReserved { slot: SlotId(2), session: SessionId::from("abc") };
        let payload = event.payload();
        assert_eq!(payload["slot"], 2);
        assert_eq!(payload["session"], "abc");
    }

    #[test]
    fn test_gate_events_have_empty_payload() {
        assert!(ParkingEvent::GateOpened.payload().is_empty());
        assert_eq!(ParkingEvent::GateClosed.event_type(), "gate_closed");
    }
}
