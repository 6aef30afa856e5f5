//! Gate controller line protocol
//!
//! Protocol:
//! - UTF-8 text, one frame per line, `\n` terminated
//! - Commands: `CMD:OPEN`, `CMD:CLOSE`, `CMD:SENSORS`
//! - Events: `EVENT:GATE_OPENED`, `EVENT:GATE_CLOSED`,
//!   `EVENT:BEAM:<ENTRY|EXIT>:<LOW|HIGH>`
//! - Sensor reply: `INFO:SENSORS:ENTRY:<LOW|HIGH>:EXIT:<LOW|HIGH>`
//!
//! Beam levels are active-low: LOW means the beam is blocked (vehicle present).

use crate::domain::types::{BeamSide, SensorReading};

pub const FRAME_TERMINATOR: char = '\n';

const EVENT_GATE_OPENED: &str = "EVENT:GATE_OPENED";
const EVENT_GATE_CLOSED: &str = "EVENT:GATE_CLOSED";
const EVENT_BEAM_PREFIX: &str = "EVENT:BEAM:";
const INFO_SENSORS_PREFIX: &str = "INFO:SENSORS:";

const LEVEL_BLOCKED: &str = "LOW";
const LEVEL_CLEAR: &str = "HIGH";

/// Field count of `INFO:SENSORS:ENTRY:<lvl>:EXIT:<lvl>`
const SNAPSHOT_FIELDS: usize = 6;

/// Commands sent to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Open,
    Close,
    Sensors,
}

impl Command {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Open => "CMD:OPEN",
            Command::Close => "CMD:CLOSE",
            Command::Sensors => "CMD:SENSORS",
        }
    }

    /// Encoded frame including terminator
    pub fn frame(&self) -> String {
        let mut frame = String::with_capacity(self.as_str().len() + 1);
        frame.push_str(self.as_str());
        frame.push(FRAME_TERMINATOR);
        frame
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified frame from the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    GateOpened,
    GateClosed,
    BeamChanged { side: BeamSide, blocked: bool },
    SensorSnapshot(SensorReading),
    Unrecognized,
}

impl LinkEvent {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::GateOpened => "gate_opened",
            LinkEvent::GateClosed => "gate_closed",
            LinkEvent::BeamChanged { .. } => "beam_changed",
            LinkEvent::SensorSnapshot(_) => "sensor_snapshot",
            LinkEvent::Unrecognized => "unrecognized",
        }
    }
}

fn parse_level(level: &str) -> Option<bool> {
    match level {
        LEVEL_BLOCKED => Some(true),
        LEVEL_CLEAR => Some(false),
        _ => None,
    }
}

fn parse_side(side: &str) -> Option<BeamSide> {
    match side {
        "ENTRY" => Some(BeamSide::Entry),
        "EXIT" => Some(BeamSide::Exit),
        _ => None,
    }
}

fn parse_beam(rest: &str) -> Option<LinkEvent> {
    let (side, level) = rest.split_once(':')?;
    Some(LinkEvent::BeamChanged { side: parse_side(side)?, blocked: parse_level(level)? })
}

fn parse_snapshot(line: &str) -> Option<SensorReading> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() != SNAPSHOT_FIELDS || parts[2] != "ENTRY" || parts[4] != "EXIT" {
        return None;
    }
    Some(SensorReading { entry_blocked: parse_level(parts[3])?, exit_blocked: parse_level(parts[5])? })
}

/// Classify one trimmed line. Pure; malformed frames become `Unrecognized`.
pub fn classify(line: &str) -> LinkEvent {
    let line = line.trim();

    if line == EVENT_GATE_OPENED {
        return LinkEvent::GateOpened;
    }
    if line == EVENT_GATE_CLOSED {
        return LinkEvent::GateClosed;
    }
    if let Some(rest) = line.strip_prefix(EVENT_BEAM_PREFIX) {
        return parse_beam(rest).unwrap_or(LinkEvent::Unrecognized);
    }
    if line.starts_with(INFO_SENSORS_PREFIX) {
        return parse_snapshot(line).map(LinkEvent::SensorSnapshot).unwrap_or(LinkEvent::Unrecognized);
    }

    LinkEvent::Unrecognized
}
