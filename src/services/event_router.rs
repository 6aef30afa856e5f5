//! Event router - dispatches link frames off the reader task
//!
//! The serial reader only enqueues raw lines. This task classifies them,
//! updates the sensor board, completes pending snapshot queries and fans the
//! result out to observers. Fan-out is non-blocking, so a slow observer
//! never holds up sensor updates.

use crate::domain::events::ParkingEvent;
use crate::domain::types::BeamSide;
use crate::infra::metrics::Metrics;
use crate::io::fanout::Broadcaster;
use crate::io::protocol::{classify, LinkEvent};
use crate::services::sensors::{SensorBoard, SensorOracle};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct EventRouter {
    board: Arc<SensorBoard>,
    oracle: Arc<SensorOracle>,
    fanout: Arc<Broadcaster>,
    metrics: Arc<Metrics>,
}

impl EventRouter {
    pub fn new(
        board: Arc<SensorBoard>,
        oracle: Arc<SensorOracle>,
        fanout: Arc<Broadcaster>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { board, oracle, fanout, metrics }
    }

    /// Process one line from the controller
    pub fn handle_line(&self, line: &str) -> LinkEvent {
        let event = classify(line);

        match event {
            LinkEvent::GateOpened => {
                info!("gate_opened");
                self.fanout.publish(&ParkingEvent::GateOpened);
            }
            LinkEvent::GateClosed => {
                info!("gate_closed");
                self.fanout.publish(&ParkingEvent::GateClosed);
            }
            LinkEvent::BeamChanged { side, blocked } => {
                info!(side = %side.as_str(), blocked = blocked, "beam_changed");
                self.board.set(side, blocked);
                self.fanout.publish(&ParkingEvent::Beam { side, blocked });
            }
            LinkEvent::SensorSnapshot(reading) => {
                self.board.apply(reading);
                let answered = self.oracle.deliver(reading);
                debug!(
                    entry = reading.entry_blocked,
                    exit = reading.exit_blocked,
                    answered = answered,
                    "sensor_snapshot_received"
                );
                self.fanout.publish(&ParkingEvent::Beam { side: BeamSide::Entry, blocked: reading.entry_blocked });
                self.fanout.publish(&ParkingEvent::Beam { side: BeamSide::Exit, blocked: reading.exit_blocked });
            }
            LinkEvent::Unrecognized => {
                self.metrics.record_unrecognized();
                debug!(line = %line, "frame_unrecognized");
            }
        }

        event
    }

    /// Run until the reader side closes the channel
    pub async fn run(self, mut frame_rx: mpsc::Receiver<String>) {
        info!("event_router_started");
        while let Some(line) = frame_rx.recv().await {
            self.handle_line(&line);
        }
        info!("event_router_stopped");
    }
}
