//! End-to-end claim flows against a simulated gate controller
//!
//! Wires the real serial link, event router, snapshot oracle, reservations
//! and fan-out together over in-memory duplex streams.

use async_trait::async_trait;
use parkgate::infra::Metrics;
use parkgate::io::{Broadcaster, GateCommander, LinkConnector, LinkSettings, SerialLink};
use parkgate::services::{
    ClaimTokenStore, EventRouter, MemoryStore, MemoryTokenStore, ParkingApi, Reservations,
    SensorBoard, SensorOracle,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{mpsc, watch};

// ============================================================================
// Simulated controller
// ============================================================================

#[derive(Clone, Default)]
struct SimConnector {
    streams: Arc<parking_lot::Mutex<VecDeque<DuplexStream>>>,
}

#[async_trait]
impl LinkConnector for SimConnector {
    type Stream = DuplexStream;

    async fn open(&self) -> std::io::Result<DuplexStream> {
        self.streams.lock().pop_front().ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "unplugged"))
    }

    fn describe(&self) -> &str {
        "sim"
    }
}

/// Beam levels and behavior switches for the fake controller
#[derive(Clone, Default)]
struct Controller {
    entry_blocked: Arc<AtomicBool>,
    exit_blocked: Arc<AtomicBool>,
    /// Ignore CMD:SENSORS
    mute: Arc<AtomicBool>,
    /// Hang up right after the next sensor reply
    unplug_after_sensors: Arc<AtomicBool>,
    received: Arc<parking_lot::Mutex<Vec<String>>>,
}

fn level(blocked: bool) -> &'static str {
    if blocked {
        "LOW"
    } else {
        "HIGH"
    }
}

impl Controller {
    /// Queue a connection on the connector and serve it
    fn plug_in(&self, connector: &SimConnector) {
        let (ours, theirs) = tokio::io::duplex(1024);
        connector.streams.lock().push_back(ours);
        tokio::spawn(self.clone().serve(theirs));
    }

    async fn serve(self, stream: DuplexStream) {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            self.received.lock().push(line.clone());
            let reply = match line.as_str() {
                "CMD:SENSORS" if self.mute.load(Ordering::SeqCst) => continue,
                "CMD:SENSORS" => format!(
                    "INFO:SENSORS:ENTRY:{}:EXIT:{}\n",
                    level(self.entry_blocked.load(Ordering::SeqCst)),
                    level(self.exit_blocked.load(Ordering::SeqCst))
                ),
                "CMD:OPEN" => "EVENT:GATE_OPENED\n".to_string(),
                "CMD:CLOSE" => "EVENT:GATE_CLOSED\n".to_string(),
                _ => continue,
            };
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
            if line == "CMD:SENSORS" && self.unplug_after_sensors.swap(false, Ordering::SeqCst) {
                return;
            }
        }
    }

    fn beam(&self, side: &str, blocked: bool) {
        match side {
            "entry" => self.entry_blocked.store(blocked, Ordering::SeqCst),
            _ => self.exit_blocked.store(blocked, Ordering::SeqCst),
        }
    }

    fn opens(&self) -> usize {
        self.received.lock().iter().filter(|l| l.as_str() == "CMD:OPEN").count()
    }
}

// ============================================================================
// Stack
// ============================================================================

struct Stack {
    api: Arc<ParkingApi>,
    link: Arc<SerialLink<SimConnector>>,
    connector: SimConnector,
    controller: Controller,
    observer: mpsc::Receiver<String>,
    _shutdown: watch::Sender<bool>,
}

impl Stack {
    async fn start(total_slots: u32, plugged: bool) -> Self {
        Self::start_with(total_slots, plugged, Duration::from_secs(3600)).await
    }

    async fn start_with(total_slots: u32, plugged: bool, boot_delay: Duration) -> Self {
        let metrics = Arc::new(Metrics::new());
        let connector = SimConnector::default();
        let controller = Controller::default();
        if plugged {
            controller.plug_in(&connector);
        }

        let settings = LinkSettings {
            read_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(10),
            boot_delay,
        };
        let link = Arc::new(SerialLink::new(connector.clone(), settings, metrics.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (frame_tx, frame_rx) = mpsc::channel(64);
        tokio::spawn(link.clone().run(frame_tx, shutdown_rx));
        let gate: Arc<dyn GateCommander> = link.clone();

        let board = Arc::new(SensorBoard::new());
        let oracle = Arc::new(SensorOracle::new(gate.clone(), Duration::from_millis(150), metrics.clone()));
        let fanout = Arc::new(Broadcaster::new(64, metrics.clone()));
        tokio::spawn(EventRouter::new(board.clone(), oracle.clone(), fanout.clone(), metrics.clone()).run(frame_rx));

        let tokens: Arc<dyn ClaimTokenStore> = Arc::new(MemoryTokenStore::new(90));
        let reservations = Arc::new(Reservations::new(
            Box::new(MemoryStore::new()),
            tokens.clone(),
            gate.clone(),
            oracle,
            fanout.clone(),
            metrics,
            43200,
        ));
        reservations.init_pool(total_slots).unwrap();
        let (_id, observer) = fanout.subscribe();

        let api = Arc::new(ParkingApi::new(reservations, tokens, gate, board, "http://localhost:8000"));
        let stack = Self { api, link, connector, controller, observer, _shutdown: shutdown_tx };
        if plugged {
            stack.wait_link(true).await;
        }
        stack
    }

    async fn wait_link(&self, up: bool) {
        for _ in 0..400 {
            if self.link.is_connected() == up {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("link never reached connected={up}");
    }

    /// Observer message types received so far
    async fn observed(&mut self) -> Vec<String> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::iter::from_fn(|| self.observer.try_recv().ok())
            .map(|m| serde_json::from_str::<Value>(&m).unwrap()["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn free_slots(&self) -> usize {
        self.api.slots_summary().unwrap().free
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_slot_entry_then_full() {
    let mut stack = Stack::start(1, true).await;
    stack.controller.beam("entry", true);

    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert!(reply.ok);
    assert_eq!(reply.slot, Some(1));
    assert_eq!(reply.ttl_seconds, Some(43200));

    let full = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert!(!full.ok);
    assert_eq!(full.reason, Some("FULL"));
    assert_eq!(stack.api.sessions().unwrap().len(), 1);

    let seen = stack.observed().await;
    assert_eq!(stack.controller.opens(), 1);
    assert!(seen.contains(&"slot_reserved".to_string()));
    assert!(seen.contains(&"gate_opened".to_string()));
}

#[tokio::test]
async fn test_entry_rolls_back_when_gate_write_fails() {
    let stack = Stack::start(1, true).await;
    stack.controller.beam("entry", true);
    stack.controller.unplug_after_sensors.store(true, Ordering::SeqCst);

    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert_eq!(reply.reason, Some("GATE_OFFLINE"));
    assert_eq!(stack.free_slots(), 1);
    assert!(stack.api.sessions().unwrap().is_empty());
}

#[tokio::test]
async fn test_unplugged_controller_reports_gate_offline() {
    let stack = Stack::start(2, false).await;
    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert_eq!(reply.reason, Some("GATE_OFFLINE"));
    assert!(!stack.api.sensor_debug_state().link_connected);

    // Plugging the controller back in heals the link
    stack.controller.plug_in(&stack.connector);
    stack.wait_link(true).await;
    stack.controller.beam("entry", true);
    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert!(reply.ok);
}

#[tokio::test]
async fn test_entry_without_vehicle() {
    let stack = Stack::start(2, true).await;
    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert_eq!(reply.reason, Some("drive to entry gate"));
    assert_eq!(stack.controller.opens(), 0);
}

#[tokio::test]
async fn test_sensor_timeout_on_entry_and_exit() {
    let stack = Stack::start(2, true).await;
    stack.controller.beam("entry", true);
    let entry = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    let session = entry.session.unwrap();

    stack.controller.mute.store(true, Ordering::SeqCst);
    let reply = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    assert_eq!(reply.reason, Some("sensor check failed"));

    let reply = stack.api.claim_exit(&session, None).await.unwrap();
    assert_eq!(reply.reason, Some("sensor check failed"));
    assert!(stack.api.session(&session).unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_full_visit_through_exit() {
    let mut stack = Stack::start(2, true).await;
    stack.controller.beam("entry", true);
    let entry = stack.api.claim_entry(&stack.api.issue_entry_qr().token).await.unwrap();
    let session = entry.session.unwrap();
    assert!(stack.api.confirm_parked(&session).unwrap().ok);

    // Exit beam still clear
    let reply = stack.api.claim_exit(&session, None).await.unwrap();
    assert_eq!(reply.reason, Some("drive to exit gate"));
    assert!(stack.api.session(&session).unwrap().unwrap().is_active);

    stack.controller.beam("exit", true);
    let reply = stack.api.claim_exit(&session, Some(&stack.api.issue_exit_qr().token)).await.unwrap();
    assert!(reply.ok);
    assert_eq!(reply.slot, entry.slot);
    assert_eq!(stack.free_slots(), 2);

    let finished = stack.api.session(&session).unwrap().unwrap();
    assert!(!finished.is_active);
    assert!(finished.end_time.is_some());

    let seen = stack.observed().await;
    for expected in ["slot_reserved", "slot_occupied", "slot_freed"] {
        assert!(seen.contains(&expected.to_string()), "missing {expected} in {seen:?}");
    }
}

#[tokio::test]
async fn test_boot_query_seeds_sensor_board() {
    let stack = Stack::start_with(1, false, Duration::from_millis(10)).await;
    stack.controller.beam("entry", true);
    stack.controller.plug_in(&stack.connector);
    stack.wait_link(true).await;

    for _ in 0..100 {
        if stack.api.sensor_debug_state().entry {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let state = stack.api.sensor_debug_state();
    assert!(state.entry);
    assert!(!state.exit);
    assert!(state.link_connected);
}

#[tokio::test]
async fn test_admin_gate_commands_reach_controller() {
    let mut stack = Stack::start(1, true).await;
    assert!(stack.api.admin_gate("close".parse().unwrap()).await.ok);
    assert!(stack.api.admin_gate("open".parse().unwrap()).await.ok);

    let seen = stack.observed().await;
    assert_eq!(seen, vec!["gate_closed", "gate_opened"]);
}
