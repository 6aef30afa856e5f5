//! Fan-out of events to connected observers
//!
//! Observers are sinks that accept a serialized JSON message without
//! blocking. A sink that reports it is closed is pruned on the spot; a sink
//! that is merely full misses that one message. Broadcast never waits on
//! any observer.

use crate::domain::events::ParkingEvent;
use crate::infra::metrics::Metrics;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Registry key for one observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Observer is gone; remove it
    Closed,
    /// Observer is alive but not keeping up; message dropped
    Full,
}

/// The one primitive the fan-out needs from an observer connection
pub trait ObserverSink: Send + Sync {
    fn try_deliver(&self, message: &str) -> Result<(), DeliveryError>;
}

impl ObserverSink for mpsc::Sender<String> {
    fn try_deliver(&self, message: &str) -> Result<(), DeliveryError> {
        self.try_send(message.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Build the wire message `{"type": <event_type>, ...payload}`
pub fn encode_message(event_type: &str, payload: Map<String, Value>) -> String {
    let mut message = payload;
    message.insert("type".to_string(), Value::String(event_type.to_string()));
    Value::Object(message).to_string()
}

pub struct Broadcaster {
    observers: parking_lot::Mutex<FxHashMap<ObserverId, Box<dyn ObserverSink>>>,
    next_id: AtomicU64,
    buffer: usize,
    metrics: Arc<Metrics>,
}

impl Broadcaster {
    pub fn new(buffer: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            observers: parking_lot::Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            metrics,
        }
    }

    pub fn register(&self, sink: Box<dyn ObserverSink>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut observers = self.observers.lock();
            observers.insert(id, sink);
            observers.len()
        };
        info!(observer = %id, observers = count, "observer_registered");
        id
    }

    /// Register a channel-backed observer and hand back its receiving end
    pub fn subscribe(&self) -> (ObserverId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        (self.register(Box::new(tx)), rx)
    }

    pub fn deregister(&self, id: ObserverId) -> bool {
        let removed = self.observers.lock().remove(&id).is_some();
        if removed {
            info!(observer = %id, "observer_deregistered");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver to every observer; returns how many accepted the message
    pub fn broadcast(&self, event_type: &str, payload: Map<String, Value>) -> usize {
        let message = encode_message(event_type, payload);
        let mut delivered = 0;
        let mut observers = self.observers.lock();

        observers.retain(|id, sink| match sink.try_deliver(&message) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(DeliveryError::Full) => {
                warn!(observer = %id, event = %event_type, "observer_message_dropped");
                self.metrics.record_message_dropped();
                true
            }
            Err(DeliveryError::Closed) => {
                info!(observer = %id, "observer_pruned");
                self.metrics.record_observer_pruned();
                false
            }
        });

        debug!(event = %event_type, delivered = delivered, observers = observers.len(), "broadcast");
        delivered
    }

    pub fn publish(&self, event: &ParkingEvent) -> usize {
        self.broadcast(event.event_type(), event.payload())
    }
}
