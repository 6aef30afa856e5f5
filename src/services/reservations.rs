//! Reservation state machine
//!
//! Slots cycle `free -> reserved -> occupied -> free`. Entry reserves before
//! opening the gate and rolls back if the gate command fails; exit opens the
//! gate first and only then frees the slot, so it never needs compensation.
//!
//! Every slot/session mutation for one claim happens under a single store
//! lock. The lock is never held across the sensor query or the gate command.

use crate::domain::events::ParkingEvent;
use crate::domain::types::{BeamSide, PendingToken, Session, SessionId, Slot, SlotId, SlotStatus, TokenKind};
use crate::infra::config::MAX_SLOTS;
use crate::infra::metrics::Metrics;
use crate::io::fanout::Broadcaster;
use crate::io::protocol::Command;
use crate::io::serial_link::GateCommander;
use crate::services::error::{ClaimError, Rejection};
use crate::services::sensors::SensorProbe;
use crate::services::store::{ensure_slots, ParkingStore, StoreError};
use crate::services::tokens::ClaimTokenStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryGrant {
    pub slot: SlotId,
    pub session: SessionId,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitGrant {
    pub slot: SlotId,
    pub session: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub total: usize,
    pub free: usize,
}

pub struct Reservations {
    store: Mutex<Box<dyn ParkingStore>>,
    tokens: Arc<dyn ClaimTokenStore>,
    gate: Arc<dyn GateCommander>,
    sensors: Arc<dyn SensorProbe>,
    fanout: Arc<Broadcaster>,
    metrics: Arc<Metrics>,
    session_ttl_secs: u64,
}

impl Reservations {
    pub fn new(
        store: Box<dyn ParkingStore>,
        tokens: Arc<dyn ClaimTokenStore>,
        gate: Arc<dyn GateCommander>,
        sensors: Arc<dyn SensorProbe>,
        fanout: Arc<Broadcaster>,
        metrics: Arc<Metrics>,
        session_ttl_secs: u64,
    ) -> Self {
        Self { store: Mutex::new(store), tokens, gate, sensors, fanout, metrics, session_ttl_secs }
    }

    /// Make sure slots `1..=total` exist, leaving existing ones untouched
    pub fn init_pool(&self, total: u32) -> Result<u32, StoreError> {
        let mut store = self.store.lock();
        ensure_slots(&mut **store, total)
    }

    // ==================================================================
    // Entry
    // ==================================================================

    /// Entry claim: token check, live entry beam, reserve lowest free slot,
    /// open the gate, roll back if the gate stays shut
    pub async fn claim_entry(&self, token: &str) -> Result<EntryGrant, ClaimError> {
        let result = self.try_claim_entry(token).await;
        self.metrics.record_claim(result.is_ok());
        match &result {
            Ok(grant) => {
                info!(slot = %grant.slot, session = %grant.session, "claim_entry_granted");
            }
            Err(ClaimError::Rejected(reason)) => {
                info!(reason = %reason, "claim_entry_rejected");
            }
            Err(e) => {
                error!(error = %e, "claim_entry_failed");
            }
        }
        result
    }

    async fn try_claim_entry(&self, token: &str) -> Result<EntryGrant, ClaimError> {
        self.validate_token(token, TokenKind::Entry)?;

        let reading = self.sensors.query_snapshot().await?;
        if !reading.is_blocked(BeamSide::Entry) {
            return Err(Rejection::DriveToEntryGate.into());
        }

        let (session, pending) = self.reserve(token)?;
        let slot = session.slot_id;

        if !self.gate.send_command(Command::Open).await {
            warn!(slot = %slot, session = %session.id, "entry_gate_offline_rolling_back");
            self.rollback(&session, pending)?;
            return Err(Rejection::GateOffline.into());
        }

        self.fanout.publish(&ParkingEvent::SlotReserved { slot, session: session.id.clone() });
        Ok(EntryGrant { slot, session: session.id, ttl_seconds: self.session_ttl_secs })
    }

    /// Pick the lowest free slot, take the token and write session + slot
    /// as one step
    fn reserve(&self, token: &str) -> Result<(Session, PendingToken), ClaimError> {
        let mut store = self.store.lock();

        let slot_id = store
            .slots()?
            .into_iter()
            .find(Slot::is_free)
            .map(|slot| slot.id)
            .ok_or(Rejection::Full)?;

        // A concurrent claim may have taken the token since validation
        let pending = self.tokens.consume(token).ok_or(Rejection::InvalidToken)?;
        if pending.is_expired(Utc::now()) {
            return Err(Rejection::TokenExpired.into());
        }

        let session = Session::start(token, slot_id);
        let written = store
            .put_session(session.clone())
            .and_then(|_| store.put_slot(Slot::reserved(slot_id, session.id.clone())));
        if let Err(e) = written {
            warn!(slot = %slot_id, session = %session.id, error = %e, "entry_write_failed_rolling_back");
            self.undo_reservation(&mut **store, &session, pending)?;
            return Err(e.into());
        }

        Ok((session, pending))
    }

    /// Undo a reservation whose gate never opened
    fn rollback(&self, session: &Session, pending: PendingToken) -> Result<(), ClaimError> {
        let mut store = self.store.lock();
        self.undo_reservation(&mut **store, session, pending)
    }

    /// Free the slot and drop the session, then hand the token back. Both
    /// writes are attempted even if the first one fails.
    fn undo_reservation(
        &self,
        store: &mut dyn ParkingStore,
        session: &Session,
        pending: PendingToken,
    ) -> Result<(), ClaimError> {
        self.metrics.record_rollback();
        let slot = session.slot_id;

        let freed = store.put_slot(Slot::free(slot));
        let deleted = store.delete_session(&session.id);
        match freed.and(deleted) {
            Ok(()) => {
                self.tokens.reinstate(pending);
                info!(slot = %slot, session = %session.id, "entry_rolled_back");
                Ok(())
            }
            Err(source) => {
                error!(
                    slot = %slot,
                    session = %session.id,
                    error = %source,
                    "entry_rollback_failed"
                );
                Err(ClaimError::RollbackFailed { slot, source })
            }
        }
    }

    // ==================================================================
    // Occupancy
    // ==================================================================

    /// Mark the session's slot occupied once the vehicle has parked
    pub fn confirm_parked(&self, session_id: &SessionId) -> Result<SlotId, ClaimError> {
        let slot_id = {
            let mut store = self.store.lock();
            let session = store.session(session_id)?.ok_or(Rejection::SessionNotFound)?;
            if !session.is_active {
                return Err(Rejection::InvalidSession.into());
            }
            let slot = store.slot(session.slot_id)?.ok_or(Rejection::SlotNotFound)?;
            if !slot.is_held_by(session_id) {
                return Err(Rejection::InvalidSession.into());
            }
            if slot.status == SlotStatus::Occupied {
                return Ok(slot.id);
            }
            store.put_slot(Slot::occupied(slot.id, session_id.clone()))?;
            slot.id
        };

        info!(slot = %slot_id, session = %session_id, "slot_occupied");
        self.fanout.publish(&ParkingEvent::SlotOccupied { slot: slot_id });
        Ok(slot_id)
    }

    // ==================================================================
    // Exit
    // ==================================================================

    /// Exit claim: active session, optional exit token, live exit beam,
    /// open the gate, then free the slot
    pub async fn claim_exit(
        &self,
        session_id: &SessionId,
        token: Option<&str>,
    ) -> Result<ExitGrant, ClaimError> {
        let result = self.try_claim_exit(session_id, token).await;
        self.metrics.record_claim(result.is_ok());
        match &result {
            Ok(grant) => info!(slot = %grant.slot, session = %grant.session, "claim_exit_granted"),
            Err(ClaimError::Rejected(reason)) => {
                info!(session = %session_id, reason = %reason, "claim_exit_rejected")
            }
            Err(e) => error!(session = %session_id, error = %e, "claim_exit_failed"),
        }
        result
    }

    async fn try_claim_exit(
        &self,
        session_id: &SessionId,
        token: Option<&str>,
    ) -> Result<ExitGrant, ClaimError> {
        self.active_session(session_id)?;

        if let Some(token) = token {
            self.validate_token(token, TokenKind::Exit)?;
            self.tokens.consume(token).ok_or(Rejection::InvalidToken)?;
        }

        let reading = self.sensors.query_snapshot().await?;
        if !reading.is_blocked(BeamSide::Exit) {
            return Err(Rejection::DriveToExitGate.into());
        }

        if !self.gate.send_command(Command::Open).await {
            return Err(Rejection::GateOffline.into());
        }

        let slot = {
            let mut store = self.store.lock();
            // Re-read: a concurrent exit may have finished this session meanwhile
            let mut session = store.session(session_id)?.ok_or(Rejection::SessionNotFound)?;
            if !session.is_active {
                return Err(Rejection::InvalidSession.into());
            }
            let slot = session.slot_id;
            let held = store.slot(slot)?.is_some_and(|s| s.is_held_by(session_id));
            session.finish(Utc::now());
            store.put_session(session)?;
            if held {
                store.put_slot(Slot::free(slot))?;
            }
            slot
        };

        self.fanout.publish(&ParkingEvent::SlotFreed { slot });
        Ok(ExitGrant { slot, session: session_id.clone() })
    }

    fn active_session(&self, session_id: &SessionId) -> Result<Session, ClaimError> {
        let session = self.store.lock().session(session_id)?.ok_or(Rejection::SessionNotFound)?;
        if !session.is_active {
            return Err(Rejection::InvalidSession.into());
        }
        Ok(session)
    }

    /// Token must be pending, unexpired and of the right kind. An expired
    /// token is removed on sight.
    fn validate_token(&self, token: &str, kind: TokenKind) -> Result<PendingToken, Rejection> {
        let pending = self.tokens.lookup(token).ok_or(Rejection::InvalidToken)?;
        if pending.is_expired(Utc::now()) {
            self.tokens.consume(token);
            return Err(Rejection::TokenExpired);
        }
        if pending.kind != kind {
            return Err(Rejection::WrongTokenKind);
        }
        Ok(pending)
    }

    // ==================================================================
    // Admin and queries
    // ==================================================================

    /// Grow or shrink the pool to exactly `total` slots (1..=MAX_SLOTS).
    /// Shrinking removes the highest ids and refuses if any of them is in use.
    pub fn set_slot_count(&self, total: u32) -> Result<u32, ClaimError> {
        if total == 0 || total > MAX_SLOTS {
            return Err(Rejection::InvalidSlotCount.into());
        }

        let mut store = self.store.lock();
        let surplus: Vec<Slot> = store.slots()?.into_iter().filter(|s| s.id.0 > total).collect();
        if let Some(busy) = surplus.iter().find(|s| !s.is_free()) {
            warn!(slot = %busy.id, requested = total, "slot_count_refused");
            return Err(Rejection::SlotInUse.into());
        }

        for slot in &surplus {
            store.remove_slot(slot.id)?;
        }
        let created = ensure_slots(&mut **store, total)?;
        info!(total = total, created = created, removed = surplus.len(), "slot_count_set");
        Ok(total)
    }

    pub fn slots(&self) -> Result<Vec<Slot>, StoreError> {
        self.store.lock().slots()
    }

    pub fn summary(&self) -> Result<PoolSummary, StoreError> {
        let slots = self.slots()?;
        let free = slots.iter().filter(|s| s.is_free()).count();
        Ok(PoolSummary { total: slots.len(), free })
    }

    pub fn session(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.store.lock().session(session_id)
    }

    pub fn sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.store.lock().sessions()
    }
}
