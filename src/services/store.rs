//! Storage collaborator for slots and sessions
//!
//! `ParkingStore` is plain CRUD keyed by id. Callers hold the store behind a
//! single lock for the duration of a claim, so implementations only need
//! read-your-writes within one call sequence. `MemoryStore` is the
//! process-lifetime implementation used by the daemon and tests.

use crate::domain::types::{Session, SessionId, Slot, SlotId};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("slot {0} not found")]
    SlotNotFound(SlotId),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub trait ParkingStore: Send {
    /// All slots, ascending by id
    fn slots(&self) -> Result<Vec<Slot>, StoreError>;
    fn slot(&self, id: SlotId) -> Result<Option<Slot>, StoreError>;
    /// Insert or replace
    fn put_slot(&mut self, slot: Slot) -> Result<(), StoreError>;
    fn remove_slot(&mut self, id: SlotId) -> Result<(), StoreError>;

    fn session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;
    /// Insert or replace
    fn put_session(&mut self, session: Session) -> Result<(), StoreError>;
    fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError>;
    /// All sessions, oldest first
    fn sessions(&self) -> Result<Vec<Session>, StoreError>;
}

/// Make sure slots `1..=total` exist; missing ids are created free and
/// existing slots are left as they are. Returns how many were created.
pub fn ensure_slots(store: &mut dyn ParkingStore, total: u32) -> Result<u32, StoreError> {
    let mut created = 0;
    for n in 1..=total {
        let id = SlotId(n);
        if store.slot(id)?.is_none() {
            store.put_slot(Slot::free(id))?;
            created += 1;
        }
    }
    if created > 0 {
        info!(total = total, created = created, "slot_pool_repaired");
    }
    Ok(created)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: BTreeMap<SlotId, Slot>,
    sessions: FxHashMap<SessionId, Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-provisioned with `total` free slots
    #[cfg(test)]
    pub fn with_slots(total: u32) -> Self {
        let slots = (1..=total).map(|n| (SlotId(n), Slot::free(SlotId(n)))).collect();
        Self { slots, sessions: FxHashMap::default() }
    }
}

impl ParkingStore for MemoryStore {
    fn slots(&self) -> Result<Vec<Slot>, StoreError> {
        Ok(self.slots.values().cloned().collect())
    }

    fn slot(&self, id: SlotId) -> Result<Option<Slot>, StoreError> {
        Ok(self.slots.get(&id).cloned())
    }

    fn put_slot(&mut self, slot: Slot) -> Result<(), StoreError> {
        self.slots.insert(slot.id, slot);
        Ok(())
    }

    fn remove_slot(&mut self, id: SlotId) -> Result<(), StoreError> {
        self.slots.remove(&id).map(|_| ()).ok_or(StoreError::SlotNotFound(id))
    }

    fn session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(id).cloned())
    }

    fn put_session(&mut self, session: Session) -> Result<(), StoreError> {
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    fn delete_session(&mut self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.remove(id).map(|_| ()).ok_or_else(|| StoreError::SessionNotFound(id.clone()))
    }

    fn sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(sessions)
    }
}
