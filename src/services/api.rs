//! Boundary API consumed by front ends (operator console, web layer)
//!
//! Claim rejections come back as `{ok:false, reason}` replies. Only internal
//! failures (storage, failed rollback) surface as `Err`.

use crate::domain::types::{Session, SessionId, Slot, TokenKind};
use crate::io::protocol::Command;
use crate::io::serial_link::GateCommander;
use crate::services::error::{ClaimError, Rejection};
use crate::services::reservations::Reservations;
use crate::services::sensors::SensorBoard;
use crate::services::store::StoreError;
use crate::services::tokens::ClaimTokenStore;
use chrono::SecondsFormat;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct QrTicket {
    pub token: String,
    /// RFC 3339
    pub expires_at: String,
    pub url: String,
}

/// Reply to a claim or admin call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl ApiReply {
    pub fn ok() -> Self {
        Self { ok: true, ..Self::default() }
    }

    pub fn rejected(reason: Rejection) -> Self {
        Self { ok: false, reason: Some(reason.as_str()), ..Self::default() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotsSummary {
    pub total: usize,
    pub free: usize,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorDebug {
    pub entry: bool,
    pub exit: bool,
    pub link_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Open,
    Close,
}

impl FromStr for GateAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(GateAction::Open),
            "close" => Ok(GateAction::Close),
            other => Err(format!("unknown gate action '{other}', expected open or close")),
        }
    }
}

/// Turn a claim result into a reply, passing internal failures through
fn into_reply<T>(
    result: Result<T, ClaimError>,
    on_ok: impl FnOnce(T) -> ApiReply,
) -> Result<ApiReply, ClaimError> {
    match result {
        Ok(value) => Ok(on_ok(value)),
        Err(ClaimError::Rejected(reason)) => Ok(ApiReply::rejected(reason)),
        Err(e) => Err(e),
    }
}

pub struct ParkingApi {
    reservations: Arc<Reservations>,
    tokens: Arc<dyn ClaimTokenStore>,
    gate: Arc<dyn GateCommander>,
    board: Arc<SensorBoard>,
    public_base_url: String,
}

impl ParkingApi {
    pub fn new(
        reservations: Arc<Reservations>,
        tokens: Arc<dyn ClaimTokenStore>,
        gate: Arc<dyn GateCommander>,
        board: Arc<SensorBoard>,
        public_base_url: &str,
    ) -> Self {
        Self {
            reservations,
            tokens,
            gate,
            board,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// New entry ticket; also drops expired tokens
    pub fn issue_entry_qr(&self) -> QrTicket {
        self.tokens.sweep_expired();
        self.ticket(TokenKind::Entry, "claim")
    }

    pub fn issue_exit_qr(&self) -> QrTicket {
        self.ticket(TokenKind::Exit, "exit")
    }

    fn ticket(&self, kind: TokenKind, path: &str) -> QrTicket {
        let pending = self.tokens.issue(kind);
        info!(kind = %kind.as_str(), "qr_issued");
        QrTicket {
            url: format!("{}/{}?tk={}", self.public_base_url, path, pending.token),
            expires_at: pending.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            token: pending.token,
        }
    }

    pub async fn claim_entry(&self, token: &str) -> Result<ApiReply, ClaimError> {
        into_reply(self.reservations.claim_entry(token).await, |grant| ApiReply {
            ok: true,
            slot: Some(grant.slot.0),
            session: Some(grant.session.0),
            ttl_seconds: Some(grant.ttl_seconds),
            ..ApiReply::default()
        })
    }

    pub fn confirm_parked(&self, session: &str) -> Result<ApiReply, ClaimError> {
        into_reply(self.reservations.confirm_parked(&SessionId::from(session)), |slot| ApiReply {
            ok: true,
            slot: Some(slot.0),
            ..ApiReply::default()
        })
    }

    pub async fn claim_exit(&self, session: &str, token: Option<&str>) -> Result<ApiReply, ClaimError> {
        let session = SessionId::from(session);
        into_reply(self.reservations.claim_exit(&session, token).await, |grant| ApiReply {
            ok: true,
            slot: Some(grant.slot.0),
            ..ApiReply::default()
        })
    }

    pub fn admin_set_slot_count(&self, total: u32) -> Result<ApiReply, ClaimError> {
        into_reply(self.reservations.set_slot_count(total), |total| ApiReply {
            ok: true,
            total: Some(total),
            ..ApiReply::default()
        })
    }

    pub async fn admin_gate(&self, action: GateAction) -> ApiReply {
        let cmd = match action {
            GateAction::Open => Command::Open,
            GateAction::Close => Command::Close,
        };
        if self.gate.send_command(cmd).await {
            info!(command = %cmd, "admin_gate");
            ApiReply::ok()
        } else {
            ApiReply::rejected(Rejection::GateOffline)
        }
    }

    pub fn slots_summary(&self) -> Result<SlotsSummary, StoreError> {
        let slots = self.reservations.slots()?;
        let free = slots.iter().filter(|s| s.is_free()).count();
        Ok(SlotsSummary { total: slots.len(), free, slots })
    }

    /// Cached beam levels for display; never used for gate decisions
    pub fn sensor_debug_state(&self) -> SensorDebug {
        let reading = self.board.reading();
        SensorDebug {
            entry: reading.entry_blocked,
            exit: reading.exit_blocked,
            link_connected: self.gate.is_connected(),
        }
    }

    pub fn session(&self, session: &str) -> Result<Option<Session>, StoreError> {
        self.reservations.session(&SessionId::from(session))
    }

    pub fn sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.reservations.sessions()
    }
}
