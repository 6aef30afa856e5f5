//! Operator console on stdin/stdout
//!
//! One command per line, one JSON reply per line:
//!   qr entry | qr exit
//!   claim-entry <token>
//!   parked <session>
//!   claim-exit <session> [token]
//!   slots | sensors | sessions
//!   set-slots <n>
//!   gate open | gate close

use crate::services::api::{GateAction, ParkingApi};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    QrEntry,
    QrExit,
    ClaimEntry(String),
    Parked(String),
    ClaimExit { session: String, token: Option<String> },
    Slots,
    Sensors,
    Sessions,
    SetSlots(u32),
    Gate(GateAction),
    Help,
}

const USAGE: &str = "qr entry|exit, claim-entry <token>, parked <session>, \
claim-exit <session> [token], slots, sensors, sessions, set-slots <n>, gate open|close";

pub fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["qr", "entry"] => Ok(ConsoleCommand::QrEntry),
        ["qr", "exit"] => Ok(ConsoleCommand::QrExit),
        ["claim-entry", token] => Ok(ConsoleCommand::ClaimEntry(token.to_string())),
        ["parked", session] => Ok(ConsoleCommand::Parked(session.to_string())),
        ["claim-exit", session] => {
            Ok(ConsoleCommand::ClaimExit { session: session.to_string(), token: None })
        }
        ["claim-exit", session, token] => Ok(ConsoleCommand::ClaimExit {
            session: session.to_string(),
            token: Some(token.to_string()),
        }),
        ["slots"] => Ok(ConsoleCommand::Slots),
        ["sensors"] => Ok(ConsoleCommand::Sensors),
        ["sessions"] => Ok(ConsoleCommand::Sessions),
        ["set-slots", n] => {
            n.parse().map(ConsoleCommand::SetSlots).map_err(|_| format!("invalid slot count '{n}'"))
        }
        ["gate", action] => action.parse().map(ConsoleCommand::Gate),
        ["help"] => Ok(ConsoleCommand::Help),
        _ => Err(format!("unknown command, expected one of: {USAGE}")),
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "ok": false, "error": e.to_string() }))
}

fn failure(e: impl std::fmt::Display) -> Value {
    json!({ "ok": false, "error": e.to_string() })
}

/// Run one command against the API and render the reply
pub async fn execute(api: &ParkingApi, command: ConsoleCommand) -> Value {
    match command {
        ConsoleCommand::QrEntry => to_json(&api.issue_entry_qr()),
        ConsoleCommand::QrExit => to_json(&api.issue_exit_qr()),
        ConsoleCommand::ClaimEntry(token) => match api.claim_entry(&token).await {
            Ok(reply) => to_json(&reply),
            Err(e) => failure(e),
        },
        ConsoleCommand::Parked(session) => match api.confirm_parked(&session) {
            Ok(reply) => to_json(&reply),
            Err(e) => failure(e),
        },
        ConsoleCommand::ClaimExit { session, token } => {
            match api.claim_exit(&session, token.as_deref()).await {
                Ok(reply) => to_json(&reply),
                Err(e) => failure(e),
            }
        }
        ConsoleCommand::Slots => match api.slots_summary() {
            Ok(summary) => to_json(&summary),
            Err(e) => failure(e),
        },
        ConsoleCommand::Sensors => to_json(&api.sensor_debug_state()),
        ConsoleCommand::Sessions => match api.sessions() {
            Ok(sessions) => to_json(&sessions),
            Err(e) => failure(e),
        },
        ConsoleCommand::SetSlots(n) => match api.admin_set_slot_count(n) {
            Ok(reply) => to_json(&reply),
            Err(e) => failure(e),
        },
        ConsoleCommand::Gate(action) => to_json(&api.admin_gate(action).await),
        ConsoleCommand::Help => json!({ "ok": true, "usage": USAGE }),
    }
}

/// Read commands until EOF or shutdown, writing one JSON line per command
pub async fn run_console<R, W>(
    api: Arc<ParkingApi>,
    reader: R,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    info!("console_started");

    loop {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            next = lines.next_line() => match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("console_eof");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "console_read_failed");
                    break;
                }
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match parse_command(line) {
            Ok(command) => execute(&api, command).await,
            Err(e) => failure(e),
        };

        let mut out = reply.to_string();
        out.push('\n');
        if let Err(e) = writer.write_all(out.as_bytes()).await {
            error!(error = %e, "console_write_failed");
            break;
        }
        let _ = writer.flush().await;
    }

    info!("console_stopped");
}

/// Observer that logs every fanned-out message
pub async fn run_event_log(mut rx: mpsc::Receiver<String>) {
    while let Some(message) = rx.recv().await {
        info!(message = %message, "observer_event");
    }
}
