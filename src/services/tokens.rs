//! Claim-token store
//!
//! Tokens live for the process lifetime only. The trait keeps callers away
//! from the map so a persisted or shared implementation can slot in later.

use crate::domain::types::{new_opaque_id, PendingToken, TokenKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

pub trait ClaimTokenStore: Send + Sync {
    /// Create a new token of `kind`
    fn issue(&self, kind: TokenKind) -> PendingToken;
    fn lookup(&self, token: &str) -> Option<PendingToken>;
    /// Remove and return the token, if it was pending
    fn consume(&self, token: &str) -> Option<PendingToken>;
    /// Put a previously consumed token back
    fn reinstate(&self, token: PendingToken);
    /// Drop every expired token; returns how many were removed
    fn sweep_expired(&self) -> usize;
}

pub struct MemoryTokenStore {
    ttl: ChronoDuration,
    tokens: Mutex<FxHashMap<String, PendingToken>>,
}

impl MemoryTokenStore {
    pub fn new(ttl_secs: u64) -> Self {
        // Clamp to a year so `now + ttl` cannot overflow
        let ttl_secs = ttl_secs.min(MAX_TTL_SECS) as i64;
        Self { ttl: ChronoDuration::seconds(ttl_secs), tokens: Mutex::new(FxHashMap::default()) }
    }

    /// Issue with an explicit lifetime; negative values give an already expired token
    pub fn issue_with_ttl(&self, kind: TokenKind, ttl: ChronoDuration) -> PendingToken {
        let pending = PendingToken { token: new_opaque_id(), kind, expires_at: Utc::now() + ttl };
        self.tokens.lock().insert(pending.token.clone(), pending.clone());
        debug!(kind = %kind.as_str(), expires_at = %pending.expires_at, "token_issued");
        pending
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.lock();
        let before = tokens.len();
        tokens.retain(|_, pending| !pending.is_expired(now));
        before - tokens.len()
    }
}

impl ClaimTokenStore for MemoryTokenStore {
    fn issue(&self, kind: TokenKind) -> PendingToken {
        self.issue_with_ttl(kind, self.ttl)
    }

    fn lookup(&self, token: &str) -> Option<PendingToken> {
        self.tokens.lock().get(token).cloned()
    }

    fn consume(&self, token: &str) -> Option<PendingToken> {
        self.tokens.lock().remove(token)
    }

    fn reinstate(&self, token: PendingToken) {
        self.tokens.lock().insert(token.token.clone(), token);
    }

    fn sweep_expired(&self) -> usize {
        let removed = self.sweep_at(Utc::now());
        if removed > 0 {
            debug!(removed = removed, "tokens_swept");
        }
        removed
    }
}

/// Periodically drop expired tokens until shutdown
pub async fn run_sweeper(
    store: Arc<dyn ClaimTokenStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = %interval.as_secs(), "token_sweeper_started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                store.sweep_expired();
            }
            _ = shutdown.changed() => {
                break;
            }
        }
    }
    info!("token_sweeper_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_lookup() {
        let store = MemoryTokenStore::new(90);
        let pending = store.issue(TokenKind::Entry);
        assert_eq!(pending.token.len(), 22);

        let found = store.lookup(&pending.token).unwrap();
        assert_eq!(found.kind, TokenKind::Entry);
        assert!(!found.is_expired(Utc::now()));
        assert!(store.lookup("missing").is_none());
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = MemoryTokenStore::new(90);
        let pending = store.issue(TokenKind::Exit);
        assert!(store.consume(&pending.token).is_some());
        assert!(store.consume(&pending.token).is_none());
        assert!(store.lookup(&pending.token).is_none());
    }

    #[test]
    fn test_reinstate_restores_token() {
        let store = MemoryTokenStore::new(90);
        let pending = store.issue(TokenKind::Entry);
        let taken = store.consume(&pending.token).unwrap();
        store.reinstate(taken);
        assert_eq!(store.lookup(&pending.token), Some(pending));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let store = MemoryTokenStore::new(90);
        let live = store.issue(TokenKind::Entry);
        let stale = store.issue_with_ttl(TokenKind::Entry, ChronoDuration::seconds(-1));

        assert_eq!(store.sweep_expired(), 1);
        assert!(store.lookup(&stale.token).is_none());
        assert!(store.lookup(&live.token).is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_shutdown() {
        let store = Arc::new(MemoryTokenStore::new(90));
        store.issue_with_ttl(TokenKind::Exit, ChronoDuration::seconds(-5));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle =
            tokio::spawn(run_sweeper(store.clone(), Duration::from_millis(10), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
