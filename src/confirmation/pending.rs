//! Pending-challenge store.
//!
//! Plain data structure; the broker wraps it in a `tokio::sync::Mutex`.
//! `take` is the single resolution primitive: whichever path removes an
//! entry first owns its terminal transition, every later attempt sees `None`.

use std::collections::{HashMap, VecDeque};

use tokio::task::JoinHandle;

use super::display::ConfirmationDisplay;
use crate::actions::ConfirmationRequest;

/// Recently resolved ids remembered for late responses.
pub const TOMBSTONE_CAPACITY: usize = 1_000;

/// Terminal outcome of a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    ConfirmedValid,
    ConfirmedInvalid,
    Denied,
    TimedOut,
    Cancelled,
}

/// How a challenge ended, plus the payload a late caller needs to re-render it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub state: TerminalState,
    pub display: Option<ConfirmationDisplay>,
}

/// A challenge awaiting its response, with its armed expiry timer.
#[derive(Debug)]
pub struct PendingConfirmation {
    request: ConfirmationRequest,
    user: Option<String>,
    expires_at: u64,
    expiry: Option<JoinHandle<()>>,
}

impl PendingConfirmation {
    pub fn new(request: ConfirmationRequest, user: Option<&str>, timeout_ms: u64) -> Self {
        let expires_at = request.created_at().saturating_add(timeout_ms);
        Self {
            request,
            user: user.map(str::to_string),
            expires_at,
            expiry: None,
        }
    }

    pub fn arm(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.expiry.replace(handle) {
            old.abort();
        }
    }

    /// Cancel the expiry timer. Every resolution path except the timer
    /// itself must call this.
    pub fn disarm(&mut self) {
        if let Some(handle) = self.expiry.take() {
            handle.abort();
        }
    }

    /// Drop the timer handle without aborting; used from inside the timer task.
    pub fn detach(&mut self) {
        self.expiry.take();
    }

    pub fn request(&self) -> &ConfirmationRequest {
        &self.request
    }

    pub fn into_request(self) -> ConfirmationRequest {
        self.request
    }

    /// Who created the challenge, if known.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn created_at(&self) -> u64 {
        self.request.created_at()
    }

    /// Unix epoch millis.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    pub fn is_armed(&self) -> bool {
        self.expiry.is_some()
    }
}

/// Pending entries keyed by correlation id, plus a bounded tombstone log.
#[derive(Debug, Default)]
pub struct PendingStore {
    entries: HashMap<String, PendingConfirmation>,
    tombstones: HashMap<String, Tombstone>,
    tombstone_order: VecDeque<String>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.entries.contains_key(correlation_id)
    }

    pub fn get(&self, correlation_id: &str) -> Option<&PendingConfirmation> {
        self.entries.get(correlation_id)
    }

    /// Add a pending entry. A live entry with the same correlation id is
    /// never replaced; the rejected entry is handed back to the caller.
    pub fn insert(&mut self, entry: PendingConfirmation) -> Result<(), PendingConfirmation> {
        let id = entry.request().correlation_id();
        if self.entries.contains_key(id) {
            return Err(entry);
        }
        self.entries.insert(id.to_string(), entry);
        Ok(())
    }

    /// Remove and return the entry if it is still pending.
    pub fn take(&mut self, correlation_id: &str) -> Option<PendingConfirmation> {
        self.entries.remove(correlation_id)
    }

    /// Ids whose deadline has passed.
    pub fn expired_ids(&self, now_ms: u64) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now_ms))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<PendingConfirmation> {
        self.entries.drain().map(|(_, e)| e).collect()
    }

    /// Remember how `correlation_id` ended. Oldest tombstones are evicted.
    pub fn bury(
        &mut self,
        correlation_id: &str,
        state: TerminalState,
        display: Option<ConfirmationDisplay>,
    ) {
        let tombstone = Tombstone { state, display };
        if self.tombstones.insert(correlation_id.to_string(), tombstone).is_none() {
            self.tombstone_order.push_back(correlation_id.to_string());
        }
        while self.tombstone_order.len() > TOMBSTONE_CAPACITY {
            if let Some(old) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&old);
            }
        }
    }

    /// How a recently resolved id ended, if it is still remembered.
    pub fn tombstone(&self, correlation_id: &str) -> Option<&Tombstone> {
        self.tombstones.get(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::audit::MemoryAuditSink;
    use serde_json::Map;
    use std::sync::Arc;

    fn request(id: &str) -> ConfirmationRequest {
        let registry = ActionRegistry::with_default_catalog(Arc::new(MemoryAuditSink::new()));
        registry
            .generate_confirmation_request("delete_volume", &Map::new(), Some(id))
            .unwrap()
    }

    #[test]
    fn take_is_exactly_once() {
        let mut store = PendingStore::new();
        store.insert(PendingConfirmation::new(request("a"), None, 1_000)).unwrap();
        assert!(store.contains("a"));
        assert!(store.take("a").is_some());
        assert!(store.take("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn expiry_deadline_from_creation() {
        let entry = PendingConfirmation::new(request("a"), Some("alice"), 50);
        assert_eq!(entry.expires_at(), entry.created_at() + 50);
        assert!(!entry.is_expired_at(entry.created_at() + 49));
        assert!(entry.is_expired_at(entry.created_at() + 50));
        assert_eq!(entry.user(), Some("alice"));
    }

    #[test]
    fn expired_ids_only_lists_overdue() {
        let mut store = PendingStore::new();
        let short = PendingConfirmation::new(request("short"), None, 10);
        let now = short.created_at() + 20;
        store.insert(short).unwrap();
        store.insert(PendingConfirmation::new(request("long"), None, 1_000_000)).unwrap();
        assert_eq!(store.expired_ids(now), vec!["short".to_string()]);
    }

    #[test]
    fn tombstones_bounded() {
        let mut store = PendingStore::new();
        store.bury("first", TerminalState::TimedOut, None);
        for i in 0..TOMBSTONE_CAPACITY {
            store.bury(&format!("id-{i}"), TerminalState::Denied, None);
        }
        assert!(store.tombstone("first").is_none());
        assert_eq!(store.tombstone("id-0").map(|t| t.state), Some(TerminalState::Denied));
    }

    #[test]
    fn tombstone_keeps_display() {
        let mut store = PendingStore::new();
        let req = request("a");
        let display = ConfirmationDisplay::new(&req, 1_000);
        store.bury("a", TerminalState::TimedOut, Some(display.clone()));
        let tombstone = store.tombstone("a").unwrap();
        assert_eq!(tombstone.state, TerminalState::TimedOut);
        assert_eq!(tombstone.display.as_ref(), Some(&display));
    }

    #[test]
    fn duplicate_id_never_replaces_live_entry() {
        let mut store = PendingStore::new();
        store.insert(PendingConfirmation::new(request("a"), Some("alice"), 1_000)).unwrap();
        let rejected = store
            .insert(PendingConfirmation::new(request("a"), Some("mallory"), 1_000))
            .unwrap_err();
        assert_eq!(rejected.user(), Some("mallory"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().user(), Some("alice"));
    }

    #[tokio::test]
    async fn disarm_aborts_timer() {
        let mut entry = PendingConfirmation::new(request("a"), None, 1_000);
        let handle = tokio::spawn(std::future::pending::<()>());
        entry.arm(handle);
        assert!(entry.is_armed());
        entry.disarm();
        assert!(!entry.is_armed());
    }
}
