//! In-process document store.

use crate::error::{StoreError, StoreErrorKind};
use crate::session::{Session, SessionId, SessionPatch, SessionStatus};
use crate::store::{DocumentStore, FeedEvent, Subscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, instrument, trace};

#[derive(Debug, Default)]
struct Documents {
    sessions: HashMap<SessionId, Session>,
    watchers: HashMap<SessionId, Vec<mpsc::UnboundedSender<FeedEvent>>>,
}

impl Documents {
    /// Pushes `event` to every live watcher of `id`, dropping closed ones.
    fn notify(&mut self, id: &SessionId, event: FeedEvent) {
        if let Some(watchers) = self.watchers.get_mut(id) {
            watchers.retain(|tx| tx.send(event.clone()).is_ok());
            trace!(session_id = %id, watchers = watchers.len(), "Notified watchers");
            if watchers.is_empty() {
                self.watchers.remove(id);
            }
        }
    }
}

/// Thread-safe in-memory store.
///
/// Watchers are notified while the write lock is held, so every subscriber
/// sees writes in the order they were applied.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<RwLock<Documents>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating in-memory session store");
        Self::default()
    }

    /// Number of successful writes (`set`, `create` and `update`) so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Deletes a document, as an external cleanup job would. Watchers receive
    /// [`FeedEvent::Missing`]. Returns `true` if something was removed.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn remove(&self, id: &SessionId) -> bool {
        let mut docs = self.documents.write().await;
        let removed = docs.sessions.remove(id).is_some();
        if removed {
            info!("Session document removed");
            docs.notify(id, FeedEvent::Missing);
        }
        removed
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    #[instrument(skip(self), fields(session_id = %id))]
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let docs = self.documents.read().await;
        let session = docs.sessions.get(id).cloned();
        debug!(found = session.is_some(), "Fetched session");
        Ok(session)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    async fn set(&self, mut session: Session) -> Result<Session, StoreError> {
        let mut docs = self.documents.write().await;
        // Versions keep climbing across overwrites so stale writers still lose.
        if let Some(previous) = docs.sessions.get(session.id()).map(|s| *s.version()) {
            while *session.version() < previous {
                session.bump_version();
            }
        }
        session.bump_version();

        let id = session.id().clone();
        docs.sessions.insert(id.clone(), session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        docs.notify(&id, FeedEvent::Snapshot(session.clone()));
        debug!(version = session.version(), "Stored session");
        Ok(session)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    async fn create(&self, mut session: Session) -> Result<Session, StoreError> {
        let mut docs = self.documents.write().await;
        if docs.sessions.contains_key(session.id()) {
            debug!("Session id already taken");
            return Err(StoreError::new(
                StoreErrorKind::Conflict,
                format!("Session '{}' already exists", session.id()),
            ));
        }
        session.bump_version();

        let id = session.id().clone();
        docs.sessions.insert(id.clone(), session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        docs.notify(&id, FeedEvent::Snapshot(session.clone()));
        debug!(version = session.version(), "Created session document");
        Ok(session)
    }

    #[instrument(skip(self, patch), fields(session_id = %id, fields = ?patch.fields()))]
    async fn update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        expected_version: Option<u64>,
    ) -> Result<Session, StoreError> {
        let mut docs = self.documents.write().await;
        let session = docs.sessions.get_mut(id).ok_or_else(|| {
            StoreError::new(StoreErrorKind::Missing, format!("No session document '{}'", id))
        })?;

        if let Some(expected) = expected_version {
            if *session.version() != expected {
                return Err(StoreError::new(
                    StoreErrorKind::Conflict,
                    format!(
                        "Session '{}' is at version {}, expected {}",
                        id,
                        session.version(),
                        expected
                    ),
                ));
            }
        }

        session.apply(patch);
        session.bump_version();
        let updated = session.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        docs.notify(id, FeedEvent::Snapshot(updated.clone()));
        debug!(version = updated.version(), "Updated session");
        Ok(updated)
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut docs = self.documents.write().await;

        // Initial state goes out under the same lock as registration, so no
        // write can slip in between.
        let initial = docs
            .sessions
            .get(id)
            .cloned()
            .map_or(FeedEvent::Missing, FeedEvent::Snapshot);
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(initial);

        docs.watchers.entry(id.clone()).or_default().push(tx);
        debug!("Subscription registered");
        Ok(Subscription::new(id.clone(), rx))
    }

    #[instrument(skip(self))]
    async fn query_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let docs = self.documents.read().await;
        let mut matches: Vec<Session> = docs
            .sessions
            .values()
            .filter(|s| *s.status() == status)
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            b.created_at()
                .cmp(a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        matches.truncate(limit);
        debug!(count = matches.len(), "Queried sessions by status");
        Ok(matches)
    }
}
