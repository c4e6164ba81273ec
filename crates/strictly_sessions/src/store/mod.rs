//! Document store adapter.
//!
//! [`DocumentStore`] is the seam between session rules and whatever real-time
//! database holds the documents. Two backends ship with the crate:
//! [`MemoryStore`] for a single process and tests, and [`SqliteStore`] for
//! sharing games between processes on one machine.

mod memory;
mod models;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::session::{Session, SessionId, SessionPatch, SessionStatus};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One push from a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The document as it stands after the latest write.
    Snapshot(Session),
    /// The document does not exist (never created, or removed).
    Missing,
    /// The feed broke; no further events follow.
    Failed(StoreError),
}

/// Receiving end of a live subscription to one document.
///
/// Events arrive in write order. Dropping the subscription releases it.
#[derive(Debug)]
pub struct Subscription {
    id: SessionId,
    events: mpsc::UnboundedReceiver<FeedEvent>,
}

impl Subscription {
    /// Wraps a receiver fed by a store backend.
    pub fn new(id: SessionId, events: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self { id, events }
    }

    /// Id of the watched document.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Waits for the next event. Returns `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }
}

/// Read, write, subscribe and query primitives over session documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches a document by id.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Overwrites (or creates) the document under `session.id()`. Returns the
    /// stored document with its new version.
    async fn set(&self, session: Session) -> Result<Session, StoreError>;

    /// Stores `session` only if no document has its id yet.
    ///
    /// Fails with [`StoreErrorKind::Conflict`](crate::StoreErrorKind::Conflict)
    /// and writes nothing when the id is taken.
    async fn create(&self, session: Session) -> Result<Session, StoreError>;

    /// Merges `patch` into an existing document.
    ///
    /// Fails with [`StoreErrorKind::Missing`](crate::StoreErrorKind::Missing)
    /// when the document is absent, and with
    /// [`StoreErrorKind::Conflict`](crate::StoreErrorKind::Conflict) when
    /// `expected_version` is given and differs from the stored version.
    async fn update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        expected_version: Option<u64>,
    ) -> Result<Session, StoreError>;

    /// Opens a live feed of one document. The first event reflects the
    /// current state (a snapshot, or [`FeedEvent::Missing`]).
    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError>;

    /// Documents with `status`, newest `createdAt` first, at most `limit`.
    async fn query_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError>;
}
