//! Session controller: the rules for creating, joining, playing, restarting
//! and observing shared games.

use crate::error::{SessionError, StoreError, StoreErrorKind};
use crate::ids::generate_session_id;
use crate::rules::{is_player_in_game, plan_move};
use crate::session::{PlayerId, Session, SessionId, SessionPatch, SessionStatus};
use crate::store::{DocumentStore, FeedEvent, Subscription};
use chrono::Utc;
use std::sync::Arc;
use strictly_tictactoe::{Board, Mark};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Number of joinable sessions returned when the caller has no preference.
pub const DEFAULT_OPEN_SESSIONS: usize = 5;

/// Fresh ids tried before giving up on a collision streak.
const MAX_ID_ATTEMPTS: usize = 8;

/// Conditional join writes retried after losing a race.
const MAX_JOIN_ATTEMPTS: usize = 3;

/// What `join_session` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The player took the O seat.
    Joined,
    /// The player already held a seat; nothing was written.
    Rejoined,
}

/// Live subscription registered by [`SessionController::subscribe_session`].
///
/// Cancelling (or dropping) the handle stops callbacks and releases the
/// store subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SessionId,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Session being watched.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Stops delivery. No callback starts after this returns.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn cancel(&self) {
        debug!("Cancelling subscription");
        self.token.cancel();
    }

    /// Returns `true` once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `true` once the delivery task has exited, either by
    /// cancellation or because the feed ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Orchestrates board rules and the document store.
///
/// The store is the only source of truth: every mutation writes through, and
/// callers render whatever the subscription feed delivers.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController").finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates a controller over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stores the session `build` makes for a freshly drawn id, drawing again
    /// when the id is already taken.
    async fn persist_new<F>(&self, build: F) -> Result<SessionId, SessionError>
    where
        F: Fn(SessionId) -> Session,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_session_id();
            match self.store.create(build(id.clone())).await {
                Ok(_) => return Ok(id),
                Err(e) if e.kind == StoreErrorKind::Conflict => {
                    debug!(session_id = %id, "Generated id already taken");
                }
                Err(e) => {
                    error!(session_id = %id, error = %e, "Failed to create session");
                    return Err(e.with_kind(StoreErrorKind::Write).into());
                }
            }
        }
        Err(StoreError::write("Could not allocate an unused session id").into())
    }

    /// Creates a two-player session owned by `creator`, waiting for an opponent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the document cannot be written.
    #[instrument(skip(self), fields(creator = %creator))]
    pub async fn create_session(&self, creator: &PlayerId) -> Result<SessionId, SessionError> {
        let now = Utc::now();
        let id = self
            .persist_new(|id| Session::open(id, creator.clone(), now))
            .await?;
        info!(session_id = %id, "Created session");
        Ok(id)
    }

    /// Creates a solo session where `creator` plays both marks.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the document cannot be written.
    #[instrument(skip(self), fields(creator = %creator))]
    pub async fn create_solo_session(&self, creator: &PlayerId) -> Result<SessionId, SessionError> {
        let now = Utc::now();
        let id = self
            .persist_new(|id| Session::solo(id, creator.clone(), now))
            .await?;
        info!(session_id = %id, "Created solo session");
        Ok(id)
    }

    /// Fetches the current document.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] if no such session exists, or
    /// [`SessionError::Store`] if the read fails.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn fetch_session(&self, id: &SessionId) -> Result<Session, SessionError> {
        match self.store.get(id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => {
                debug!("Session not found");
                Err(SessionError::NotFound { id: id.clone() })
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch session");
                Err(e.with_kind(StoreErrorKind::Read).into())
            }
        }
    }

    /// Takes the O seat in a waiting session.
    ///
    /// A player who already holds a seat gets [`JoinOutcome::Rejoined`] and
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// * [`SessionError::NotFound`] if the session does not exist.
    /// * [`SessionError::Full`] if the O seat is taken by someone else.
    /// * [`SessionError::InvalidState`] if it is otherwise not waiting.
    /// * [`SessionError::Stale`] if it kept changing under concurrent joins.
    /// * [`SessionError::Store`] if a store call fails.
    #[instrument(skip(self), fields(session_id = %id, player = %player))]
    pub async fn join_session(
        &self,
        id: &SessionId,
        player: &PlayerId,
    ) -> Result<JoinOutcome, SessionError> {
        for attempt in 0..MAX_JOIN_ATTEMPTS {
            let session = self.fetch_session(id).await?;

            if is_player_in_game(&session, player) {
                info!("Player already seated; rejoining");
                return Ok(JoinOutcome::Rejoined);
            }
            // A taken O seat reports Full regardless of status.
            if session.player_o().is_some() {
                warn!("Join refused: session full");
                return Err(SessionError::Full { id: id.clone() });
            }
            if *session.status() != SessionStatus::Waiting {
                warn!(status = %session.status(), "Join refused: session not waiting");
                return Err(SessionError::InvalidState {
                    id: id.clone(),
                    status: *session.status(),
                });
            }

            let patch = SessionPatch::new()
                .player_o(Some(player.clone()))
                .status(SessionStatus::InProgress)
                .updated_at(session.next_timestamp());

            match self.store.update(id, &patch, Some(*session.version())).await {
                Ok(_) => {
                    info!("Player joined as O");
                    return Ok(JoinOutcome::Joined);
                }
                Err(e) if e.kind == StoreErrorKind::Conflict => {
                    debug!(attempt, "Session changed during join; re-checking");
                }
                Err(e) => return Err(self.classify_write_error(id, e)),
            }
        }
        warn!("Join abandoned after repeated conflicts");
        Err(SessionError::Stale { id: id.clone() })
    }

    /// Places the current turn's mark at `cell`, validated against the
    /// caller's `session` snapshot.
    ///
    /// Only the changed fields are written, and only if the stored document
    /// is still at the snapshot's version. Returns the document as stored.
    ///
    /// # Errors
    ///
    /// * [`SessionError::IllegalMove`] if the move breaks a rule; nothing is written.
    /// * [`SessionError::Stale`] if the snapshot is out of date or belongs to another id.
    /// * [`SessionError::NotFound`] if the document disappeared.
    /// * [`SessionError::Store`] if the write fails.
    #[instrument(skip(self, session), fields(session_id = %id, player = %player))]
    pub async fn apply_move(
        &self,
        id: &SessionId,
        session: &Session,
        player: &PlayerId,
        cell: usize,
    ) -> Result<Session, SessionError> {
        if session.id() != id {
            warn!(snapshot_id = %session.id(), "Snapshot does not belong to this session");
            return Err(SessionError::Stale { id: id.clone() });
        }

        let patch = plan_move(session, player, cell, session.next_timestamp()).map_err(|reason| {
            warn!(%reason, "Move rejected");
            SessionError::from(reason)
        })?;

        let stored = self
            .store
            .update(id, &patch, Some(*session.version()))
            .await
            .map_err(|e| self.classify_write_error(id, e))?;

        info!(
            status = %stored.status(),
            winner = ?stored.winner(),
            next = ?stored.current_turn(),
            "Move applied"
        );
        Ok(stored)
    }

    /// Starts a fresh round with the same players: empty board, X to move,
    /// no winner, in progress. Allowed from any status.
    ///
    /// # Errors
    ///
    /// * [`SessionError::NotFound`] if the session does not exist.
    /// * [`SessionError::Store`] if a store call fails.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn restart_session(&self, id: &SessionId) -> Result<(), SessionError> {
        let session = self.fetch_session(id).await?;
        debug!(status = %session.status(), "Restarting from current status");

        let patch = SessionPatch::new()
            .board(Board::new())
            .current_turn(Mark::X)
            .winner(None)
            .status(SessionStatus::InProgress)
            .updated_at(session.next_timestamp());

        self.store
            .update(id, &patch, None)
            .await
            .map_err(|e| self.classify_write_error(id, e))?;
        info!("Session restarted");
        Ok(())
    }

    /// Lists sessions waiting for an opponent, newest first.
    ///
    /// The list is advisory: a failed query is logged and yields an empty list.
    #[instrument(skip(self))]
    pub async fn list_open_sessions(&self, limit: usize) -> Vec<Session> {
        match self.store.query_by_status(SessionStatus::Waiting, limit).await {
            Ok(sessions) => {
                debug!(count = sessions.len(), "Listed open sessions");
                sessions
            }
            Err(e) => {
                warn!(error = %e, "Failed to list open sessions");
                Vec::new()
            }
        }
    }

    /// Opens the raw ordered feed for one session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the subscription cannot be established.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn watch_session(&self, id: &SessionId) -> Result<Subscription, SessionError> {
        self.store.subscribe(id).await.map_err(|e| {
            warn!(error = %e, "Failed to subscribe");
            e.with_kind(StoreErrorKind::Subscribe).into()
        })
    }

    /// Delivers every version of the session to `on_update`, starting with
    /// the current one. `on_error` receives [`SessionError::NotFound`] while
    /// the document is absent and [`SessionError::Store`] if the feed breaks.
    ///
    /// Callbacks run one at a time on a spawned task, in write order.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the subscription cannot be established.
    #[instrument(skip(self, on_update, on_error), fields(session_id = %id))]
    pub async fn subscribe_session<U, E>(
        &self,
        id: &SessionId,
        mut on_update: U,
        mut on_error: E,
    ) -> Result<SubscriptionHandle, SessionError>
    where
        U: FnMut(Session) + Send + 'static,
        E: FnMut(SessionError) + Send + 'static,
    {
        let mut feed = self.watch_session(id).await?;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let watched = id.clone();

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    event = feed.next() => event,
                };
                // Cancellation may land while the event was in flight.
                if cancelled.is_cancelled() {
                    break;
                }
                match event {
                    Some(FeedEvent::Snapshot(session)) => on_update(session),
                    Some(FeedEvent::Missing) => on_error(SessionError::NotFound {
                        id: watched.clone(),
                    }),
                    Some(FeedEvent::Failed(source)) => {
                        on_error(SessionError::Store { source });
                        break;
                    }
                    None => break,
                }
            }
            debug!(session_id = %watched, "Subscription delivery ended");
        });

        info!("Subscribed to session");
        Ok(SubscriptionHandle {
            id: id.clone(),
            token,
            task,
        })
    }

    /// Maps store write failures onto session errors.
    fn classify_write_error(&self, id: &SessionId, e: StoreError) -> SessionError {
        match e.kind {
            StoreErrorKind::Conflict => {
                warn!(session_id = %id, "Write rejected: session changed since snapshot");
                SessionError::Stale { id: id.clone() }
            }
            StoreErrorKind::Missing => SessionError::NotFound { id: id.clone() },
            _ => {
                error!(session_id = %id, error = %e, "Store write failed");
                e.with_kind(StoreErrorKind::Write).into()
            }
        }
    }
}
