//! SQLite-backed document store.

use crate::error::{StoreError, StoreErrorKind};
use crate::session::{Session, SessionId, SessionPatch, SessionStatus};
use crate::store::models::{RevisionRow, SessionRow};
use crate::store::{DocumentStore, FeedEvent, Subscription, schema};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, trace, warn};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Revisions retained per session for subscription replay.
const REVISIONS_KEPT: i64 = 64;

/// Document store persisting sessions in a SQLite file.
///
/// Each call opens its own connection on a blocking thread. Every write also
/// records the resulting document in `session_revisions`, and subscriptions
/// poll that log, so each write reaches subscribers as its own snapshot even
/// when several land inside one poll interval or come from another process.
/// A subscriber lagging more than 64 writes behind resumes at the oldest
/// retained revision.
///
/// The path must name a file; `":memory:"` would give every connection its
/// own empty database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    database_url: String,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `database_url` and applies
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or migrated.
    #[instrument(skip(database_url), fields(database_url = %database_url))]
    pub fn open(database_url: String, poll_interval: Duration) -> Result<Self, StoreError> {
        info!(?poll_interval, "Opening SQLite session store");
        let mut conn = connect(&database_url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::write(format!("Migrations failed: {}", e)))?;
        debug!(count = applied.len(), "Applied migrations");
        Ok(Self {
            database_url,
            poll_interval,
        })
    }

    /// Deletes a document and its revisions. Subscribers see
    /// [`FeedEvent::Missing`] on their next poll. Returns `true` if a row was
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        let key = id.as_str().to_string();
        let deleted = self
            .with_connection(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    diesel::delete(
                        schema::session_revisions::table
                            .filter(schema::session_revisions::session_id.eq(key.as_str())),
                    )
                    .execute(conn)?;
                    Ok(diesel::delete(schema::sessions::table.find(key.as_str())).execute(conn)?)
                })
            })
            .await?;
        info!(deleted, "Session document removed");
        Ok(deleted > 0)
    }

    /// Runs `op` with a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let url = self.database_url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&url)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::read(format!("Store task failed: {}", e)))?
    }
}

/// Appends `row`'s document to the revision log and drops revisions older
/// than the retention window.
fn record_revision(conn: &mut SqliteConnection, row: &SessionRow) -> Result<(), StoreError> {
    let revision = row.revision();
    diesel::replace_into(schema::session_revisions::table)
        .values(&revision)
        .execute(conn)?;
    let pruned = diesel::delete(
        schema::session_revisions::table
            .filter(schema::session_revisions::session_id.eq(row.id()))
            .filter(schema::session_revisions::version.le(row.version() - REVISIONS_KEPT)),
    )
    .execute(conn)?;
    trace!(version = row.version(), pruned, "Recorded revision");
    Ok(())
}

/// Reads what a subscriber positioned at `after` has not seen yet.
///
/// Returns `None` when the document is absent. With no position, returns the
/// current document only. A stored version below the position means the
/// document was removed and recreated in between, so its log is replayed from
/// the start.
fn unseen_revisions(
    conn: &mut SqliteConnection,
    key: &str,
    after: Option<u64>,
) -> Result<Option<Vec<Session>>, StoreError> {
    let current = schema::sessions::table
        .find(key)
        .select(SessionRow::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StoreError::from(e).with_kind(StoreErrorKind::Read))?;
    let Some(current) = current else {
        return Ok(None);
    };
    let Some(after) = after else {
        return Ok(Some(vec![current.to_session()?]));
    };

    let after = i64::try_from(after).unwrap_or(i64::MAX);
    let after = if current.version() < after { 0 } else { after };
    let revisions: Vec<RevisionRow> = schema::session_revisions::table
        .filter(schema::session_revisions::session_id.eq(key))
        .filter(schema::session_revisions::version.gt(after))
        .order(schema::session_revisions::version.asc())
        .select(RevisionRow::as_select())
        .load(conn)
        .map_err(|e| StoreError::from(e).with_kind(StoreErrorKind::Read))?;
    revisions
        .iter()
        .map(RevisionRow::to_session)
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Establishes a connection with a busy timeout so concurrent writers queue
/// instead of failing outright.
#[instrument]
fn connect(database_url: &str) -> Result<SqliteConnection, StoreError> {
    let mut conn = SqliteConnection::establish(database_url).map_err(|e| {
        StoreError::read(format!("Failed to connect to '{}': {}", database_url, e))
    })?;
    diesel::sql_query(format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS)).execute(&mut conn)?;
    Ok(conn)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    #[instrument(skip(self), fields(session_id = %id))]
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = id.as_str().to_string();
        let row = self
            .with_connection(move |conn| {
                schema::sessions::table
                    .find(key)
                    .select(SessionRow::as_select())
                    .first(conn)
                    .optional()
                    .map_err(|e| StoreError::from(e).with_kind(StoreErrorKind::Read))
            })
            .await?;
        debug!(found = row.is_some(), "Fetched session");
        row.map(|r| r.to_session()).transpose()
    }

    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    async fn set(&self, session: Session) -> Result<Session, StoreError> {
        let stored = self
            .with_connection(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let mut session = session;
                    let previous: Option<i64> = schema::sessions::table
                        .find(session.id().as_str())
                        .select(schema::sessions::version)
                        .first(conn)
                        .optional()?;
                    // Versions keep climbing across overwrites so stale writers still lose.
                    if let Some(previous) = previous {
                        while (*session.version() as i64) < previous {
                            session.bump_version();
                        }
                    }
                    session.bump_version();

                    let row = SessionRow::from_session(&session)?;
                    diesel::replace_into(schema::sessions::table)
                        .values(&row)
                        .execute(conn)?;
                    record_revision(conn, &row)?;
                    Ok(session)
                })
            })
            .await?;
        debug!(version = stored.version(), "Stored session");
        Ok(stored)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id()))]
    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let created = self
            .with_connection(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let mut session = session;
                    let taken = schema::sessions::table
                        .find(session.id().as_str())
                        .select(schema::sessions::version)
                        .first::<i64>(conn)
                        .optional()?
                        .is_some();
                    if taken {
                        return Err(StoreError::new(
                            StoreErrorKind::Conflict,
                            format!("Session '{}' already exists", session.id()),
                        ));
                    }
                    session.bump_version();

                    let row = SessionRow::from_session(&session)?;
                    diesel::insert_into(schema::sessions::table)
                        .values(&row)
                        .execute(conn)?;
                    record_revision(conn, &row)?;
                    Ok(session)
                })
            })
            .await?;
        debug!(version = created.version(), "Created session document");
        Ok(created)
    }

    #[instrument(skip(self, patch), fields(session_id = %id, fields = ?patch.fields()))]
    async fn update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        expected_version: Option<u64>,
    ) -> Result<Session, StoreError> {
        let key = id.as_str().to_string();
        let patch = patch.clone();
        let updated = self
            .with_connection(move |conn| {
                conn.immediate_transaction::<_, StoreError, _>(|conn| {
                    let row = schema::sessions::table
                        .find(key.as_str())
                        .select(SessionRow::as_select())
                        .first(conn)
                        .optional()?
                        .ok_or_else(|| {
                            StoreError::new(
                                StoreErrorKind::Missing,
                                format!("No session document '{}'", key),
                            )
                        })?;

                    let mut session = row.to_session()?;
                    if let Some(expected) = expected_version {
                        if *session.version() != expected {
                            return Err(StoreError::new(
                                StoreErrorKind::Conflict,
                                format!(
                                    "Session '{}' is at version {}, expected {}",
                                    key,
                                    session.version(),
                                    expected
                                ),
                            ));
                        }
                    }

                    session.apply(&patch);
                    session.bump_version();
                    let row = SessionRow::from_session(&session)?;
                    diesel::update(schema::sessions::table.find(key.as_str()))
                        .set(&row)
                        .execute(conn)?;
                    record_revision(conn, &row)?;
                    Ok(session)
                })
            })
            .await?;
        debug!(version = updated.version(), "Updated session");
        Ok(updated)
    }

    #[instrument(skip(self), fields(session_id = %id))]
    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();

        // The initial state is read before returning, so every write after
        // this call is replayed from the revision log.
        let key = id.as_str().to_string();
        let initial = self
            .with_connection(move |conn| unseen_revisions(conn, &key, None))
            .await
            .map_err(|e| e.with_kind(StoreErrorKind::Subscribe))?;
        // Version of the last snapshot delivered; `Some(0)` after Missing.
        let mut cursor: Option<u64> = None;
        let mut reported_missing = false;
        match initial {
            Some(sessions) => {
                for session in sessions {
                    cursor = Some(*session.version());
                    let _ = tx.send(FeedEvent::Snapshot(session));
                }
            }
            None => {
                let _ = tx.send(FeedEvent::Missing);
                reported_missing = true;
                cursor = Some(0);
            }
        }

        let store = self.clone();
        let watched = id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            'poll: loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let key = watched.as_str().to_string();
                let after = cursor;
                let polled = store
                    .with_connection(move |conn| unseen_revisions(conn, &key, after))
                    .await;
                match polled {
                    Ok(Some(sessions)) => {
                        reported_missing = false;
                        for session in sessions {
                            cursor = Some(*session.version());
                            if tx.send(FeedEvent::Snapshot(session)).is_err() {
                                break 'poll;
                            }
                        }
                    }
                    Ok(None) => {
                        if !reported_missing && tx.send(FeedEvent::Missing).is_err() {
                            break;
                        }
                        reported_missing = true;
                        cursor = Some(0);
                    }
                    Err(err) => {
                        warn!(session_id = %watched, error = %err, "Subscription poll failed");
                        let _ = tx.send(FeedEvent::Failed(
                            err.with_kind(StoreErrorKind::Subscribe),
                        ));
                        break;
                    }
                }
            }
            debug!(session_id = %watched, "Subscription poller stopped");
        });

        debug!("Subscription registered");
        Ok(Subscription::new(id.clone(), rx))
    }

    #[instrument(skip(self))]
    async fn query_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        let status_key = status.as_ref().to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .with_connection(move |conn| {
                schema::sessions::table
                    .filter(schema::sessions::status.eq(status_key))
                    .order((
                        schema::sessions::created_at.desc(),
                        schema::sessions::id.asc(),
                    ))
                    .limit(limit)
                    .select(SessionRow::as_select())
                    .load(conn)
                    .map_err(|e| StoreError::from(e).with_kind(StoreErrorKind::Query))
            })
            .await?;
        debug!(count = rows.len(), "Queried sessions by status");
        rows.iter()
            .map(|row| {
                row.to_session()
                    .map_err(|e| e.with_kind(StoreErrorKind::Query))
            })
            .collect()
    }
}
