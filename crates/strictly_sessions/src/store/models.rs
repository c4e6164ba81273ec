//! Row mapping between [`Session`] documents and the `sessions` table.

use crate::error::StoreError;
use crate::session::Session;
use crate::store::schema;
use diesel::prelude::*;
use tracing::instrument;

/// One stored session.
///
/// The full document lives in `document` as JSON; `status`, `created_at`
/// and `version` are copied out so the database can filter, order and
/// compare without parsing it.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = schema::sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRow {
    id: String,
    status: String,
    created_at: i64,
    updated_at: i64,
    version: i64,
    document: String,
}

impl SessionRow {
    /// Serializes a session into a row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the document cannot be encoded or its
    /// version does not fit the column.
    #[instrument(skip(session), fields(session_id = %session.id()))]
    pub fn from_session(session: &Session) -> Result<Self, StoreError> {
        let version = i64::try_from(*session.version())
            .map_err(|_| StoreError::write(format!("Version {} overflows", session.version())))?;
        Ok(Self {
            id: session.id().as_str().to_string(),
            status: session.status().as_ref().to_string(),
            created_at: session.created_at().timestamp_micros(),
            updated_at: session.updated_at().timestamp_micros(),
            version,
            document: serde_json::to_string(session)
                .map_err(|e| StoreError::write(format!("Failed to encode session: {}", e)))?,
        })
    }

    /// Parses the stored document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the JSON is malformed.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn to_session(&self) -> Result<Session, StoreError> {
        Ok(serde_json::from_str(&self.document)?)
    }

    /// Document key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Document version as stored in the indexed column.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The revision entry recording this row's document.
    pub fn revision(&self) -> RevisionRow {
        RevisionRow {
            session_id: self.id.clone(),
            version: self.version,
            document: self.document.clone(),
        }
    }
}

/// One past version of a session document, kept for subscription replay.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = schema::session_revisions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RevisionRow {
    session_id: String,
    version: i64,
    document: String,
}

impl RevisionRow {
    /// Parses the recorded document.
    pub fn to_session(&self) -> Result<Session, StoreError> {
        Ok(serde_json::from_str(&self.document)?)
    }
}
