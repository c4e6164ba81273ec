//! Error types for session operations and the store adapter.

use crate::rules::MoveRejection;
use crate::session::{SessionId, SessionStatus};
use derive_more::{Display, Error};

/// Which store primitive failed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// Fetching a document failed.
    #[display("read")]
    Read,
    /// Writing a document failed.
    #[display("write")]
    Write,
    /// Running a query failed.
    #[display("query")]
    Query,
    /// A partial update targeted a document that does not exist.
    #[display("missing document")]
    Missing,
    /// A conditional write found a newer version than expected.
    #[display("version conflict")]
    Conflict,
    /// Establishing or feeding a subscription failed.
    #[display("subscribe")]
    Subscribe,
}

/// Store error with location tracking.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("Store {} error: {} at {}:{}", kind, message, file, line)]
pub struct StoreError {
    /// Failed primitive.
    pub kind: StoreErrorKind,
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl StoreError {
    /// Creates a new store error with caller location tracking.
    #[track_caller]
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// A read failure.
    #[track_caller]
    pub fn read(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Read, message)
    }

    /// A write failure.
    #[track_caller]
    pub fn write(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Write, message)
    }

    /// A query failure.
    #[track_caller]
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Query, message)
    }

    /// Returns a copy of this error reclassified as `kind`.
    pub fn with_kind(mut self, kind: StoreErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl From<diesel::result::Error> for StoreError {
    #[track_caller]
    fn from(err: diesel::result::Error) -> Self {
        Self::new(StoreErrorKind::Write, format!("Diesel error: {}", err))
    }
}

impl From<diesel::ConnectionError> for StoreError {
    #[track_caller]
    fn from(err: diesel::ConnectionError) -> Self {
        Self::new(StoreErrorKind::Read, format!("Connection error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::new(StoreErrorKind::Read, format!("Malformed session document: {}", err))
    }
}

/// Why a session operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SessionError {
    /// The referenced session does not exist.
    #[display("Session {id} not found")]
    NotFound {
        /// Requested id.
        id: SessionId,
    },
    /// The session is not in a state that allows the operation.
    #[display("Session {id} is {status}; operation not allowed")]
    InvalidState {
        /// Session id.
        id: SessionId,
        /// Status found in the store.
        status: SessionStatus,
    },
    /// Both seats are taken by other players.
    #[display("Session {id} already has two players")]
    Full {
        /// Session id.
        id: SessionId,
    },
    /// The move failed validation; nothing was written.
    #[display("Illegal move: {reason}")]
    IllegalMove {
        /// Specific rejection.
        reason: MoveRejection,
    },
    /// The stored session moved on since the caller's snapshot was taken.
    #[display("Session {id} changed since it was read; refresh and retry")]
    Stale {
        /// Session id.
        id: SessionId,
    },
    /// The underlying store call failed.
    #[display("{source}")]
    Store {
        /// Store failure.
        source: StoreError,
    },
}

impl From<StoreError> for SessionError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

impl From<MoveRejection> for SessionError {
    fn from(reason: MoveRejection) -> Self {
        Self::IllegalMove { reason }
    }
}
