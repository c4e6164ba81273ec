//! The persisted session document and partial updates to it.

use chrono::{DateTime, Utc};
use derive_getters::Getters;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strictly_tictactoe::{Board, Mark};
use tracing::instrument;

/// Unique identifier for a game session; the document key in the store.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque identifier for a player.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Lifecycle status of a session.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SessionStatus {
    /// Created, waiting for a second player.
    Waiting,
    /// Both seats filled (or solo); moves are accepted.
    InProgress,
    /// Won or drawn.
    Finished,
}

/// A shared tic-tac-toe game as stored in the document store.
///
/// Field names serialize in camelCase so the document matches what other
/// clients of the same store read and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Document key.
    id: SessionId,
    /// Nine cells, row-major.
    board: Board,
    /// Mark that moves next.
    current_turn: Mark,
    /// Owner of mark X, the creator.
    player_x: Option<PlayerId>,
    /// Owner of mark O, the joiner. Same as `player_x` in solo sessions.
    player_o: Option<PlayerId>,
    /// Set only when a winning line exists.
    winner: Option<Mark>,
    /// Lifecycle status.
    status: SessionStatus,
    /// Time of creation.
    created_at: DateTime<Utc>,
    /// Time of the most recent mutation.
    updated_at: DateTime<Utc>,
    /// One local player controls both marks.
    #[serde(default)]
    is_solo: bool,
    /// Write sequence number maintained by the store.
    #[serde(default)]
    version: u64,
}

impl Session {
    /// A two-player session waiting for an opponent.
    #[instrument(skip(id, creator), fields(session_id = %id, creator = %creator))]
    pub fn open(id: SessionId, creator: PlayerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            board: Board::new(),
            current_turn: Mark::X,
            player_x: Some(creator),
            player_o: None,
            winner: None,
            status: SessionStatus::Waiting,
            created_at: now,
            updated_at: now,
            is_solo: false,
            version: 0,
        }
    }

    /// A solo session where `creator` holds both marks. Starts in progress.
    #[instrument(skip(id, creator), fields(session_id = %id, creator = %creator))]
    pub fn solo(id: SessionId, creator: PlayerId, now: DateTime<Utc>) -> Self {
        Self {
            player_o: Some(creator.clone()),
            status: SessionStatus::InProgress,
            is_solo: true,
            ..Self::open(id, creator, now)
        }
    }

    /// Merges the fields present in `patch` into this document.
    ///
    /// The version is left alone; stores bump it with [`Session::bump_version`].
    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(board) = &patch.board {
            self.board = board.clone();
        }
        if let Some(turn) = patch.current_turn {
            self.current_turn = turn;
        }
        if let Some(player_o) = &patch.player_o {
            self.player_o = player_o.clone();
        }
        if let Some(winner) = patch.winner {
            self.winner = winner;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(updated_at) = patch.updated_at {
            self.updated_at = updated_at;
        }
    }

    /// Advances the write sequence number. Called by store backends on every
    /// successful write.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Returns a timestamp for the next write that never precedes
    /// `updated_at`, even if the local clock stepped backwards.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        Utc::now().max(self.updated_at)
    }
}

/// A partial update: only the fields that are `Some` are written.
///
/// `winner` is doubly optional so a patch can clear it (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    board: Option<Board>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_turn: Option<Mark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    player_o: Option<Option<PlayerId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    winner: Option<Option<Mark>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the board.
    pub fn board(mut self, board: Board) -> Self {
        self.board = Some(board);
        self
    }

    /// Writes the mark to move next.
    pub fn current_turn(mut self, mark: Mark) -> Self {
        self.current_turn = Some(mark);
        self
    }

    /// Writes the O seat.
    pub fn player_o(mut self, player: Option<PlayerId>) -> Self {
        self.player_o = Some(player);
        self
    }

    /// Writes the winner (or clears it with `None`).
    pub fn winner(mut self, winner: Option<Mark>) -> Self {
        self.winner = Some(winner);
        self
    }

    /// Writes the status.
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Writes the modification time.
    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Names of the document fields this patch writes, in document order.
    pub fn fields(&self) -> Vec<&'static str> {
        [
            ("board", self.board.is_some()),
            ("currentTurn", self.current_turn.is_some()),
            ("playerO", self.player_o.is_some()),
            ("winner", self.winner.is_some()),
            ("status", self.status.is_some()),
            ("updatedAt", self.updated_at.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }

    /// Returns `true` if the patch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }
}
