//! Move validation and move planning against a session snapshot.
//!
//! These are pure functions: they read a [`Session`] and never touch the
//! store, so every rejection happens before a write is attempted.

use crate::session::{PlayerId, Session, SessionPatch, SessionStatus};
use chrono::{DateTime, Utc};
use derive_more::{Display, Error};
use strictly_tictactoe::{Mark, Position, Square, check_winner, is_full};
use tracing::{debug, instrument};

/// Specific reason a move was refused.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    /// The session is waiting for a player or already finished.
    #[display("game is {status}, not in progress")]
    NotInProgress {
        /// Status at the time of the attempt.
        status: SessionStatus,
    },
    /// The cell index is not on the board.
    #[display("cell {cell} is off the board")]
    OutOfBounds {
        /// Requested cell index.
        cell: usize,
    },
    /// The cell already holds a mark.
    #[display("cell {cell} is already taken")]
    CellOccupied {
        /// Requested cell index.
        cell: usize,
    },
    /// The mover does not own the mark whose turn it is.
    #[display("it is {to_move}'s turn")]
    NotYourTurn {
        /// Mark that moves next.
        to_move: Mark,
    },
}

/// Mark owned by `player` in `session`: X when they created it, O when they
/// joined it. Solo sessions report X.
pub fn player_mark(session: &Session, player: &PlayerId) -> Option<Mark> {
    if session.player_x().as_ref() == Some(player) {
        Some(Mark::X)
    } else if session.player_o().as_ref() == Some(player) {
        Some(Mark::O)
    } else {
        None
    }
}

/// Returns `true` if `player` holds either seat.
pub fn is_player_in_game(session: &Session, player: &PlayerId) -> bool {
    player_mark(session, player).is_some()
}

/// Checks whether `player` may place a mark at `cell`.
///
/// Rejections are reported in a fixed precedence: status, bounds,
/// occupancy, then turn ownership. Solo sessions skip the turn check.
#[instrument(skip(session), fields(session_id = %session.id(), player = %player))]
pub fn check_move(session: &Session, player: &PlayerId, cell: usize) -> Result<Position, MoveRejection> {
    if *session.status() != SessionStatus::InProgress {
        return Err(MoveRejection::NotInProgress {
            status: *session.status(),
        });
    }

    let pos = Position::from_index(cell).ok_or(MoveRejection::OutOfBounds { cell })?;
    if !session.board().is_empty(pos) {
        return Err(MoveRejection::CellOccupied { cell });
    }

    if !*session.is_solo() && player_mark(session, player) != Some(*session.current_turn()) {
        return Err(MoveRejection::NotYourTurn {
            to_move: *session.current_turn(),
        });
    }

    Ok(pos)
}

/// Boolean form of [`check_move`].
pub fn can_move(session: &Session, player: &PlayerId, cell: usize) -> bool {
    check_move(session, player, cell).is_ok()
}

/// Computes the write for an accepted move.
///
/// The patch always carries `board`, `currentTurn` and `updatedAt`; `winner`
/// and `status` are only included when this move ends the game.
#[instrument(skip(session), fields(session_id = %session.id(), player = %player))]
pub fn plan_move(
    session: &Session,
    player: &PlayerId,
    cell: usize,
    now: DateTime<Utc>,
) -> Result<SessionPatch, MoveRejection> {
    let pos = check_move(session, player, cell)?;
    let mover = *session.current_turn();

    let mut board = session.board().clone();
    board.set(pos, Square::Occupied(mover));

    let winner = check_winner(&board);
    let finished = winner.is_some() || is_full(&board);
    debug!(?mover, cell, ?winner, finished, "Planned move");

    let mut patch = SessionPatch::new()
        .board(board)
        .current_turn(mover.opponent())
        .updated_at(now);
    if finished {
        patch = patch.winner(winner).status(SessionStatus::Finished);
    }
    Ok(patch)
}
