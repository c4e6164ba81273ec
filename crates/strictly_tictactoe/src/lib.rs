//! Pure tic-tac-toe board logic.
//!
//! Everything here is side-effect free: a [`Board`] of nine [`Square`]s,
//! named [`Position`]s, and the rules that decide wins and draws. Session
//! handling and persistence live in `strictly_sessions`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod position;
pub mod rules;
mod types;

pub use position::Position;
pub use rules::{WINNING_LINES, check_winner, is_draw, is_full, winning_line};
pub use types::{Board, Mark, Square};
