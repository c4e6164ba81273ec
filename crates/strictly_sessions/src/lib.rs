//! Live tic-tac-toe sessions synchronized through a document store.
//!
//! Two clients share one game by reading, writing and subscribing to the
//! same session document. This crate owns the rules for that sharing; the
//! board rules themselves come from `strictly_tictactoe`.
//!
//! # Architecture
//!
//! - **Store**: [`DocumentStore`] with [`MemoryStore`] and [`SqliteStore`] backends
//! - **Rules**: move validation and planning over a [`Session`] snapshot
//! - **Controller**: [`SessionController`] create / join / move / restart / subscribe / list
//! - **Identity**: [`IdentityProvider`] for the local player's stable id
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strictly_sessions::{MemoryStore, PlayerId, SessionController};
//!
//! # async fn example() -> Result<(), strictly_sessions::SessionError> {
//! let controller = SessionController::new(Arc::new(MemoryStore::new()));
//! let alice = PlayerId::from("alice");
//! let bob = PlayerId::from("bob");
//!
//! let id = controller.create_session(&alice).await?;
//! controller.join_session(&id, &bob).await?;
//!
//! let snapshot = controller.fetch_session(&id).await?;
//! controller.apply_move(&id, &snapshot, &alice, 4).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod controller;
mod error;
mod identity;
mod ids;
mod rules;
mod session;
mod store;

// Crate-level exports - Configuration
pub use config::{ConfigError, DATABASE_URL_ENV, SessionsConfig, StoreBackend};

// Crate-level exports - Controller
pub use controller::{DEFAULT_OPEN_SESSIONS, JoinOutcome, SessionController, SubscriptionHandle};

// Crate-level exports - Errors
pub use error::{SessionError, StoreError, StoreErrorKind};

// Crate-level exports - Identity
pub use identity::{FileIdentity, FixedIdentity, IdentityError, IdentityProvider};
pub use ids::{format_session_id, generate_display_name, generate_player_id, generate_session_id};

// Crate-level exports - Rules
pub use rules::{MoveRejection, can_move, check_move, is_player_in_game, plan_move, player_mark};

// Crate-level exports - Session model
pub use session::{PlayerId, Session, SessionId, SessionPatch, SessionStatus};

// Crate-level exports - Store
pub use store::{DocumentStore, FeedEvent, MemoryStore, SqliteStore, Subscription};

// Board types used throughout the public API
pub use strictly_tictactoe::{Board, Mark, Position, Square};
