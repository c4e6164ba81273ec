//! Tests for session controller operations against the in-memory store.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strictly_sessions::{
    Board, DocumentStore, JoinOutcome, Mark, MemoryStore, MoveRejection, PlayerId, Session,
    SessionController, SessionError, SessionId, SessionPatch, SessionStatus, StoreError,
    StoreErrorKind, Subscription, can_move,
};
use strictly_tictactoe::{check_winner, is_draw};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn setup() -> (MemoryStore, SessionController) {
    let store = MemoryStore::new();
    let controller = SessionController::new(Arc::new(store.clone()));
    (store, controller)
}

fn p1() -> PlayerId {
    PlayerId::from("p1")
}

fn p2() -> PlayerId {
    PlayerId::from("p2")
}

/// Creates a two-player game between p1 (X) and p2 (O), then overwrites the
/// board and turn.
async fn game_with_board(
    store: &MemoryStore,
    controller: &SessionController,
    board: [Option<Mark>; 9],
    turn: Mark,
) -> SessionId {
    let id = controller.create_session(&p1()).await.expect("Create failed");
    controller.join_session(&id, &p2()).await.expect("Join failed");
    store
        .update(
            &id,
            &SessionPatch::new().board(Board::from(board)).current_turn(turn),
            None,
        )
        .await
        .expect("Board setup failed");
    id
}

#[tokio::test]
async fn test_happy_path() {
    let (_store, controller) = setup();

    let id = controller.create_session(&p1()).await.expect("Create failed");
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.status(), SessionStatus::Waiting);
    assert_eq!(*session.board(), Board::new());
    assert_eq!(*session.current_turn(), Mark::X);
    assert_eq!(*session.player_x(), Some(p1()));
    assert_eq!(*session.player_o(), None);
    assert!(!*session.is_solo());

    let outcome = controller.join_session(&id, &p2()).await.expect("Join failed");
    assert_eq!(outcome, JoinOutcome::Joined);
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.status(), SessionStatus::InProgress);
    assert_eq!(*session.player_o(), Some(p2()));

    let session = controller
        .apply_move(&id, &session, &p1(), 4)
        .await
        .expect("Move failed");
    assert_eq!(session.board().squares()[4].mark(), Some(Mark::X));
    assert_eq!(*session.current_turn(), Mark::O);
    assert_eq!(*session.status(), SessionStatus::InProgress);

    let session = controller
        .apply_move(&id, &session, &p2(), 0)
        .await
        .expect("Move failed");
    assert_eq!(session.board().squares()[0].mark(), Some(Mark::O));
    assert_eq!(*session.current_turn(), Mark::X);

    let stored = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(stored, session);
    assert!(stored.updated_at() >= stored.created_at());
}

#[tokio::test]
async fn test_winning_move_finishes_game() {
    let (store, controller) = setup();
    let x = Some(Mark::X);
    let o = Some(Mark::O);
    let id = game_with_board(
        &store,
        &controller,
        [x, x, None, o, o, None, None, None, None],
        Mark::X,
    )
    .await;

    let snapshot = controller.fetch_session(&id).await.expect("Fetch failed");
    let session = controller
        .apply_move(&id, &snapshot, &p1(), 2)
        .await
        .expect("Move failed");

    assert_eq!(session.board().squares()[2].mark(), Some(Mark::X));
    assert_eq!(check_winner(session.board()), Some(Mark::X));
    assert_eq!(*session.status(), SessionStatus::Finished);
    assert_eq!(*session.winner(), Some(Mark::X));
    for cell in 0..9 {
        assert!(!can_move(&session, &p2(), cell));
    }
}

#[tokio::test]
async fn test_filling_last_cell_without_line_is_draw() {
    let (store, controller) = setup();
    let x = Some(Mark::X);
    let o = Some(Mark::O);
    let id = game_with_board(&store, &controller, [x, o, x, x, o, o, o, x, None], Mark::X).await;

    let snapshot = controller.fetch_session(&id).await.expect("Fetch failed");
    let session = controller
        .apply_move(&id, &snapshot, &p1(), 8)
        .await
        .expect("Move failed");

    assert_eq!(check_winner(session.board()), None);
    assert!(is_draw(session.board()));
    assert_eq!(*session.status(), SessionStatus::Finished);
    assert_eq!(*session.winner(), None);
}

#[tokio::test]
async fn test_occupied_cell_rejected_without_write() {
    let (store, controller) = setup();
    let id = game_with_board(
        &store,
        &controller,
        [None, None, None, Some(Mark::X), None, None, None, None, None],
        Mark::O,
    )
    .await;
    let snapshot = controller.fetch_session(&id).await.expect("Fetch failed");
    let writes = store.write_count();

    let result = controller.apply_move(&id, &snapshot, &p2(), 3).await;
    assert_eq!(
        result,
        Err(SessionError::IllegalMove {
            reason: MoveRejection::CellOccupied { cell: 3 }
        })
    );
    assert_eq!(store.write_count(), writes);
    let stored = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(stored.board(), snapshot.board());
}

#[tokio::test]
async fn test_out_of_turn_and_waiting_moves_rejected() {
    let (store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    let waiting = controller.fetch_session(&id).await.expect("Fetch failed");
    let result = controller.apply_move(&id, &waiting, &p1(), 0).await;
    assert_eq!(
        result,
        Err(SessionError::IllegalMove {
            reason: MoveRejection::NotInProgress {
                status: SessionStatus::Waiting
            }
        })
    );

    controller.join_session(&id, &p2()).await.expect("Join failed");
    let snapshot = controller.fetch_session(&id).await.expect("Fetch failed");
    let writes = store.write_count();
    let result = controller.apply_move(&id, &snapshot, &p2(), 0).await;
    assert_eq!(
        result,
        Err(SessionError::IllegalMove {
            reason: MoveRejection::NotYourTurn { to_move: Mark::X }
        })
    );
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_stale_snapshot_rejected() {
    let (store, controller) = setup();
    let id = game_with_board(&store, &controller, [None; 9], Mark::X).await;
    let stale = controller.fetch_session(&id).await.expect("Fetch failed");

    controller
        .apply_move(&id, &stale, &p1(), 4)
        .await
        .expect("First move failed");
    let after_first = controller.fetch_session(&id).await.expect("Fetch failed");

    // The old snapshot still shows cell 0 free and X to move.
    let result = controller.apply_move(&id, &stale, &p1(), 0).await;
    assert_eq!(result, Err(SessionError::Stale { id: id.clone() }));
    assert_eq!(
        controller.fetch_session(&id).await.expect("Fetch failed"),
        after_first
    );
}

#[tokio::test]
async fn test_join_is_idempotent_for_seated_player() {
    let (store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    assert_eq!(
        controller.join_session(&id, &p2()).await,
        Ok(JoinOutcome::Joined)
    );
    let writes = store.write_count();

    assert_eq!(
        controller.join_session(&id, &p2()).await,
        Ok(JoinOutcome::Rejoined)
    );
    assert_eq!(
        controller.join_session(&id, &p1()).await,
        Ok(JoinOutcome::Rejoined)
    );
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn test_third_player_cannot_join_full_game() {
    let (store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    controller.join_session(&id, &p2()).await.expect("Join failed");
    let before = controller.fetch_session(&id).await.expect("Fetch failed");
    let writes = store.write_count();

    let result = controller.join_session(&id, &PlayerId::from("p3")).await;
    assert_eq!(result, Err(SessionError::Full { id: id.clone() }));
    assert_eq!(store.write_count(), writes);
    assert_eq!(
        controller.fetch_session(&id).await.expect("Fetch failed"),
        before
    );
}

#[tokio::test]
async fn test_join_non_waiting_session_without_opponent_is_invalid_state() {
    let (store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    store
        .update(
            &id,
            &SessionPatch::new().status(SessionStatus::Finished),
            None,
        )
        .await
        .expect("Setup failed");

    let result = controller.join_session(&id, &p2()).await;
    assert_eq!(
        result,
        Err(SessionError::InvalidState {
            id: id.clone(),
            status: SessionStatus::Finished
        })
    );
}

#[tokio::test]
async fn test_join_unknown_session() {
    let (_store, controller) = setup();
    let id = SessionId::from("nope00");
    assert_eq!(
        controller.join_session(&id, &p1()).await,
        Err(SessionError::NotFound { id: id.clone() })
    );
    assert_eq!(
        controller.restart_session(&id).await,
        Err(SessionError::NotFound { id })
    );
}

#[tokio::test]
async fn test_solo_session_plays_both_marks() {
    let (_store, controller) = setup();
    let id = controller
        .create_solo_session(&p1())
        .await
        .expect("Create failed");
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.status(), SessionStatus::InProgress);
    assert_eq!(*session.player_x(), Some(p1()));
    assert_eq!(*session.player_o(), Some(p1()));
    assert!(*session.is_solo());

    let session = controller
        .apply_move(&id, &session, &p1(), 0)
        .await
        .expect("X move failed");
    let session = controller
        .apply_move(&id, &session, &p1(), 4)
        .await
        .expect("O move failed");
    assert_eq!(session.board().squares()[4].mark(), Some(Mark::O));
    assert_eq!(*session.current_turn(), Mark::X);
}

#[tokio::test]
async fn test_restart_resets_board_and_keeps_players() {
    let (store, controller) = setup();
    let x = Some(Mark::X);
    let o = Some(Mark::O);
    let id = game_with_board(
        &store,
        &controller,
        [x, x, None, o, o, None, None, None, None],
        Mark::X,
    )
    .await;
    let snapshot = controller.fetch_session(&id).await.expect("Fetch failed");
    controller
        .apply_move(&id, &snapshot, &p1(), 2)
        .await
        .expect("Winning move failed");

    controller.restart_session(&id).await.expect("Restart failed");
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.board(), Board::new());
    assert_eq!(*session.current_turn(), Mark::X);
    assert_eq!(*session.winner(), None);
    assert_eq!(*session.status(), SessionStatus::InProgress);
    assert_eq!(*session.player_x(), Some(p1()));
    assert_eq!(*session.player_o(), Some(p2()));
}

#[tokio::test]
async fn test_restart_waiting_session_starts_play() {
    let (_store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");

    controller.restart_session(&id).await.expect("Restart failed");
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.status(), SessionStatus::InProgress);
    assert_eq!(*session.board(), Board::new());
    assert_eq!(*session.current_turn(), Mark::X);
    assert_eq!(*session.player_x(), Some(p1()));
    assert_eq!(*session.player_o(), None);
}

#[tokio::test]
async fn test_create_if_absent_keeps_existing_document() {
    let (store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    let original = controller.fetch_session(&id).await.expect("Fetch failed");
    let writes = store.write_count();

    let intruder = Session::open(id.clone(), p2(), chrono::Utc::now());
    let err = store.create(intruder).await.expect_err("Duplicate id should fail");
    assert_eq!(err.kind, StoreErrorKind::Conflict);
    assert_eq!(store.write_count(), writes);
    assert_eq!(
        controller.fetch_session(&id).await.expect("Fetch failed"),
        original
    );
}

/// Store that reports the first few created ids as already taken.
struct TakenIds {
    inner: MemoryStore,
    collisions: AtomicUsize,
}

#[async_trait]
impl DocumentStore for TakenIds {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.get(id).await
    }

    async fn set(&self, session: Session) -> Result<Session, StoreError> {
        self.inner.set(session).await
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        let remaining = self.collisions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.collisions.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::new(StoreErrorKind::Conflict, "id taken"));
        }
        self.inner.create(session).await
    }

    async fn update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        expected_version: Option<u64>,
    ) -> Result<Session, StoreError> {
        self.inner.update(id, patch, expected_version).await
    }

    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        self.inner.subscribe(id).await
    }

    async fn query_by_status(
        &self,
        status: SessionStatus,
        limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        self.inner.query_by_status(status, limit).await
    }
}

#[tokio::test]
async fn test_create_redraws_taken_ids() {
    let inner = MemoryStore::new();
    let controller = SessionController::new(Arc::new(TakenIds {
        inner: inner.clone(),
        collisions: AtomicUsize::new(2),
    }));

    let id = controller.create_session(&p1()).await.expect("Create failed");
    assert_eq!(inner.write_count(), 1);
    let session = controller.fetch_session(&id).await.expect("Fetch failed");
    assert_eq!(*session.player_x(), Some(p1()));
}

#[tokio::test]
async fn test_create_gives_up_when_every_id_is_taken() {
    let inner = MemoryStore::new();
    let controller = SessionController::new(Arc::new(TakenIds {
        inner: inner.clone(),
        collisions: AtomicUsize::new(usize::MAX),
    }));

    let result = controller.create_session(&p1()).await;
    assert!(matches!(result, Err(SessionError::Store { .. })));
    assert_eq!(inner.write_count(), 0);
}

#[tokio::test]
async fn test_list_open_sessions_newest_first_and_bounded() {
    let (_store, controller) = setup();
    let mut created = Vec::new();
    for _ in 0..7 {
        created.push(controller.create_session(&p1()).await.expect("Create failed"));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // Joined sessions are no longer open.
    controller
        .join_session(&created[6], &p2())
        .await
        .expect("Join failed");

    let open = controller.list_open_sessions(5).await;
    let ids: Vec<_> = open.iter().map(|s| s.id().clone()).collect();
    let expected: Vec<_> = created[1..6].iter().rev().cloned().collect();
    assert_eq!(ids, expected);
    assert!(open.iter().all(|s| *s.status() == SessionStatus::Waiting));
}

/// Store whose queries always fail; everything else goes to memory.
struct BrokenQueries(MemoryStore);

#[async_trait]
impl DocumentStore for BrokenQueries {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        self.0.get(id).await
    }

    async fn set(&self, session: Session) -> Result<Session, StoreError> {
        self.0.set(session).await
    }

    async fn create(&self, session: Session) -> Result<Session, StoreError> {
        self.0.create(session).await
    }

    async fn update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        expected_version: Option<u64>,
    ) -> Result<Session, StoreError> {
        self.0.update(id, patch, expected_version).await
    }

    async fn subscribe(&self, id: &SessionId) -> Result<Subscription, StoreError> {
        self.0.subscribe(id).await
    }

    async fn query_by_status(
        &self,
        _status: SessionStatus,
        _limit: usize,
    ) -> Result<Vec<Session>, StoreError> {
        Err(StoreError::query("index unavailable"))
    }
}

#[tokio::test]
async fn test_list_open_sessions_degrades_to_empty() {
    let controller = SessionController::new(Arc::new(BrokenQueries(MemoryStore::new())));
    controller.create_session(&p1()).await.expect("Create failed");
    assert!(controller.list_open_sessions(5).await.is_empty());
}

enum Seen {
    Update(Session),
    Error(SessionError),
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("No event within timeout")
        .expect("Feed closed")
}

async fn subscribe(
    controller: &SessionController,
    id: &SessionId,
) -> (strictly_sessions::SubscriptionHandle, mpsc::UnboundedReceiver<Seen>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let err_tx = tx.clone();
    let handle = controller
        .subscribe_session(
            id,
            move |session| {
                let _ = tx.send(Seen::Update(session));
            },
            move |err| {
                let _ = err_tx.send(Seen::Error(err));
            },
        )
        .await
        .expect("Subscribe failed");
    (handle, rx)
}

#[tokio::test]
async fn test_subscription_delivers_initial_state_and_changes_in_order() {
    let (_store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    let (handle, mut rx) = subscribe(&controller, &id).await;

    match next_seen(&mut rx).await {
        Seen::Update(s) => assert_eq!(*s.status(), SessionStatus::Waiting),
        Seen::Error(e) => panic!("Unexpected error: {e}"),
    }

    controller.join_session(&id, &p2()).await.expect("Join failed");
    let joined = match next_seen(&mut rx).await {
        Seen::Update(s) => s,
        Seen::Error(e) => panic!("Unexpected error: {e}"),
    };
    assert_eq!(*joined.status(), SessionStatus::InProgress);

    controller
        .apply_move(&id, &joined, &p1(), 4)
        .await
        .expect("Move failed");
    match next_seen(&mut rx).await {
        Seen::Update(s) => {
            assert_eq!(s.board().squares()[4].mark(), Some(Mark::X));
            assert!(s.version() > joined.version());
        }
        Seen::Error(e) => panic!("Unexpected error: {e}"),
    }

    handle.cancel();
    assert!(handle.is_cancelled());
}

#[tokio::test]
async fn test_subscription_reports_missing_and_removed_documents() {
    let (store, controller) = setup();

    let ghost = SessionId::from("ghost0");
    let (_ghost_handle, mut ghost_rx) = subscribe(&controller, &ghost).await;
    match next_seen(&mut ghost_rx).await {
        Seen::Error(SessionError::NotFound { id }) => assert_eq!(id, ghost),
        _ => panic!("Expected NotFound for absent session"),
    }

    let id = controller.create_session(&p1()).await.expect("Create failed");
    let (_handle, mut rx) = subscribe(&controller, &id).await;
    assert!(matches!(next_seen(&mut rx).await, Seen::Update(_)));

    assert!(store.remove(&id).await);
    match next_seen(&mut rx).await {
        Seen::Error(SessionError::NotFound { id: missing }) => assert_eq!(missing, id),
        _ => panic!("Expected NotFound after removal"),
    }
}

#[tokio::test]
async fn test_cancelled_subscription_delivers_nothing_more() {
    let (_store, controller) = setup();
    let id = controller.create_session(&p1()).await.expect("Create failed");
    let (handle, mut rx) = subscribe(&controller, &id).await;
    assert!(matches!(next_seen(&mut rx).await, Seen::Update(_)));

    handle.cancel();
    controller.join_session(&id, &p2()).await.expect("Join failed");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(rx.try_recv().is_err());
    assert!(handle.is_finished());
}
