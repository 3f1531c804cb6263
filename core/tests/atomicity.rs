//! A unit of work that fails after the ledger row is appended leaves no
//! trace, and the retry credits exactly once.

use chase_core::{
    catalog::ActionType,
    engine::PointsEngine,
    error::LedgerError,
    store::{LedgerReader, LedgerStore},
};
use rusqlite::{params, Connection};
use tempfile::TempDir;

/// An engine on a file database plus a second, raw connection to the same
/// file for tampering with rows behind the engine's back.
fn build_file_engine() -> (TempDir, PointsEngine, Connection) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.db");
    let path = path.to_str().expect("utf-8 path");
    let store = LedgerStore::open(path).expect("open store");
    store.migrate().expect("migration");
    let (engine, _clock) = PointsEngine::build_test_on(store).expect("test engine");
    let raw = Connection::open(path).expect("raw connection");
    raw.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
    (dir, engine, raw)
}

fn shift_balance(raw: &Connection, user_id: &str, delta: i64) {
    raw.execute(
        "UPDATE users SET balance = balance + ?2 WHERE user_id = ?1",
        params![user_id, delta],
    )
    .unwrap();
}

#[test]
fn invariant_failure_after_append_rolls_back_everything() {
    let (_dir, engine, raw) = build_file_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    let events_before = engine.store.events_for_user(&user.user_id).unwrap().len();

    // The ledger row is appended before the balance check runs.
    shift_balance(&raw, &user.user_id, 7);
    let err = engine.join_contest(&user.user_id).unwrap_err();
    match &err {
        LedgerError::InvariantViolation { balance, ledger_sum, .. } => {
            assert_eq!(*balance, 307);
            assert_eq!(*ledger_sum, 300);
        }
        other => panic!("expected an invariant violation, got {other}"),
    }
    assert!(!err.is_transient());

    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ContestJoin).unwrap(), 0);
    assert_eq!(engine.store.user(&user.user_id).unwrap().unwrap().balance, 107);
    assert_eq!(engine.store.events_for_user(&user.user_id).unwrap().len(), events_before);

    shift_balance(&raw, &user.user_id, -7);
    let retry = engine.join_contest(&user.user_id).unwrap();
    assert!(retry.credited);
    assert_eq!(retry.new_balance, 300);
    assert!(!engine.join_contest(&user.user_id).unwrap().credited);

    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ContestJoin).unwrap(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 300);
    assert_eq!(engine.store.events_for_user(&user.user_id).unwrap().len(), events_before + 1);
}

#[test]
fn outbox_failure_after_append_is_transient_and_retry_credits_once() {
    let (_dir, engine, raw) = build_file_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();

    // Ledger row and balance succeed; the event insert is the last write.
    raw.execute_batch("DROP TABLE event_log;").unwrap();
    let err = engine
        .award(&user.user_id, ActionType::Purchase, Some("cs_1"))
        .unwrap_err();
    assert!(err.is_transient(), "got {err}");

    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::Purchase).unwrap(), 0);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 100);

    engine.store.migrate().unwrap();
    let retry = engine.award(&user.user_id, ActionType::Purchase, Some("cs_1")).unwrap();
    assert!(retry.credited);
    assert_eq!(retry.new_balance, 600);
    assert!(!engine.award(&user.user_id, ActionType::Purchase, Some("cs_1")).unwrap().credited);

    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::Purchase).unwrap(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 600);
    // The recreated outbox holds only the retry's credit.
    assert_eq!(engine.store.events_for_user(&user.user_id).unwrap().len(), 1);
}
