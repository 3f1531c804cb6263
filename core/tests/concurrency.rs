//! Racing workers against one database file.
//!
//! Every worker gets its own engine (own connection) via `reopen()`, the
//! way parallel request handlers would.

use chase_core::{
    catalog::{ActionType, Platform},
    engine::PointsEngine,
    payment::{PaymentCompleted, ReferralOutcome},
    store::{LedgerReader, LedgerStore},
};
use std::{
    sync::{Arc, Barrier},
    thread,
};
use tempfile::TempDir;

const WORKERS: usize = 8;

fn build_file_engine() -> (TempDir, PointsEngine) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.db");
    let store = LedgerStore::open(path.to_str().expect("utf-8 path")).expect("open store");
    store.migrate().expect("migration");
    let (engine, _clock) = PointsEngine::build_test_on(store).expect("test engine");
    (dir, engine)
}

/// Run `work` on `WORKERS` threads, each with its own engine, released
/// together by a barrier.
fn race<T, F>(engine: &PointsEngine, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&PointsEngine) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WORKERS));
    let work = Arc::new(work);
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let worker = engine.reopen().expect("reopen");
            let barrier = Arc::clone(&barrier);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                barrier.wait();
                work(&worker)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().expect("worker panicked")).collect()
}

#[test]
fn concurrent_purchase_credits_once() {
    let (_dir, engine) = build_file_engine();
    let user = engine.get_or_create_user("buyer@example.com").unwrap();
    let user_id = user.user_id.clone();

    let outcomes = race(&engine, move |e| {
        e.award(&user_id, ActionType::Purchase, Some("cs_race")).expect("award")
    });

    assert_eq!(outcomes.iter().filter(|o| o.credited).count(), 1);
    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::Purchase).unwrap(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 500);
}

#[test]
fn concurrent_daily_shares_credit_once() {
    let (_dir, engine) = build_file_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();
    let user_id = user.user_id.clone();

    let outcomes = race(&engine, move |e| {
        e.record_share(&user_id, Platform::Facebook).expect("share")
    });

    assert_eq!(outcomes.iter().filter(|o| o.credited).count(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 100);
}

#[test]
fn concurrent_claims_catch_once() {
    let (_dir, engine) = build_file_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.join_contest(&user.user_id).unwrap(); // 300, target 250
    let user_id = user.user_id.clone();

    let outcomes = race(&engine, move |e| e.claim(&user_id, 1).expect("claim"));

    assert_eq!(outcomes.iter().filter(|o| o.caught()).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.stale()).count(), WORKERS - 1);
    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ProgressionBonus).unwrap(), 1);
    assert_eq!(engine.status(&user.user_id).unwrap().sequence, 2);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 350);
}

#[test]
fn concurrent_first_interactions_create_one_user() {
    let (_dir, engine) = build_file_engine();

    let users = race(&engine, |e| e.get_or_create_user("New.Reader@example.com").expect("get or create"));

    let first = &users[0].user_id;
    assert!(users.iter().all(|u| &u.user_id == first));
    assert_eq!(engine.store.user_ids().unwrap().len(), 1);
}

#[test]
fn concurrent_webhook_replays_pay_one_commission() {
    let (_dir, engine) = build_file_engine();
    let (referrer, _) = engine.enroll("author@example.com").unwrap();
    let event = PaymentCompleted {
        session_id:    "cs_webhook".to_string(),
        buyer_email:   "buyer@example.com".to_string(),
        referral_code: Some(referrer.referral_code.clone()),
        paid:          true,
        amount_cents:  Some(1500),
    };

    let receipts = race(&engine, move |e| e.on_payment_completed(&event).expect("payment"));

    let credited = receipts
        .iter()
        .filter(|r| matches!(r.referral, ReferralOutcome::Credited { .. }))
        .count();
    assert_eq!(credited, 1);
    assert_eq!(engine.referral_commissions(&referrer.user_id).unwrap().len(), 1);
    assert_eq!(engine.commission_total_cents(&referrer.user_id).unwrap(), 300);
    engine.audit_all().unwrap();
}

#[test]
fn composite_unlocks_once_under_racing_prerequisites() {
    let (_dir, engine) = build_file_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();
    engine.award(&user.user_id, ActionType::Purchase, Some("cs_1")).unwrap();
    engine.record_share(&user.user_id, Platform::Facebook).unwrap();
    let user_id = user.user_id.clone();

    // Half the workers share on X, half on Instagram.
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let worker = engine.reopen().expect("reopen");
            let barrier = Arc::clone(&barrier);
            let user_id = user_id.clone();
            thread::spawn(move || {
                let platform = if i % 2 == 0 { Platform::X } else { Platform::Instagram };
                barrier.wait();
                worker.record_share(&user_id, platform).expect("share")
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().expect("worker panicked")).collect();

    assert_eq!(outcomes.iter().filter(|o| o.credited).count(), 2);
    assert_eq!(outcomes.iter().filter(|o| o.composite_unlocked).count(), 1);
    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::CompositeBonus).unwrap(), 1);
    engine.audit_user(&user.user_id).unwrap();
}
