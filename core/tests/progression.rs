//! "Chase the target": claim validation, stale detection and target growth.

use chase_core::{
    award::{AwardEngine, AwardRequest},
    catalog::{ActionCatalog, ActionType, Platform},
    clock::ManualClock,
    engine::PointsEngine,
    error::LedgerError,
    progression::{ClaimOutcome, ProgressStatus},
    store::LedgerReader,
};

fn build_engine() -> PointsEngine {
    build_engine_with_clock().0
}

fn build_engine_with_clock() -> (PointsEngine, ManualClock) {
    let _ = env_logger::builder().is_test(true).try_init();
    PointsEngine::build_test().expect("test engine")
}

#[test]
fn new_users_start_chasing() {
    let engine = build_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();

    let status = engine.status(&user.user_id).unwrap();
    assert_eq!(
        status,
        ProgressStatus { balance: 0, target: 250, sequence: 1, next_rank_threshold: 1000 }
    );
}

#[test]
fn claim_below_target_is_not_yet_eligible() {
    let engine = build_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();

    let outcome = engine.claim(&user.user_id, 1).unwrap();
    assert_eq!(outcome, ClaimOutcome::NotYetEligible { balance: 100, target: 250, sequence: 1 });

    // Nothing moved.
    let status = engine.status(&user.user_id).unwrap();
    assert_eq!((status.balance, status.target, status.sequence), (100, 250, 1));
    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ProgressionBonus).unwrap(), 0);
}

#[test]
fn catching_the_target_pays_and_moves_it() {
    let engine = build_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.join_contest(&user.user_id).unwrap(); // 300

    let outcome = engine.claim(&user.user_id, 1).unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Caught { bonus: 50, new_balance: 350, new_target: 650, new_sequence: 2 }
    );

    let status = engine.status(&user.user_id).unwrap();
    assert_eq!(status.sequence, 2);
    assert_eq!(status.target, 650);
    assert!(status.target > status.balance);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 350);
}

#[test]
fn replayed_claim_is_stale() {
    let engine = build_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.join_contest(&user.user_id).unwrap();

    assert!(engine.claim(&user.user_id, 1).unwrap().caught());

    let replay = engine.claim(&user.user_id, 1).unwrap();
    assert_eq!(replay, ClaimOutcome::Stale { current_sequence: 2 });
    assert!(replay.to_response().stale);

    let ahead = engine.claim(&user.user_id, 7).unwrap();
    assert!(ahead.stale());

    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ProgressionBonus).unwrap(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 350);
}

#[test]
fn target_never_overshoots_the_next_rank() {
    let engine = build_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();
    engine.award(&user.user_id, ActionType::Purchase, Some("cs_1")).unwrap();
    engine.join_contest(&user.user_id).unwrap(); // 700

    let outcome = engine.claim(&user.user_id, 1).unwrap();
    // 750 after the bonus; 750 + 300 would pass rank 1000.
    assert_eq!(
        outcome,
        ClaimOutcome::Caught { bonus: 50, new_balance: 750, new_target: 1000, new_sequence: 2 }
    );
}

#[test]
fn repeated_catches_widen_the_gap_up_to_the_cap() {
    let engine = build_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();

    let mut sequence = 1;
    for n in 0..8 {
        let status = engine.status(&user.user_id).unwrap();
        assert_eq!(status.sequence, sequence);
        assert!(status.target > status.balance, "cycle {n}: {status:?}");
        assert!(status.target <= status.next_rank_threshold);

        engine
            .award(&user.user_id, ActionType::Purchase, Some(&format!("cs_{n}")))
            .unwrap();
        match engine.claim(&user.user_id, sequence).unwrap() {
            ClaimOutcome::Caught { new_balance, new_target, new_sequence, .. } => {
                assert!(new_target > new_balance);
                assert!(new_target - new_balance <= 500);
                sequence = new_sequence;
            }
            other => panic!("cycle {n}: expected a catch, got {other:?}"),
        }
    }

    let bonuses = engine.store.list_by_user(&user.user_id, Some(ActionType::ProgressionBonus)).unwrap();
    let keys: Vec<_> = bonuses.iter().map(|e| e.scope_key.clone()).collect();
    assert_eq!(keys, (1..=8).map(|s| format!("cycle:{s}")).collect::<Vec<_>>());
    engine.audit_user(&user.user_id).unwrap();
}

#[test]
fn claim_for_unknown_user_is_not_found() {
    let engine = build_engine();
    let err = engine.claim("nobody", 1).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));
}

#[test]
fn claim_response_is_flat_camel_case() {
    let engine = build_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.record_share(&user.user_id, Platform::Facebook).unwrap();
    engine.record_share(&user.user_id, Platform::Instagram).unwrap();

    let json = serde_json::to_value(engine.claim(&user.user_id, 1).unwrap().to_response()).unwrap();
    assert_eq!(json["caught"], true);
    assert_eq!(json["stale"], false);
    assert_eq!(json["newBalance"], 350);
    assert_eq!(json["newSequence"], 2);
}

#[test]
fn direct_bonus_request_is_rejected_and_the_cycle_stays_catchable() {
    let engine = build_engine();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.join_contest(&user.user_id).unwrap(); // 300, target 250

    let err = engine.award(&user.user_id, ActionType::ProgressionBonus, None).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAction { .. }));
    assert_eq!(engine.status(&user.user_id).unwrap().balance, 300);

    let outcome = engine.claim(&user.user_id, 1).unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Caught { bonus: 50, new_balance: 350, new_target: 650, new_sequence: 2 }
    );
}

#[test]
fn cycle_already_paid_still_advances_without_paying_twice() {
    let (engine, clock) = build_engine_with_clock();
    let (user, _) = engine.enroll("reader@example.com").unwrap();
    engine.join_contest(&user.user_id).unwrap(); // 300, target 250

    // A cycle:1 bonus row written without the sequence moving on.
    let catalog = ActionCatalog::from_config(engine.config());
    let awards = AwardEngine::new(&catalog, &clock);
    let uow = engine.store.begin().unwrap();
    let paid = awards
        .credit(&uow, &AwardRequest::new(&user.user_id, ActionType::ProgressionBonus))
        .unwrap();
    assert!(paid.credited);
    uow.commit().unwrap();
    assert_eq!(engine.status(&user.user_id).unwrap().sequence, 1);

    let outcome = engine.claim(&user.user_id, 1).unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Caught { bonus: 0, new_balance: 350, new_target: 650, new_sequence: 2 }
    );
    assert_eq!(engine.store.entry_count(&user.user_id, ActionType::ProgressionBonus).unwrap(), 1);
    assert_eq!(engine.audit_user(&user.user_id).unwrap(), 350);
}

#[test]
fn stale_never_echoes_the_observed_sequence() {
    let engine = build_engine();
    let user = engine.get_or_create_user("reader@example.com").unwrap();

    for n in 0..4 {
        engine
            .award(&user.user_id, ActionType::Purchase, Some(&format!("cs_{n}")))
            .unwrap();
        let live = engine.status(&user.user_id).unwrap().sequence;
        for observed in [live - 1, live + 1, 0] {
            if let ClaimOutcome::Stale { current_sequence } = engine.claim(&user.user_id, observed).unwrap() {
                assert_ne!(current_sequence, observed);
                assert_eq!(current_sequence, live);
            } else {
                panic!("observed {observed} against live {live} should be stale");
            }
        }
        assert!(engine.claim(&user.user_id, live).unwrap().caught());
    }
}
