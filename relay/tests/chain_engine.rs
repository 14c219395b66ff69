mod common;

use std::sync::Barrier;

use baton_relay::{HopRequest, RelayConfig, RelayError};
use baton_store::{
    AttendanceRecord, AttendanceRecordStore, ChainRecord, ChainStore, Entity, HistoryEntry,
    HistoryStore, HopKind, TokenRecord, TokenStore,
};
use baton_types::{ChainState, EntryStatus, Phase, SessionEvent, TokenStatus, TEACHER_ORIGIN};
use common::{user, Harness};
use proptest::prelude::*;

#[test]
fn entry_hop_moves_chain_and_marks_previous_holder() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    assert_eq!(chain.last_holder, user("ann"));
    assert_eq!(chain.last_seq, 0);

    // Ben arrives after the seed so Ann is the only seed candidate.
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);
    let outcome = h.hop(&token, &user("ann"), &user("ben")).unwrap();
    assert_eq!(outcome.new_holder, user("ben"));
    assert_eq!(outcome.seq, 1);

    let after = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(after.last_holder, user("ben"));
    assert_eq!(after.last_seq, 1);
    assert_eq!(after.state, ChainState::Active);

    let ann = h.store.get_attendance(&h.session_id, &user("ann")).unwrap();
    assert_eq!(ann.entry_status, Some(EntryStatus::PresentEntry));
    let ben = h.store.get_attendance(&h.session_id, &user("ben")).unwrap();
    assert_eq!(ben.entry_status, None, "the new holder is marked when they pass it on");

    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].sequence, 0);
    assert_eq!(history[0].from_holder, TEACHER_ORIGIN);
    assert_eq!(history[0].to_holder, user("ann"));
    assert_eq!(history[0].kind, HopKind::Seed);
    assert_eq!(history[1].sequence, 1);
    assert_eq!(history[1].from_holder, "ann");
    assert_eq!(history[1].to_holder, user("ben"));
    assert_eq!(history[1].kind, HopKind::Scan);

    let old = h.store.get_token(&h.session_id, &token).unwrap();
    assert_eq!(old.status, TokenStatus::Consumed);
    assert_eq!(h.live_token(&after), outcome.token_id);

    let events = h.events();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::ChainUpdated { last_seq: 1, last_holder, .. } if *last_holder == user("ben")
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Milestone { student_id, entry_status: Some(EntryStatus::PresentEntry), .. }
            if *student_id == user("ann")
    )));
}

#[test]
fn entry_after_cutoff_is_late() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    h.clock.advance_secs(10 * 60 + 1);
    // The seed token has expired by now; take the reissued one.
    let token = reissue(&h, &chain);
    h.hop(&token, &user("ann"), &user("ben")).unwrap();
    let ann = h.store.get_attendance(&h.session_id, &user("ann")).unwrap();
    assert_eq!(ann.entry_status, Some(EntryStatus::LateEntry));
}

/// Stand-in for a rotation pass: hand the current holder a fresh token.
fn reissue(h: &Harness, chain: &baton_store::ChainRecord) -> baton_types::TokenId {
    let current = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    let now = h.clock_now();
    let token = baton_store::TokenRecord::chain(
        h.session_id.clone(),
        baton_types::TokenId::new(format!("reissued-{}", now.as_millis())),
        current.chain_id.clone(),
        current.last_seq,
        current.last_holder.clone(),
        now,
        now.plus(std::time::Duration::from_secs(45)),
    );
    h.store.create_token(&token).unwrap();
    token.token_id
}

#[test]
fn concurrent_scans_of_one_token_have_a_single_winner() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);
    let issued = h
        .verifier
        .request_challenge(&h.session_id, &token, Some(&chain.chain_id), &user("ben"))
        .unwrap();
    let request = HopRequest {
        session_id: h.session_id.clone(),
        token_id: token.clone(),
        etag: Some(issued.token_etag),
        code: issued.code.clone(),
        requester: user("ann"),
    };

    let barrier = Barrier::new(2);
    let results: Vec<Result<_, RelayError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    h.engine.process_chain_scan(&request)
                })
            })
            .collect();
        handles.into_iter().map(|j| j.join().unwrap()).collect()
    });

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "results: {results:?}");
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert!(
        matches!(loser, RelayError::VersionConflict | RelayError::TokenUsed),
        "unexpected loser error: {loser:?}"
    );

    let after = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(after.last_seq, 1);
    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(history.len(), 2);
    let live: Vec<_> = h
        .store
        .tokens_for_chain(&h.session_id, &chain.chain_id)
        .unwrap()
        .into_iter()
        .filter(|t| t.status == TokenStatus::Active)
        .collect();
    assert_eq!(live.len(), 1);
}

#[test]
fn seeding_more_chains_than_students_reports_counts() {
    let h = Harness::new();
    h.enroll_online(&["ann", "ben"]);
    let err = h.engine.seed_chains(&h.session_id, Phase::Entry, 5).unwrap_err();
    assert_eq!(err.code(), "INSUFFICIENT_STUDENTS");
    assert!(err.to_string().contains("requested 5, available 2"), "{err}");
}

#[test]
fn seeding_without_online_students_fails() {
    let h = Harness::new();
    h.sessions.enroll_student(&h.session_id, &user("ann")).unwrap();
    let err = h.engine.seed_chains(&h.session_id, Phase::Entry, 1).unwrap_err();
    assert_eq!(err.code(), "NO_STUDENTS");
    let err = h.engine.seed_chains(&h.session_id, Phase::Entry, 0).unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");
}

#[test]
fn seeding_picks_distinct_holders_and_reseed_adds_a_round() {
    let h = Harness::new();
    h.enroll_online(&["ann", "ben", "cat", "dan"]);
    let first = h.engine.seed_chains(&h.session_id, Phase::Entry, 2).unwrap();
    assert_ne!(first[0].last_holder, first[1].last_holder);
    assert!(first.iter().all(|c| c.seed_index == 0));

    let again = h.engine.seed_chains(&h.session_id, Phase::Entry, 1).unwrap_err();
    assert_eq!(again.code(), "INVALID_REQUEST");

    let second = h.engine.reseed_chains(&h.session_id, Phase::Entry, 2).unwrap();
    assert!(second.iter().all(|c| c.seed_index == 1));
    let first_holders: Vec<_> = first.iter().map(|c| &c.last_holder).collect();
    assert!(second.iter().all(|c| !first_holders.contains(&&c.last_holder)));

    let all = h.engine.list_chains(&h.session_id, Some(Phase::Entry)).unwrap();
    assert_eq!(all.len(), 4);
    assert!(h.engine.list_chains(&h.session_id, Some(Phase::Exit)).unwrap().is_empty());
}

#[test]
fn exit_phase_only_seeds_students_who_entered() {
    let h = Harness::new();
    h.enroll_online(&["ann", "ben"]);
    h.mark_entered("ben");
    let chains = h.engine.seed_chains(&h.session_id, Phase::Exit, 1).unwrap();
    assert_eq!(chains[0].last_holder, user("ben"));
}

#[test]
fn expired_token_is_never_consumed() {
    let h = Harness::with_config(RelayConfig {
        challenge_ttl_secs: 600,
        ..RelayConfig::default()
    });
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);
    let issued = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("ben"))
        .unwrap();

    h.clock.advance_secs(46);
    let err = h
        .engine
        .process_chain_scan(&HopRequest {
            session_id: h.session_id.clone(),
            token_id: token.clone(),
            etag: None,
            code: issued.code,
            requester: user("ann"),
        })
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_EXPIRED");
    let after = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(after.last_seq, 0);
    assert_eq!(
        h.store.get_token(&h.session_id, &token).unwrap().status,
        TokenStatus::Active
    );
}

#[test]
fn challenge_protocol_errors() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben", "cat"]);
    let token = h.live_token(&chain);

    let self_scan = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("ann"))
        .unwrap_err();
    assert_eq!(self_scan.code(), "SELF_SCAN");

    let no_pending = h
        .verifier
        .validate_challenge(&h.session_id, &token, "123456", &user("ann"))
        .unwrap_err();
    assert_eq!(no_pending.code(), "NO_PENDING_CHALLENGE");

    let wrong_chain = h
        .verifier
        .request_challenge(
            &h.session_id,
            &token,
            Some(&baton_types::ChainId::new("other")),
            &user("ben"),
        )
        .unwrap_err();
    assert_eq!(wrong_chain.code(), "INVALID_TOKEN");

    let stranger = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("zed"))
        .unwrap_err();
    assert_eq!(stranger.code(), "NOT_ENROLLED");

    let issued = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("ben"))
        .unwrap();
    assert_eq!(issued.holder_id, user("ann"));
    assert_eq!(issued.code.len(), 6);

    let not_holder = h
        .verifier
        .validate_challenge(&h.session_id, &token, &issued.code, &user("ben"))
        .unwrap_err();
    assert_eq!(not_holder.code(), "NOT_HOLDER");
    assert_eq!(
        h.verifier
            .validate_challenge(&h.session_id, &token, &issued.code, &user("ann"))
            .unwrap(),
        user("ben")
    );

    // A second scanner replaces the pending challenge.
    h.clock.advance_secs(1);
    let replaced = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("cat"))
        .unwrap();
    assert_eq!(
        h.verifier
            .validate_challenge(&h.session_id, &token, &replaced.code, &user("ann"))
            .unwrap(),
        user("cat")
    );
    if replaced.code != issued.code {
        let stale = h
            .verifier
            .validate_challenge(&h.session_id, &token, &issued.code, &user("ann"))
            .unwrap_err();
        assert_eq!(stale.code(), "INVALID_CHALLENGE");
    }

    h.clock.advance_secs(31);
    let expired = h
        .verifier
        .validate_challenge(&h.session_id, &token, &replaced.code, &user("ann"))
        .unwrap_err();
    assert_eq!(expired.code(), "CHALLENGE_EXPIRED");
}

#[test]
fn stale_etag_is_a_conflict() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);
    let issued = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("ben"))
        .unwrap();
    let err = h
        .engine
        .process_chain_scan(&HopRequest {
            session_id: h.session_id.clone(),
            token_id: token,
            etag: Some(baton_store::Etag::INITIAL),
            code: issued.code,
            requester: user("ann"),
        })
        .unwrap_err();
    assert_eq!(err.code(), "VERSION_CONFLICT");
}

#[test]
fn closing_an_exit_chain_verifies_holder_and_retires_tokens() {
    let h = Harness::new();
    h.enroll_online(&["cat"]);
    h.mark_entered("cat");
    let chain = h.seed_one(Phase::Exit);
    let leftover = h.live_token(&chain);

    let outcome = h.engine.close_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(outcome.final_holder, user("cat"));
    assert!(!outcome.already_completed);

    let cat = h.store.get_attendance(&h.session_id, &user("cat")).unwrap();
    assert!(cat.exit_verified);
    let closed = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(closed.state, ChainState::Completed);
    assert!(h
        .store
        .tokens_for_chain(&h.session_id, &chain.chain_id)
        .unwrap()
        .is_empty());

    let err = h
        .engine
        .process_chain_scan(&HopRequest {
            session_id: h.session_id.clone(),
            token_id: leftover,
            etag: None,
            code: "000000".into(),
            requester: user("cat"),
        })
        .unwrap_err();
    assert_eq!(err.code(), "TOKEN_NOT_FOUND");

    let again = h.engine.close_chain(&h.session_id, &chain.chain_id).unwrap();
    assert!(again.already_completed);
    assert_eq!(
        h.engine
            .current_token(&h.session_id, &chain.chain_id)
            .unwrap_err()
            .code(),
        "TOKEN_NOT_FOUND"
    );
}

#[test]
fn override_hands_chain_to_enrolled_student() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["dan"]);
    let old = h.live_token(&chain);

    let outcome = h
        .engine
        .set_chain_holder(&h.session_id, &chain.chain_id, &user("dan"))
        .unwrap();
    assert_eq!(outcome.seq, 1);
    assert_eq!(outcome.new_holder, user("dan"));

    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].kind, HopKind::Override);
    assert_eq!(history[1].from_holder, "ann");

    // Overrides are not peer verification.
    let ann = h.store.get_attendance(&h.session_id, &user("ann")).unwrap();
    assert_eq!(ann.entry_status, None);

    let stale = h
        .verifier
        .request_challenge(&h.session_id, &old, None, &user("ann"))
        .unwrap_err();
    assert_eq!(stale.code(), "TOKEN_USED");

    let same = h
        .engine
        .set_chain_holder(&h.session_id, &chain.chain_id, &user("dan"))
        .unwrap_err();
    assert_eq!(same.code(), "INVALID_REQUEST");
    let stranger = h
        .engine
        .set_chain_holder(&h.session_id, &chain.chain_id, &user("zed"))
        .unwrap_err();
    assert_eq!(stranger.code(), "NOT_ENROLLED");
}

#[test]
fn milestone_failure_does_not_fail_the_hop() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);

    h.store.fail_writes(AttendanceRecord::TABLE);
    let outcome = h.hop(&token, &user("ann"), &user("ben")).unwrap();
    h.store.heal(AttendanceRecord::TABLE);

    assert_eq!(outcome.seq, 1);
    let ann = h.store.get_attendance(&h.session_id, &user("ann")).unwrap();
    assert_eq!(ann.entry_status, None);
    assert!(!h.events().iter().any(|e| matches!(e, SessionEvent::Milestone { .. })));
}

#[test]
fn a_hop_that_cannot_record_history_leaves_the_chain_alone() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);
    let issued = h
        .verifier
        .request_challenge(&h.session_id, &token, None, &user("ben"))
        .unwrap();
    let request = HopRequest {
        session_id: h.session_id.clone(),
        token_id: token.clone(),
        etag: None,
        code: issued.code,
        requester: user("ann"),
    };

    h.store.fail_writes(HistoryEntry::TABLE);
    let err = h.engine.process_chain_scan(&request).unwrap_err();
    assert_eq!(err.code(), "INTERNAL");

    let stored = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(stored.last_seq, 0);
    assert_eq!(history.len() as u64, stored.last_seq + 1);
    assert_eq!(h.store.get_token(&h.session_id, &token).unwrap().status, TokenStatus::Active);
    assert_eq!(h.store.tokens_for_chain(&h.session_id, &chain.chain_id).unwrap().len(), 1);
    let ann = h.store.get_attendance(&h.session_id, &user("ann")).unwrap();
    assert_eq!(ann.entry_status, None, "no milestone for a hop that did not land");

    // Once storage recovers the same code completes the hop.
    h.store.heal(HistoryEntry::TABLE);
    let outcome = h.engine.process_chain_scan(&request).unwrap();
    assert_eq!(outcome.seq, 1);
    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn a_hop_that_loses_the_chain_write_gives_back_its_history_row() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);

    h.store.fail_writes(ChainRecord::TABLE);
    assert!(h.hop(&token, &user("ann"), &user("ben")).is_err());
    h.store.heal(ChainRecord::TABLE);

    let stored = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(stored.last_seq, 0);
    assert_eq!(history.len(), 1);
    let live = h
        .store
        .tokens_for_chain(&h.session_id, &chain.chain_id)
        .unwrap()
        .into_iter()
        .filter(|t| t.status == TokenStatus::Active)
        .count();
    assert_eq!(live, 0, "the successor token is removed with the failed hop");
}

#[test]
fn an_override_that_cannot_record_history_is_refused() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    let token = h.live_token(&chain);

    h.store.fail_writes(HistoryEntry::TABLE);
    assert!(h
        .engine
        .set_chain_holder(&h.session_id, &chain.chain_id, &user("ben"))
        .is_err());
    h.store.heal(HistoryEntry::TABLE);

    let stored = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
    assert_eq!(stored.last_holder, user("ann"));
    assert_eq!(stored.last_seq, 0);
    assert_eq!(h.store.get_token(&h.session_id, &token).unwrap().status, TokenStatus::Active);
}

#[test]
fn a_seed_that_cannot_issue_tokens_leaves_nothing_behind() {
    let h = Harness::new();
    h.enroll_online(&["ann", "ben"]);

    h.store.fail_writes(TokenRecord::TABLE);
    assert!(h.engine.seed_chains(&h.session_id, Phase::Entry, 2).is_err());
    h.store.heal(TokenRecord::TABLE);

    assert!(h.engine.list_chains(&h.session_id, None).unwrap().is_empty());
    assert!(h.store.session_history(&h.session_id).unwrap().is_empty());
    // Nothing half-written blocks a clean seed afterwards.
    assert_eq!(h.engine.seed_chains(&h.session_id, Phase::Entry, 2).unwrap().len(), 2);
}

#[test]
fn notification_failure_does_not_fail_the_hop() {
    let h = Harness::new();
    h.enroll_online(&["ann"]);
    let chain = h.seed_one(Phase::Entry);
    h.enroll_online(&["ben"]);
    h.notifier.fail_publishes(true);
    let token = h.live_token(&chain);
    assert!(h.hop(&token, &user("ann"), &user("ben")).is_ok());
}

#[test]
fn chain_writes_stay_consistent_after_session_history_lookup() {
    let h = Harness::new();
    h.enroll_online(&["ann", "ben"]);
    let chains = h.engine.seed_chains(&h.session_id, Phase::Snapshot, 2).unwrap();
    let rows = h.store.session_history(&h.session_id).unwrap();
    assert_eq!(rows.len(), 2);
    for chain in &chains {
        let stored = h.store.get_chain(&h.session_id, &chain.chain_id).unwrap();
        assert_eq!(stored.last_seq, 0);
    }
}

const STUDENTS: [&str; 5] = ["ann", "ben", "cat", "dan", "eve"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn history_length_tracks_last_seq(picks in proptest::collection::vec(0usize..4, 0..10)) {
        let h = Harness::new();
        h.enroll_online(&STUDENTS);
        let chain = h.seed_one(Phase::Snapshot);
        let mut holder = chain.last_holder.clone();

        for (i, pick) in picks.iter().enumerate() {
            let others: Vec<_> = STUDENTS.iter().map(|s| user(s)).filter(|s| *s != holder).collect();
            let scanner = others[*pick].clone();
            let token = h.live_token(&chain);
            let outcome = h.hop(&token, &holder, &scanner).unwrap();
            prop_assert_eq!(outcome.seq, i as u64 + 1);
            holder = scanner;
            h.clock.advance_secs(1);
        }

        let stored = h.engine.get_chain(&h.session_id, &chain.chain_id).unwrap();
        let history = h.engine.chain_history(&h.session_id, &chain.chain_id).unwrap();
        prop_assert_eq!(history.len() as u64, stored.last_seq + 1);
        prop_assert_eq!(stored.last_seq, picks.len() as u64);
        for (i, row) in history.iter().enumerate() {
            prop_assert_eq!(row.sequence, i as u64);
        }
        prop_assert_eq!(&history.last().unwrap().to_holder, &stored.last_holder);
    }

    #[test]
    fn only_the_issued_code_validates(guess in "[0-9]{6}") {
        let h = Harness::new();
        h.enroll_online(&["ann"]);
        let chain = h.seed_one(Phase::Entry);
        h.enroll_online(&["ben"]);
        let token = h.live_token(&chain);
        let issued = h
            .verifier
            .request_challenge(&h.session_id, &token, None, &user("ben"))
            .unwrap();
        prop_assume!(guess != issued.code);
        let err = h
            .verifier
            .validate_challenge(&h.session_id, &token, &guess, &user("ann"))
            .unwrap_err();
        prop_assert_eq!(err.code(), "INVALID_CHALLENGE");
    }
}
