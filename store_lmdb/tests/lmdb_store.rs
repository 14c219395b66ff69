use std::sync::Arc;
use std::thread;

use baton_store::{
    ChainRecord, ChainStore, EntityStore, Etag, SessionRecord, SessionStore, StoreError,
    TokenRecord, TokenStore,
};
use baton_store_lmdb::{LmdbEnvironment, LmdbStore, DEFAULT_MAP_SIZE};
use baton_types::{ChainId, ChainState, Phase, SessionId, SessionStatus, Timestamp, TokenId, UserId};

fn open() -> (tempfile::TempDir, LmdbStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).expect("open lmdb");
    (dir, store)
}

fn session(id: &str) -> SessionRecord {
    SessionRecord {
        id: SessionId::new(id),
        teacher_id: UserId::new("prof"),
        starts_at: Timestamp::from_secs(0),
        ends_at: Timestamp::from_secs(3_600),
        late_cutoff_minutes: 10,
        exit_window_minutes: 10,
        status: SessionStatus::Active,
        late_entry_active: false,
        current_late_token: None,
        early_leave_active: false,
        current_early_token: None,
        geofence: None,
        created_at: Timestamp::from_secs(0),
    }
}

fn chain(session: &str, id: &str) -> ChainRecord {
    ChainRecord {
        session_id: SessionId::new(session),
        chain_id: ChainId::new(id),
        phase: Phase::Entry,
        seed_index: 0,
        state: ChainState::Active,
        last_holder: UserId::new("ann"),
        last_seq: 0,
        last_at: Timestamp::from_secs(1),
        created_at: Timestamp::from_secs(1),
    }
}

fn token(session: &str, id: &str) -> TokenRecord {
    TokenRecord::chain(
        SessionId::new(session),
        TokenId::new(id),
        ChainId::new("c1"),
        0,
        UserId::new("ann"),
        Timestamp::from_secs(1),
        Timestamp::from_secs(20),
    )
}

#[test]
fn create_then_get_returns_initial_etag() {
    let (_dir, store) = open();
    let created = store.create_session(&session("s1")).unwrap();
    assert_eq!(created.etag, Etag::INITIAL);

    let read = store.get_session(&SessionId::new("s1")).unwrap();
    assert_eq!(read.etag, Etag::INITIAL);
    assert_eq!(read.value, session("s1"));
}

#[test]
fn create_twice_is_duplicate() {
    let (_dir, store) = open();
    store.create_chain(&chain("s1", "c1")).unwrap();
    let err = store.create_chain(&chain("s1", "c1")).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[test]
fn missing_row_is_not_found() {
    let (_dir, store) = open();
    let err = store
        .get_chain(&SessionId::new("s1"), &ChainId::new("nope"))
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(store
        .find_token(&SessionId::new("s1"), &TokenId::new("nope"))
        .unwrap()
        .is_none());
}

#[test]
fn replace_with_stale_etag_conflicts() {
    let (_dir, store) = open();
    let v1 = store.create_chain(&chain("s1", "c1")).unwrap();
    let next = v1.advanced(UserId::new("ben"), Timestamp::from_secs(5));
    let v2 = v1.compare_and_swap(&store, next.clone()).unwrap();
    assert_eq!(v2.etag, Etag::new(2));

    let err = v1.compare_and_swap(&store, next).unwrap_err();
    match err {
        StoreError::VersionConflict {
            expected, found, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(found, 2);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn conditional_delete_respects_etag() {
    let (_dir, store) = open();
    let v1 = store.create_token(&token("s1", "t1")).unwrap();
    let _v2 = store
        .conditional_replace_token(&token("s1", "t1"), v1.etag)
        .unwrap();
    assert!(v1.delete_if_unchanged(&store).unwrap_err().is_conflict());
    assert!(store
        .delete_token(&SessionId::new("s1"), &TokenId::new("t1"))
        .unwrap());
    assert!(!store
        .delete_token(&SessionId::new("s1"), &TokenId::new("t1"))
        .unwrap());
}

#[test]
fn listing_is_scoped_to_table_and_partition() {
    let (_dir, store) = open();
    store.create_token(&token("s1", "a")).unwrap();
    store.create_token(&token("s1", "b")).unwrap();
    store.create_token(&token("s10", "c")).unwrap();
    store.create_chain(&chain("s1", "c1")).unwrap();

    let s1 = store.list_tokens(Some(&SessionId::new("s1")), &|_| true).unwrap();
    let ids: Vec<_> = s1.iter().map(|t| t.token_id.to_string()).collect();
    assert_eq!(ids, vec!["a", "b"]);

    let all = store.list_tokens(None, &|_| true).unwrap();
    assert_eq!(all.len(), 3);

    let filtered = store
        .list_tokens(None, &|t| t.token_id.as_str() == "c")
        .unwrap();
    assert_eq!(filtered.len(), 1);
}

#[test]
fn upsert_bumps_existing_etag() {
    let (_dir, store) = open();
    let first = EntityStore::<ChainRecord>::upsert(&store, &chain("s1", "c1")).unwrap();
    let second = EntityStore::<ChainRecord>::upsert(&store, &chain("s1", "c1")).unwrap();
    assert_eq!(first, Etag::INITIAL);
    assert_eq!(second, Etag::new(2));
}

#[test]
fn rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = LmdbStore::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
        store.create_session(&session("keep")).unwrap();
    }
    let env = LmdbEnvironment::open(dir.path(), DEFAULT_MAP_SIZE).unwrap();
    assert_eq!(env.schema_version().unwrap(), baton_store_lmdb::meta::SCHEMA_VERSION);
    let store = LmdbStore::new(&env);
    assert!(store.get_session(&SessionId::new("keep")).is_ok());
}

#[test]
fn racing_compare_and_swap_has_one_winner() {
    let (_dir, store) = open();
    let store = Arc::new(store);
    let v1 = store.create_chain(&chain("s1", "c1")).unwrap();

    let handles: Vec<_> = ["ben", "cat"]
        .into_iter()
        .map(|holder| {
            let store = Arc::clone(&store);
            let v1 = v1.clone();
            thread::spawn(move || {
                let next = v1.advanced(UserId::new(holder), Timestamp::from_secs(2));
                v1.compare_and_swap(store.as_ref(), next)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(e) if e.is_conflict())));
}
