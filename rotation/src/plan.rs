//! The rotation planner.
//!
//! [`plan`] is a pure function of the current time and one session's rows.
//! It decides what must be written; the executor performs the writes
//! conditionally against the versions captured here.

use std::collections::HashSet;

use baton_store::{ChainRecord, SessionRecord, TokenRecord, Versioned};
use baton_types::{ChainState, StandaloneKind, Timestamp, TokenId, TokenStatus};

use crate::RotationConfig;

/// One session's rows as read at the start of a pass.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub session: Versioned<SessionRecord>,
    pub chains: Vec<Versioned<ChainRecord>>,
    pub tokens: Vec<Versioned<TokenRecord>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RotationAction {
    /// Keep an open chain healthy: mark it stalled and/or hand its holder a
    /// replacement token with the same sequence number.
    MaintainChain {
        chain: Versioned<ChainRecord>,
        stall: bool,
        reissue: bool,
        /// The token the replacement retires, as read by this pass.
        replaces: Option<Versioned<TokenRecord>>,
    },
    /// Mint fresh tokens for enabled standalone windows and swap the
    /// session's pointers in one conditional write.
    RotateWindows {
        session: Versioned<SessionRecord>,
        kinds: Vec<StandaloneKind>,
    },
    /// Mark an active token past its expiry as expired.
    Expire { token: Versioned<TokenRecord> },
    /// Delete a spent token that has been dead long enough.
    Purge { token: Versioned<TokenRecord> },
}

impl RotationAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MaintainChain { .. } => "maintain_chain",
            Self::RotateWindows { .. } => "rotate_windows",
            Self::Expire { .. } => "expire",
            Self::Purge { .. } => "purge",
        }
    }
}

/// The newest live-or-expiring token matching the chain's current hop.
fn current_chain_token<'a>(
    chain: &ChainRecord,
    tokens: &'a [Versioned<TokenRecord>],
) -> Option<&'a Versioned<TokenRecord>> {
    tokens
        .iter()
        .filter(|t| {
            t.status == TokenStatus::Active
                && t.belongs_to_chain(&chain.chain_id)
                && t.chain_seq() == Some(chain.last_seq)
                && t.holder_id == chain.last_holder
        })
        .max_by_key(|t| t.expires_at)
}

fn needs_replacement(
    token: Option<&Versioned<TokenRecord>>,
    now: Timestamp,
    config: &RotationConfig,
) -> bool {
    match token {
        None => true,
        Some(t) => t.expires_at.remaining_from(now) <= config.safety_margin(),
    }
}

pub fn plan(
    now: Timestamp,
    snapshot: &SessionSnapshot,
    config: &RotationConfig,
) -> Vec<RotationAction> {
    if snapshot.session.is_ended() {
        return Vec::new();
    }

    let mut actions = Vec::new();
    // Tokens retired by their own reissue or window rotation in this pass.
    // Sweeping them as well would only race that write.
    let mut retiring: HashSet<&TokenId> = HashSet::new();

    for chain in snapshot.chains.iter().filter(|c| c.state.accepts_hops()) {
        let current = current_chain_token(chain, &snapshot.tokens);
        let reissue = needs_replacement(current, now, config);
        let replaces = current.filter(|_| reissue);
        if let Some(t) = replaces {
            retiring.insert(&t.token_id);
        }
        let stall = chain.state == ChainState::Active
            && chain.last_at.elapsed_since(now) >= config.stall_after();
        if reissue || stall {
            actions.push(RotationAction::MaintainChain {
                chain: chain.clone(),
                stall,
                reissue,
                replaces: replaces.cloned(),
            });
        }
    }

    let mut kinds = Vec::new();
    for kind in [StandaloneKind::LateEntry, StandaloneKind::EarlyLeave] {
        let (enabled, pointer) = snapshot.session.window(kind);
        if !enabled {
            continue;
        }
        let current = pointer.and_then(|id| {
            snapshot
                .tokens
                .iter()
                .find(|t| t.token_id == *id && t.status == TokenStatus::Active)
        });
        if needs_replacement(current, now, config) {
            if let Some(t) = current {
                retiring.insert(&t.token_id);
            }
            kinds.push(kind);
        }
    }
    if !kinds.is_empty() {
        actions.push(RotationAction::RotateWindows {
            session: snapshot.session.clone(),
            kinds,
        });
    }

    for token in &snapshot.tokens {
        match token.status {
            TokenStatus::Active => {
                if token.is_expired(now) && !retiring.contains(&token.token_id) {
                    actions.push(RotationAction::Expire {
                        token: token.clone(),
                    });
                }
            }
            TokenStatus::Consumed | TokenStatus::Expired => {
                if token.expires_at.elapsed_since(now) >= config.purge_after()
                    && token.expires_at.has_passed(now)
                {
                    actions.push(RotationAction::Purge {
                        token: token.clone(),
                    });
                }
            }
        }
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_store::Etag;
    use baton_types::{ChainId, Phase, SessionId, SessionStatus, UserId};
    use std::time::Duration;

    fn session() -> SessionRecord {
        SessionRecord {
            id: SessionId::new("s1"),
            teacher_id: UserId::new("prof"),
            starts_at: Timestamp::EPOCH,
            ends_at: Timestamp::from_secs(3_600),
            late_cutoff_minutes: 10,
            exit_window_minutes: 10,
            status: SessionStatus::Active,
            late_entry_active: false,
            current_late_token: None,
            early_leave_active: false,
            current_early_token: None,
            geofence: None,
            created_at: Timestamp::EPOCH,
        }
    }

    fn chain(last_at: u64) -> ChainRecord {
        ChainRecord {
            session_id: SessionId::new("s1"),
            chain_id: ChainId::new("c1"),
            phase: Phase::Entry,
            seed_index: 0,
            state: ChainState::Active,
            last_holder: UserId::new("ann"),
            last_seq: 2,
            last_at: Timestamp::from_secs(last_at),
            created_at: Timestamp::EPOCH,
        }
    }

    fn token(id: &str, seq: u64, expires: u64) -> TokenRecord {
        TokenRecord::chain(
            SessionId::new("s1"),
            TokenId::new(id),
            ChainId::new("c1"),
            seq,
            UserId::new("ann"),
            Timestamp::EPOCH,
            Timestamp::from_secs(expires),
        )
    }

    fn snapshot(
        session: SessionRecord,
        chains: Vec<ChainRecord>,
        tokens: Vec<TokenRecord>,
    ) -> SessionSnapshot {
        SessionSnapshot {
            session: Versioned::new(session, Etag::INITIAL),
            chains: chains.into_iter().map(|c| Versioned::new(c, Etag::INITIAL)).collect(),
            tokens: tokens.into_iter().map(|t| Versioned::new(t, Etag::INITIAL)).collect(),
        }
    }

    #[test]
    fn token_inside_margin_is_reissued_and_not_swept() {
        let now = Timestamp::from_secs(100);
        let snap = snapshot(session(), vec![chain(98)], vec![token("t1", 2, 102)]);
        let actions = plan(now, &snap, &RotationConfig::default());
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            RotationAction::MaintainChain { reissue: true, stall: false, .. }
        ));
    }

    #[test]
    fn an_expired_current_token_is_retired_by_its_reissue() {
        let now = Timestamp::from_secs(100);
        let snap = snapshot(session(), vec![chain(98)], vec![token("t1", 2, 90)]);
        let actions = plan(now, &snap, &RotationConfig::default());
        assert_eq!(actions.len(), 1, "no separate sweep for the same token");
        match &actions[0] {
            RotationAction::MaintainChain {
                reissue: true,
                replaces: Some(old),
                ..
            } => assert_eq!(old.token_id.as_str(), "t1"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn healthy_chain_needs_nothing() {
        let now = Timestamp::from_secs(100);
        let snap = snapshot(session(), vec![chain(98)], vec![token("t1", 2, 140)]);
        assert!(plan(now, &snap, &RotationConfig::default()).is_empty());
    }

    #[test]
    fn superseded_tokens_do_not_count_as_current() {
        let now = Timestamp::from_secs(100);
        // An old-sequence token that is still live does not keep the chain alive.
        let snap = snapshot(session(), vec![chain(98)], vec![token("old", 1, 140)]);
        let actions = plan(now, &snap, &RotationConfig::default());
        assert!(matches!(
            &actions[0],
            RotationAction::MaintainChain { reissue: true, .. }
        ));
    }

    #[test]
    fn idle_chain_is_stalled_once() {
        let now = Timestamp::from_secs(1_000);
        let config = RotationConfig::default();
        let snap = snapshot(session(), vec![chain(1_000 - 120)], vec![token("t1", 2, 1_040)]);
        let actions = plan(now, &snap, &config);
        assert!(matches!(
            &actions[0],
            RotationAction::MaintainChain { stall: true, reissue: false, .. }
        ));

        let mut stalled = chain(1_000 - 120);
        stalled.state = ChainState::Stalled;
        let snap = snapshot(session(), vec![stalled], vec![token("t1", 2, 1_040)]);
        assert!(plan(now, &snap, &config).is_empty());
    }

    #[test]
    fn completed_chains_and_ended_sessions_are_ignored() {
        let now = Timestamp::from_secs(100);
        let mut done = chain(0);
        done.state = ChainState::Completed;
        assert!(plan(now, &snapshot(session(), vec![done], vec![]), &RotationConfig::default())
            .is_empty());

        let mut ended = session();
        ended.status = SessionStatus::Ended;
        assert!(plan(now, &snapshot(ended, vec![chain(0)], vec![]), &RotationConfig::default())
            .is_empty());
    }

    #[test]
    fn expired_orphans_are_swept_and_old_dead_tokens_purged() {
        let now = Timestamp::from_secs(2_000);
        let config = RotationConfig::default();
        let orphan = token("orphan", 0, 1_990);
        let consumed = token("spent", 0, 1_000).with_status(TokenStatus::Consumed);
        let recent = token("recent", 0, 1_900).with_status(TokenStatus::Consumed);
        let mut done = chain(0);
        done.state = ChainState::Completed;
        let actions = plan(now, &snapshot(session(), vec![done], vec![orphan, consumed, recent]), &config);

        let expired: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                RotationAction::Expire { token } => Some(token.token_id.as_str()),
                _ => None,
            })
            .collect();
        let purged: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                RotationAction::Purge { token } => Some(token.token_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(expired, vec!["orphan"]);
        assert_eq!(purged, vec!["spent"]);
    }

    #[test]
    fn enabled_windows_rotate_together() {
        let now = Timestamp::from_secs(100);
        let mut s = session();
        s.set_window(StandaloneKind::LateEntry, true, Some(TokenId::new("late")));
        s.set_window(StandaloneKind::EarlyLeave, true, None);
        let late = TokenRecord::standalone(
            SessionId::new("s1"),
            TokenId::new("late"),
            StandaloneKind::LateEntry,
            UserId::new("prof"),
            Timestamp::EPOCH,
            now.plus(Duration::from_secs(3)),
        );
        let actions = plan(now, &snapshot(s, vec![], vec![late]), &RotationConfig::default());
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            RotationAction::RotateWindows { kinds, .. } => {
                assert_eq!(kinds, &vec![StandaloneKind::LateEntry, StandaloneKind::EarlyLeave]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    proptest::proptest! {
        #[test]
        fn a_token_is_never_both_replaced_and_swept(
            now in 0u64..2_000,
            seq in 0u64..4,
            expiries in proptest::collection::vec((0u64..4, 0u64..2_100), 0..8),
        ) {
            let now = Timestamp::from_secs(now);
            let mut c = chain(0);
            c.last_seq = seq;
            let tokens: Vec<TokenRecord> = expiries
                .iter()
                .enumerate()
                .map(|(i, (s, exp))| token(&format!("t{i}"), *s, *exp))
                .collect();
            let snap = snapshot(session(), vec![c.clone()], tokens);
            let actions = plan(now, &snap, &RotationConfig::default());

            let reissues = actions
                .iter()
                .filter(|a| matches!(a, RotationAction::MaintainChain { reissue: true, .. }))
                .count();
            let current = current_chain_token(&c, &snap.tokens);
            proptest::prop_assert_eq!(
                reissues == 1,
                needs_replacement(current, now, &RotationConfig::default())
            );
            if reissues == 1 {
                let replaced = actions.iter().find_map(|a| match a {
                    RotationAction::MaintainChain { replaces, .. } => Some(replaces.as_ref()),
                    _ => None,
                });
                proptest::prop_assert_eq!(
                    replaced.flatten().map(|t| &t.token_id),
                    current.map(|t| &t.token_id)
                );
                if let Some(t) = current {
                    let expires_current = actions.iter().any(|a| matches!(
                        a,
                        RotationAction::Expire { token } if token.token_id == t.token_id
                    ));
                    proptest::prop_assert!(!expires_current);
                }
            }
        }
    }
}
