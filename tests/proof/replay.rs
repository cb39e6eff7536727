use chrono::{DateTime, Utc};
use std::fs;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};
use trellis::core::config::{CONFIG_FILE_NAME, LedgerConfig};
use trellis::core::error::{ErrorCategory, TrellisError};
use trellis::core::ledger::Ledger;
use trellis::core::snapshot::SnapshotStore;
use trellis::core::time::ManualClock;
use trellis::proof::event::{self, EventPayload};
use trellis::proof::node::{ChallengeTarget, InferenceType, Node, NodeId, WorkflowState};
use trellis::proof::replay::{self, Projection};
use trellis::proof::service::{ChildSpec, ProofService};
use trellis::proof::state::State;

fn t0() -> DateTime<Utc> {
    "2026-07-01T10:00:00Z".parse().unwrap()
}

/// A small but varied proof: scopes, admission, challenges, amendments.
fn build_history(dir: &std::path::Path) -> ProofService {
    let clock = Arc::new(ManualClock::new(t0()));
    let svc = ProofService::open_with_clock(dir, clock.clone()).unwrap();
    let root = NodeId::root();
    svc.init("sqrt(2) is irrational", "alice").unwrap();

    svc.claim(&root, "alice", None).unwrap();
    let assume = svc
        .refine(&root, "alice", ChildSpec::local_assume("sqrt(2) = p/q in lowest terms"))
        .unwrap();
    let fact = svc
        .refine(
            &root,
            "alice",
            ChildSpec::claim("squares of odd numbers are odd", InferenceType::ByDefinition),
        )
        .unwrap();
    svc.release(&root, "alice").unwrap();
    clock.advance(chrono::Duration::seconds(5));

    svc.claim(&assume, "bob", None).unwrap();
    let even = svc
        .refine(
            &assume,
            "bob",
            ChildSpec::claim("p^2 = 2q^2, so p is even", InferenceType::ModusPonens)
                .with_dependencies([fact.clone()]),
        )
        .unwrap();
    svc.refine(&assume, "bob", ChildSpec::local_discharge("contradiction"))
        .unwrap();
    svc.release(&assume, "bob").unwrap();

    svc.admit(&fact).unwrap();
    let ch = svc
        .raise_challenge(&even, ChallengeTarget::Gap, "why is p even?")
        .unwrap();
    svc.amend_statement(&even, "carol", "p^2 = 2q^2 is even, hence p is even")
        .unwrap();
    svc.resolve_challenge(&ch).unwrap();
    svc.accept(&even).unwrap();
    svc.add_definition("irrational", "not a ratio of integers")
        .unwrap();
    svc
}

fn ledger_of(tmp: &TempDir) -> Ledger {
    Ledger::open(&tmp.path().join("ledger"), LedgerConfig::default()).unwrap()
}

#[test]
fn replay_is_deterministic() {
    let tmp = tempdir().unwrap();
    let svc = build_history(tmp.path());
    let ledger = ledger_of(&tmp);

    let first = replay::replay(&ledger).unwrap();
    let second = replay::replay(&ledger).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first, svc.state().unwrap());
    assert_eq!(first.last_seq, ledger.count().unwrap());
}

#[test]
fn every_prefix_replays_identically_from_a_copy() {
    let tmp = tempdir().unwrap();
    build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let total = ledger.count().unwrap();

    for prefix in 1..=total {
        let copy = tempdir().unwrap();
        for seq in 1..=prefix {
            fs::copy(
                ledger.event_path(seq),
                copy.path().join(format!("{:012}.json", seq)),
            )
            .unwrap();
        }
        let copied = Ledger::open(copy.path(), LedgerConfig::default()).unwrap();
        let a = replay::replay(&copied).unwrap();
        let b = replay::replay(&copied).unwrap();
        assert_eq!(a, b, "prefix {}", prefix);
        assert_eq!(a.last_seq, prefix);
    }
}

#[test]
fn incremental_projection_matches_full_replay() {
    let tmp = tempdir().unwrap();
    build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let events = event::read_events(&ledger).unwrap();

    // Fold in uneven batches, deriving after each.
    let mut state = State::default();
    for chunk in events.chunks(3) {
        state = state.fold(chunk.iter()).unwrap();
    }
    assert_eq!(state, replay::replay(&ledger).unwrap());

    let mut projection = Projection::new();
    projection.catch_up(&ledger).unwrap();
    assert_eq!(projection.state(), &state);
}

#[test]
fn double_claim_in_ledger_fails_replay() {
    let tmp = tempdir().unwrap();
    let ledger = ledger_of(&tmp);
    let at = t0();
    event::append_event(
        &ledger,
        at,
        &EventPayload::ProofInitialized {
            conjecture: "c".into(),
            author: "a".into(),
            content_hash: Node::root("c", at).content_hash,
        },
    )
    .unwrap();
    for owner in ["x", "y"] {
        event::append_event(
            &ledger,
            at,
            &EventPayload::NodesClaimed {
                node_ids: vec![NodeId::root()],
                owner: owner.into(),
                ttl_ms: 60_000,
            },
        )
        .unwrap();
    }

    let err = replay::replay(&ledger).unwrap_err();
    let TrellisError::InvalidEvent { seq, source } = &err else {
        panic!("expected InvalidEvent, got {:?}", err);
    };
    assert_eq!(*seq, 3);
    assert!(matches!(
        **source,
        TrellisError::IllegalTransition {
            axis: "workflow",
            ..
        }
    ));
    assert_eq!(err.category(), ErrorCategory::Integrity);
    assert!(!err.is_retryable());
    assert!(replay::replay_with_verify(&ledger).is_err());

    // Opening a service over this ledger reports the same fatal failure.
    match ProofService::open(tmp.path()) {
        Ok(_) => panic!("service opened over a corrupt ledger"),
        Err(err) => assert_eq!(err.category(), ErrorCategory::Integrity),
    }
}

#[test]
fn event_for_missing_node_fails_replay() {
    let tmp = tempdir().unwrap();
    let ledger = ledger_of(&tmp);
    event::append_event(
        &ledger,
        t0(),
        &EventPayload::NodeAccepted {
            node_id: NodeId::parse("1.3").unwrap(),
        },
    )
    .unwrap();
    let err = replay::replay(&ledger).unwrap_err();
    assert!(matches!(
        &err,
        TrellisError::InvalidEvent { seq: 1, source } if matches!(**source, TrellisError::NotFound(_))
    ));
    assert_eq!(err.category(), ErrorCategory::Integrity);
}

#[test]
fn tampered_statement_fails_only_verified_replay() {
    let tmp = tempdir().unwrap();
    build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    assert!(replay::replay_with_verify(&ledger).is_ok());

    // Find the NodeCreated event for the odd-squares fact and flip one byte.
    let target = event::read_events(&ledger)
        .unwrap()
        .into_iter()
        .find(|e| {
            matches!(&e.payload, EventPayload::NodeCreated { node }
                if node.statement.starts_with("squares of odd"))
        })
        .unwrap();
    let path = ledger.event_path(target.seq);
    let raw = fs::read_to_string(&path).unwrap();
    let tampered = raw.replacen("squares of odd", "squares of odD", 1);
    assert_ne!(raw, tampered);
    fs::write(&path, tampered).unwrap();

    assert!(replay::replay(&ledger).is_ok());
    let err = replay::replay_with_verify(&ledger).unwrap_err();
    assert!(matches!(err, TrellisError::HashMismatch { .. }));
    assert_eq!(err.category(), ErrorCategory::Integrity);
}

#[test]
fn malformed_entry_is_skipped_leniently_but_fails_strictly() {
    let tmp = tempdir().unwrap();
    let svc = build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let tail = ledger.count().unwrap();

    // A trailing partial write.
    ledger.append(|_| Ok(b"{\"seq\":".to_vec())).unwrap();
    let lenient = replay::replay(&ledger).unwrap();
    assert_eq!(lenient.last_seq, tail);
    assert_eq!(lenient, svc.state().unwrap());

    assert!(matches!(
        replay::replay_with_verify(&ledger),
        Err(TrellisError::CorruptLedger { .. })
    ));
}

#[test]
fn missing_event_file_is_a_strict_gap() {
    let tmp = tempdir().unwrap();
    build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let last = ledger.count().unwrap();
    fs::remove_file(ledger.event_path(last - 1)).unwrap();

    assert_eq!(ledger.gaps().unwrap(), vec![last - 1]);
    assert!(matches!(
        replay::replay_with_verify(&ledger),
        Err(TrellisError::CorruptLedger { .. })
    ));
}

#[test]
fn snapshot_seeded_load_equals_full_replay() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "[snapshot]\nenabled = true\nevery_events = 3\n",
    )
    .unwrap();
    let svc = build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let snapshots = SnapshotStore::open(&svc.store().snapshot_db_path()).unwrap();
    assert!(snapshots.count().unwrap() > 0);

    let seeded = Projection::load(&ledger, Some(&snapshots)).unwrap();
    assert_eq!(seeded.state(), &replay::replay(&ledger).unwrap());

    let seq = svc.rebuild_snapshot().unwrap();
    assert_eq!(seq, ledger.count().unwrap());
    assert_eq!(snapshots.count().unwrap(), 1);
    let latest = snapshots.load_latest(seq).unwrap().unwrap();
    assert_eq!(latest.seq, seq);
}

#[test]
fn stale_snapshot_is_ignored() {
    let tmp = tempdir().unwrap();
    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        "[snapshot]\nevery_events = 2\n",
    )
    .unwrap();
    build_history(tmp.path());
    let ledger = ledger_of(&tmp);
    let snapshots = SnapshotStore::open(&tmp.path().join("cache/projection.db")).unwrap();
    let latest = snapshots
        .load_latest(ledger.count().unwrap())
        .unwrap()
        .unwrap();

    // Rewrite the event the snapshot was taken at; its digest no longer matches.
    let path = ledger.event_path(latest.seq);
    let mut raw = fs::read(&path).unwrap();
    raw.push(b' ');
    fs::write(&path, raw).unwrap();

    let loaded = Projection::load(&ledger, Some(&snapshots)).unwrap();
    assert_eq!(loaded.state(), &replay::replay(&ledger).unwrap());
}

#[test]
fn tampered_root_statement_fails_verified_replay() {
    let tmp = tempdir().unwrap();
    let svc = ProofService::open(tmp.path()).unwrap();
    svc.init("Test conjecture", "alice").unwrap();
    let ledger = ledger_of(&tmp);
    assert!(replay::replay_with_verify(&ledger).is_ok());

    let path = ledger.event_path(1);
    let raw = fs::read_to_string(&path).unwrap();
    fs::write(&path, raw.replacen("Test conjecture", "Test conjectura", 1)).unwrap();

    let err = replay::replay_with_verify(&ledger).unwrap_err();
    assert!(matches!(&err, TrellisError::HashMismatch { node, .. } if node == "1"));
    assert_eq!(err.category(), ErrorCategory::Integrity);
}

#[test]
fn tampered_amendment_fails_verified_replay() {
    let tmp = tempdir().unwrap();
    let svc = ProofService::open(tmp.path()).unwrap();
    svc.init("Test conjecture", "alice").unwrap();
    svc.amend_statement(&NodeId::root(), "alice", "Sharper claim")
        .unwrap();
    let ledger = ledger_of(&tmp);
    assert!(replay::replay_with_verify(&ledger).is_ok());

    let path = ledger.event_path(2);
    let raw = fs::read_to_string(&path).unwrap();
    let tampered = raw.replacen("Sharper claim", "Sharper clain", 1);
    assert_ne!(raw, tampered);
    fs::write(&path, tampered).unwrap();

    assert!(matches!(
        replay::replay_with_verify(&ledger),
        Err(TrellisError::HashMismatch { .. })
    ));

    // An amendment overwritten by a later one is still checked as written.
    svc.amend_statement(&NodeId::root(), "alice", "Sharpest claim")
        .unwrap();
    assert!(matches!(
        replay::replay_with_verify(&ledger),
        Err(TrellisError::HashMismatch { .. })
    ));
}

#[test]
fn writes_continue_after_a_torn_tail_entry() {
    let tmp = tempdir().unwrap();
    ProofService::open(tmp.path())
        .unwrap()
        .init("torn", "alice")
        .unwrap();
    let ledger = ledger_of(&tmp);
    ledger.append(|_| Ok(b"{\"seq\":".to_vec())).unwrap();

    let svc = ProofService::open(tmp.path()).unwrap();
    svc.claim(&NodeId::root(), "prover", None).unwrap();
    svc.release(&NodeId::root(), "prover").unwrap();
    svc.claim(&NodeId::root(), "prover", None).unwrap();
    assert_eq!(ledger.count().unwrap(), 5);

    let state = replay::replay(&ledger).unwrap();
    assert_eq!(state.last_seq, 5);
    assert_eq!(
        state.node(&NodeId::root()).unwrap().workflow_state,
        WorkflowState::Claimed
    );
    assert_eq!(state, svc.state().unwrap());
    assert!(matches!(
        replay::replay_with_verify(&ledger),
        Err(TrellisError::CorruptLedger { seq: 2, .. })
    ));
}
