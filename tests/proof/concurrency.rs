use chrono::Duration as ChronoDuration;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use trellis::core::error::TrellisError;
use trellis::core::time::ManualClock;
use trellis::proof::node::{InferenceType, NodeId, WorkflowState};
use trellis::proof::replay;
use trellis::proof::service::{ChildSpec, ProofService};

fn is_lost_race(err: &TrellisError) -> bool {
    matches!(
        err,
        TrellisError::AlreadyClaimed { .. } | TrellisError::ConcurrencyConflict { .. }
    )
}

#[test]
fn racing_claims_have_exactly_one_winner() {
    for round in 0..10 {
        let tmp = tempdir().unwrap();
        ProofService::open(tmp.path())
            .unwrap()
            .init("race", "setup")
            .unwrap();

        let contenders = 4;
        let barrier = Arc::new(Barrier::new(contenders));
        let handles: Vec<_> = (0..contenders)
            .map(|i| {
                let dir = tmp.path().to_path_buf();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    // One service per thread, as separate processes would have.
                    let svc = ProofService::open(&dir).unwrap();
                    barrier.wait();
                    svc.claim(&NodeId::root(), &format!("agent-{}", i), None)
                })
            })
            .collect();

        let results: Vec<Result<(), TrellisError>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {}: {:?}", round, results);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(is_lost_race(err), "round {}: unexpected {:?}", round, err);
        }

        let svc = ProofService::open(tmp.path()).unwrap();
        let root = svc.get_node(&NodeId::root()).unwrap();
        assert_eq!(root.workflow_state, WorkflowState::Claimed);
        assert!(replay::replay_with_verify(svc.ledger()).is_ok());
    }
}

#[test]
fn conflict_is_retryable_after_reload() {
    let tmp = tempdir().unwrap();
    let a = ProofService::open(tmp.path()).unwrap();
    a.init("retry", "setup").unwrap();
    a.claim(&NodeId::root(), "alice", None).unwrap();
    let child = a
        .refine(
            &NodeId::root(),
            "alice",
            ChildSpec::claim("step", InferenceType::ModusPonens),
        )
        .unwrap();
    a.release(&NodeId::root(), "alice").unwrap();

    // Two handles race on different nodes; whoever loses just retries.
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [NodeId::root(), child]
        .into_iter()
        .enumerate()
        .map(|(i, target)| {
            let dir = tmp.path().to_path_buf();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let svc = ProofService::open(&dir).unwrap();
                let owner = format!("agent-{}", i);
                barrier.wait();
                let mut attempts = 0;
                loop {
                    attempts += 1;
                    match svc.claim(&target, &owner, None) {
                        Ok(()) => return attempts,
                        Err(err) if err.is_retryable() && attempts < 20 => {
                            thread::sleep(Duration::from_millis(1));
                        }
                        Err(err) => panic!("claim failed: {}", err),
                    }
                }
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().unwrap() >= 1);
    }

    let nodes = ProofService::open(tmp.path()).unwrap().all_nodes().unwrap();
    assert!(nodes.iter().all(|n| n.workflow_state == WorkflowState::Claimed));
}

#[test]
fn concurrent_refinement_yields_distinct_children() {
    let tmp = tempdir().unwrap();
    let setup = ProofService::open(tmp.path()).unwrap();
    setup.init("fan-out", "setup").unwrap();
    setup.claim(&NodeId::root(), "owner", None).unwrap();
    drop(setup);

    let writers = 3;
    let per_writer = 5;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let dir = tmp.path().to_path_buf();
            let barrier = barrier.clone();
            thread::spawn(move || {
                // The same owner string from several handles.
                let svc = ProofService::open(&dir).unwrap();
                barrier.wait();
                let mut created = Vec::new();
                while created.len() < per_writer {
                    let spec = ChildSpec::claim(
                        format!("w{} step {}", w, created.len()),
                        InferenceType::ModusPonens,
                    );
                    match svc.refine(&NodeId::root(), "owner", spec) {
                        Ok(id) => created.push(id),
                        Err(err) if err.is_retryable() => thread::yield_now(),
                        Err(err) => panic!("refine failed: {}", err),
                    }
                }
                created
            })
        })
        .collect();

    let mut ids: Vec<NodeId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), writers * per_writer);

    let svc = ProofService::open(tmp.path()).unwrap();
    assert_eq!(svc.all_nodes().unwrap().len(), writers * per_writer + 1);
    assert!(svc.verify().is_ok());
}

#[test]
fn expired_lease_can_be_taken_over() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new("2026-02-01T00:00:00Z".parse().unwrap()));
    let svc = ProofService::open_with_clock(tmp.path(), clock.clone()).unwrap();
    svc.init("lease", "setup").unwrap();
    let root = NodeId::root();

    svc.claim(&root, "alice", Some(Duration::from_secs(30)))
        .unwrap();
    assert!(matches!(
        svc.claim(&root, "bob", None),
        Err(TrellisError::AlreadyClaimed { .. })
    ));

    // Exactly at the deadline the lease still holds.
    clock.advance(ChronoDuration::seconds(30));
    assert!(svc.claim(&root, "bob", None).is_err());

    clock.advance(ChronoDuration::milliseconds(1));
    svc.claim(&root, "bob", None).unwrap();

    // The previous holder lost every owner-only operation.
    assert!(matches!(
        svc.refine(
            &root,
            "alice",
            ChildSpec::claim("late", InferenceType::ModusPonens)
        ),
        Err(TrellisError::NotOwner { .. })
    ));
    assert!(matches!(
        svc.release(&root, "alice"),
        Err(TrellisError::NotOwner { .. })
    ));
    assert!(svc.verify().is_ok());
}

#[test]
fn extend_claim_pushes_the_deadline() {
    let tmp = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new("2026-02-01T00:00:00Z".parse().unwrap()));
    let svc = ProofService::open_with_clock(tmp.path(), clock.clone()).unwrap();
    svc.init("lease", "setup").unwrap();
    let root = NodeId::root();

    svc.claim(&root, "alice", Some(Duration::from_secs(10)))
        .unwrap();
    clock.advance(ChronoDuration::seconds(8));
    assert!(matches!(
        svc.extend_claim(&root, "bob", None),
        Err(TrellisError::NotOwner { .. })
    ));
    svc.extend_claim(&root, "alice", Some(Duration::from_secs(10)))
        .unwrap();

    clock.advance(ChronoDuration::seconds(8));
    assert!(matches!(
        svc.claim(&root, "bob", None),
        Err(TrellisError::AlreadyClaimed { .. })
    ));
    assert_eq!(
        svc.get_node(&root).unwrap().claimed_by.as_deref(),
        Some("alice")
    );

    clock.advance(ChronoDuration::seconds(3));
    assert!(matches!(
        svc.extend_claim(&root, "alice", None),
        Err(TrellisError::IllegalTransition { .. })
    ));
    svc.claim(&root, "bob", None).unwrap();
}

#[test]
fn short_real_ttl_expires_without_a_reaper() {
    let tmp = tempdir().unwrap();
    let svc = ProofService::open(tmp.path()).unwrap();
    svc.init("wall clock", "setup").unwrap();
    svc.claim(&NodeId::root(), "alice", Some(Duration::from_millis(1)))
        .unwrap();
    thread::sleep(Duration::from_millis(20));

    let other = ProofService::open(tmp.path()).unwrap();
    other.claim(&NodeId::root(), "bob", None).unwrap();
    assert_eq!(
        other.get_node(&NodeId::root()).unwrap().claimed_by.as_deref(),
        Some("bob")
    );
}

#[test]
fn commit_retries_absorb_unrelated_tail_moves() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join(trellis::core::config::CONFIG_FILE_NAME),
        "[ledger]\ncommit_retries = 64\n",
    )
    .unwrap();
    ProofService::open(tmp.path())
        .unwrap()
        .init("retries", "setup")
        .unwrap();

    let writers = 4;
    let per_writer = 5;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let dir = tmp.path().to_path_buf();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let svc = ProofService::open(&dir).unwrap();
                barrier.wait();
                // No caller-side retry: every lost tail is re-validated inside.
                (0..per_writer)
                    .map(|i| svc.add_external(&format!("ext {} {}", w, i), "Some Book, p. 3"))
                    .collect::<Result<Vec<_>, _>>()
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap().unwrap().len(), per_writer);
    }

    let svc = ProofService::open(tmp.path()).unwrap();
    assert_eq!(svc.all_externals().unwrap().len(), writers * per_writer);
    assert!(svc.verify().is_ok());
}

#[test]
fn commit_retries_turn_lost_claims_into_precondition_errors() {
    let tmp = tempdir().unwrap();
    std::fs::write(
        tmp.path().join(trellis::core::config::CONFIG_FILE_NAME),
        "[ledger]\ncommit_retries = 16\n",
    )
    .unwrap();
    ProofService::open(tmp.path())
        .unwrap()
        .init("race", "setup")
        .unwrap();

    let contenders = 4;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let dir = tmp.path().to_path_buf();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let svc = ProofService::open(&dir).unwrap();
                barrier.wait();
                svc.claim(&NodeId::root(), &format!("agent-{}", i), None)
            })
        })
        .collect();
    let results: Vec<Result<(), TrellisError>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, TrellisError::AlreadyClaimed { .. }),
            "unexpected {:?}",
            err
        );
    }
}
