// Integration tests for the six concrete scenarios spec §8.3 walks through.
// S1, S3 and S6 exercise the real committer/preventer through their public
// `run`/`run_until_terminal` entry points; S2 drives both participants to
// the same converged outcome without asserting on interleaving. S4 and S5
// need an exact step order the real thread scheduler can't be made to
// reproduce, so they drive `SharedTxnState` directly instead, one call per
// named step.

use std::sync::Arc;

use submerge_txn::committer::{Committer, Outcome as CommitOutcome};
use submerge_txn::preventer::{Outcome as PreventOutcome, Preventer};
use submerge_txn::{Config, ParallelWriteOutcome, PipelineOutcome, SharedTxnState, Status};

fn state(keys: &[&'static str]) -> Arc<SharedTxnState<&'static str>> {
    Arc::new(SharedTxnState::new(keys.iter().copied()))
}

#[test_log::test]
fn s1_happy_path_no_interference() {
    let s = state(&["x", "y"]);
    let committer = Committer::new(s.clone(), Config::default(), vec!["x"], vec!["y"]);

    assert_eq!(committer.run(), CommitOutcome::Committed);

    let r = s.record();
    assert_eq!(r.status, Status::Committed);
    assert_eq!((r.epoch, r.ts), (1, 1));
    assert_eq!(s.intent_of(&"x"), s.intent_of(&"y"));
    assert!(s.intent_of(&"x").resolved);
    assert!(s.commit_ack());
}

#[test_log::test]
fn s2_preventer_recovers_implicit_commit() {
    // Both writes and the stage happen up front, as if the committer had
    // stalled right after Phase C; only then does the preventer run.
    let s = state(&["x", "y"]);
    s.parallel_write(&"x", 1, 1);
    s.parallel_write(&"y", 1, 1);
    s.stage_record(1, 1);

    let preventer = Preventer::new(s.clone(), vec!["x", "y"]);
    assert_eq!(preventer.run(), PreventOutcome::Committed);

    let r = s.record();
    assert_eq!((r.status, r.epoch, r.ts), (Status::Committed, 1, 1));
}

#[test_log::test]
fn s3_preventer_aborts_pending_record() {
    let s = state(&["y"]);
    let preventer = Preventer::new(s.clone(), vec!["y"]);
    assert_eq!(preventer.run(), PreventOutcome::Aborted);
    assert_eq!(s.record().status, Status::Aborted);

    // The committer's StageRecord now observes ABORTED and terminates
    // without ever reaching AckClient.
    let committer = Committer::new(s.clone(), Config::default(), vec![], vec!["y"]);
    assert_eq!(committer.run(), CommitOutcome::Aborted);
    assert!(!s.commit_ack());
    let r = s.record();
    assert_eq!((r.status, r.epoch, r.ts), (Status::Aborted, 0, 0));
}

#[test_log::test]
fn s4_preventer_prevents_a_parallel_write() {
    let s = state(&["x", "y"]);

    // Committer lays x at (1,1) and stages the record, then stalls before
    // touching y.
    assert_eq!(s.parallel_write(&"x", 1, 1), ParallelWriteOutcome::Written);
    s.stage_record(1, 1);

    // A preventer snapshots STAGING@(1,1): finds x, fails to find y, bumps
    // tscache[y] and aborts the record.
    assert!(s.query_intent(&"x", 1, 1));
    assert!(!s.query_intent(&"y", 1, 1));
    s.bump_tscache(&"y", 1);
    s.prevent_abort_staging();
    assert_eq!(s.record().status, Status::Aborted);

    // The committer's next ParallelWrite on y (still at txn_ts = 1) sees
    // tscache[y] >= txn_ts and blocks, so it refreshes to txn_ts = 2 and
    // re-stages at (1,2)...
    assert_eq!(s.parallel_write(&"y", 1, 1), ParallelWriteOutcome::Blocked);
    let before = s.stage_record(1, 2);
    // ...but StageRecord finds the record already ABORTED and reports it,
    // rather than silently re-staging over an aborted transaction.
    assert_eq!(before, Status::Aborted);
    assert_eq!(s.record().status, Status::Aborted);
}

#[test_log::test]
fn s5_epoch_restart_on_resolved_intent() {
    let s = state(&["x"]);

    // A prior epoch's intent at x was already resolved (e.g. by a preventer
    // that aborted epoch 1 and ran ResolveIntents).
    assert_eq!(s.parallel_write(&"x", 1, 1), ParallelWriteOutcome::Written);
    s.resolve_intent(&"x");
    assert!(s.intent_of(&"x").resolved);

    // Phase B of epoch 2 sees the resolved intent and drops it...
    assert_eq!(s.pipeline_write(&"x", 2, 2), PipelineOutcome::AlreadyResolved);
    // ...so Phase C.1's QueryIntent on x fails, which is exactly the signal
    // the committer uses to restart at a new epoch.
    assert!(!s.query_intent(&"x", 2, 2));
}

#[test_log::test]
fn s6_refresh_path_commits_at_higher_ts() {
    let s = state(&["x"]);
    // tscache[x] is pre-seeded at the ts the committer would otherwise pick.
    s.bump_tscache(&"x", 1);

    let committer = Committer::new(s.clone(), Config::default(), vec![], vec!["x"]);
    assert_eq!(committer.run(), CommitOutcome::Committed);

    let r = s.record();
    assert_eq!((r.status, r.epoch, r.ts), (Status::Committed, 1, 2));
}
