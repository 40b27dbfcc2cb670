// The preventer state machine (spec §4.2). Any external request that
// encounters a STAGING record runs one of these: it either confirms the
// transaction (making an implicit commit explicit) or prevents one of its
// writes (aborting it), breaking the ambiguity. Phases P1-P4 are modeled
// the same way as the committer's: a function returning the next phase.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::fatal;
use crate::record::Status;
use crate::shared::{Key, SharedTxnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record was (or already had been) finalized ABORTED.
    Aborted,
    /// The record was (or already had been) finalized COMMITTED.
    Committed,
}

struct Snapshot<K: Key> {
    prevent_epoch: u64,
    prevent_ts: u64,
    found_writes: BTreeSet<K>,
}

enum Phase<K: Key> {
    PushRecord,
    PreventWrites(Snapshot<K>),
    RecoverRecord { snapshot: Snapshot<K>, prevented: bool },
    ResolveIntents,
    Done(Outcome),
}

pub struct Preventer<K: Key> {
    state: Arc<SharedTxnState<K>>,
    keys: Vec<K>,
}

impl<K: Key> Preventer<K> {
    pub fn new(state: Arc<SharedTxnState<K>>, keys: Vec<K>) -> Self {
        Preventer { state, keys }
    }

    /// One pass through P1 (with P3's STAGING/`legal_change` branch looping
    /// back to P1 as spec §4.2 describes) through P4. Represents "one
    /// external request" observing the transaction (spec glossary).
    pub fn run(&self) -> Outcome {
        let mut phase = Phase::PushRecord;
        loop {
            phase = self.step(phase);
            if let Phase::Done(outcome) = phase {
                return outcome;
            }
        }
    }

    /// Keeps calling `run` until the record is terminal. Models a stream of
    /// independent requests arriving over time, giving the weak fairness
    /// spec §4.2 requires of "every preventer" without assuming any single
    /// call sees the final state.
    pub fn run_until_terminal(&self) -> Outcome {
        loop {
            let outcome = self.run();
            if self.state.record().status.is_terminal() {
                return outcome;
            }
        }
    }

    fn step(&self, phase: Phase<K>) -> Phase<K> {
        match phase {
            Phase::PushRecord => {
                let r = self.state.record();
                match r.status {
                    Status::Pending => {
                        self.state.push_abort_pending();
                        Phase::ResolveIntents
                    }
                    Status::Staging => Phase::PreventWrites(Snapshot {
                        prevent_epoch: r.epoch,
                        prevent_ts: r.ts,
                        found_writes: BTreeSet::new(),
                    }),
                    Status::Committed | Status::Aborted => Phase::ResolveIntents,
                }
            }

            Phase::PreventWrites(mut snapshot) => {
                let remaining: Vec<K> =
                    self.keys.iter().filter(|k| !snapshot.found_writes.contains(*k)).cloned().collect();

                match remaining.into_iter().next() {
                    None => Phase::RecoverRecord { snapshot, prevented: false },
                    Some(k) => {
                        if self.state.query_intent(&k, snapshot.prevent_epoch, snapshot.prevent_ts) {
                            snapshot.found_writes.insert(k);
                            Phase::PreventWrites(snapshot)
                        } else {
                            self.state.bump_tscache(&k, snapshot.prevent_ts);
                            Phase::RecoverRecord { snapshot, prevented: true }
                        }
                    }
                }
            }

            Phase::RecoverRecord { snapshot, prevented } => {
                let r = self.state.record();
                let legal_change = r.epoch >= snapshot.prevent_epoch && r.ts > snapshot.prevent_ts;

                if prevented {
                    match r.status {
                        Status::Aborted | Status::Committed => Phase::ResolveIntents,
                        Status::Pending => fatal!("RecoverRecord(prevented): observed PENDING, cannot regress"),
                        Status::Staging => {
                            if legal_change {
                                tracing::debug!(target: "submerge_txn", "RecoverRecord: committer progressed, retrying");
                                Phase::PushRecord
                            } else {
                                self.state.prevent_abort_staging();
                                Phase::ResolveIntents
                            }
                        }
                    }
                } else {
                    match r.status {
                        Status::Pending | Status::Aborted => {
                            fatal!("RecoverRecord(not prevented): observed {:?}, expected STAGING/COMMITTED", r.status)
                        }
                        Status::Staging | Status::Committed => {
                            if !(r.epoch == snapshot.prevent_epoch && r.ts == snapshot.prevent_ts) {
                                fatal!(
                                    "RecoverRecord(not prevented): record moved to ({}, {}), expected ({}, {})",
                                    r.epoch, r.ts, snapshot.prevent_epoch, snapshot.prevent_ts
                                );
                            }
                            if r.status == Status::Staging {
                                self.state.confirm_committed();
                            }
                            Phase::ResolveIntents
                        }
                    }
                }
            }

            Phase::ResolveIntents => {
                for k in &self.keys {
                    self.state.resolve_intent(k);
                }
                let outcome = if self.state.record().status == Status::Committed {
                    Outcome::Committed
                } else {
                    Outcome::Aborted
                };
                Phase::Done(outcome)
            }

            Phase::Done(outcome) => Phase::Done(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::{Committer, Outcome as CommitOutcome};
    use crate::config::Config;
    use crate::shared::SharedTxnState;

    fn state_with(keys: &[&'static str]) -> Arc<SharedTxnState<&'static str>> {
        Arc::new(SharedTxnState::new(keys.iter().copied()))
    }

    #[test_log::test]
    fn push_aborts_pending_record() {
        let state = state_with(&["x"]);
        let preventer = Preventer::new(state.clone(), vec!["x"]);
        assert_eq!(preventer.run(), Outcome::Aborted);
        assert_eq!(state.record().status, Status::Aborted);
        assert!(state.intent_of(&"x").resolved);
    }

    #[test_log::test]
    fn confirms_implicit_commit() {
        let state = state_with(&["x", "y"]);
        state.parallel_write(&"x", 1, 1);
        state.parallel_write(&"y", 1, 1);
        state.stage_record(1, 1);

        let preventer = Preventer::new(state.clone(), vec!["x", "y"]);
        assert_eq!(preventer.run(), Outcome::Committed);
        assert_eq!(state.record().status, Status::Committed);
        assert!(state.intent_of(&"x").resolved);
        assert!(state.intent_of(&"y").resolved);
    }

    #[test_log::test]
    fn prevents_a_missing_write() {
        let state = state_with(&["x", "y"]);
        state.parallel_write(&"x", 1, 1);
        // y's intent never gets laid.
        state.stage_record(1, 1);

        let preventer = Preventer::new(state.clone(), vec!["x", "y"]);
        assert_eq!(preventer.run(), Outcome::Aborted);
        assert_eq!(state.record().status, Status::Aborted);
        assert!(state.tscache_of(&"y") >= 1);
    }

    #[test_log::test]
    fn noop_on_already_terminal_record() {
        let state = state_with(&["x"]);
        state.push_abort_pending();
        let preventer = Preventer::new(state.clone(), vec!["x"]);
        assert_eq!(preventer.run(), Outcome::Aborted);
        assert_eq!(state.record().status, Status::Aborted);
    }

    #[test_log::test]
    fn committer_and_preventer_threads_converge() {
        let state = state_with(&["x", "y"]);
        let preventer = Preventer::new(state.clone(), vec!["x", "y"]);

        let committer_state = state.clone();
        let handle = std::thread::spawn(move || {
            let c = Committer::new(committer_state, Config::default(), vec!["x"], vec!["y"]);
            c.run()
        });

        let _ = preventer.run_until_terminal();
        let commit_outcome = handle.join().unwrap();

        let r = state.record();
        assert!(r.status.is_terminal());
        assert!(state.intent_of(&"x").resolved);
        assert!(state.intent_of(&"y").resolved);
        match commit_outcome {
            CommitOutcome::Committed => assert_eq!(r.status, Status::Committed),
            CommitOutcome::Aborted | CommitOutcome::Abandoned => {}
        }
    }
}
