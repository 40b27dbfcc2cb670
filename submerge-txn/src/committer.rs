// The committer state machine (spec §4.1). Phases are modeled as explicit
// states with a function that returns the next phase; the "goto" flows of
// the original model (EndCommitter, restart to BeginTxnEpoch, re-enter
// StageWritesAndRecord) become phase transitions, per spec §9's design
// note, rather than exceptions or recursive calls.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::policy::{BlockedWriteChoice, EnabledSubsteps, FixedPolicy, Policy, SubStep};
use crate::record::Status;
use crate::shared::{Key, ParallelWriteOutcome, PipelineOutcome, SharedTxnState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Aborted,
    /// `max_attempts` was exceeded without staging or acking. Spec §4.1:
    /// "a modelling bound; real deployments rely on the preventer path to
    /// finalize any abandoned transaction."
    Abandoned,
}

/// Mutable per-attempt local state (spec §4.1): `attempt`, `txn_epoch`,
/// `txn_ts`, `to_write`, `to_check`, `have_staged_record`.
struct Attempt<K: Key> {
    attempt: u32,
    txn_epoch: u64,
    txn_ts: u64,
    to_write: BTreeSet<K>,
    to_check: BTreeSet<K>,
    have_staged_record: bool,
}

enum Phase {
    BeginEpoch,
    PipelineWrites,
    StageWritesAndRecord,
    AckClient,
    MakeExplicit,
    ResolveIntents,
    Done(Outcome),
}

pub struct Committer<K: Key> {
    state: Arc<SharedTxnState<K>>,
    config: Config,
    policy: Box<dyn Policy<K>>,
    pipelined_keys: Vec<K>,
    parallel_keys: Vec<K>,
}

impl<K: Key> Committer<K> {
    pub fn new(
        state: Arc<SharedTxnState<K>>,
        config: Config,
        pipelined_keys: Vec<K>,
        parallel_keys: Vec<K>,
    ) -> Self {
        Committer { state, config, policy: Box::new(FixedPolicy), pipelined_keys, parallel_keys }
    }

    pub fn with_policy(mut self, policy: Box<dyn Policy<K>>) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(&self) -> Outcome {
        let mut a = Attempt {
            attempt: 0,
            txn_epoch: 0,
            txn_ts: 0,
            to_write: BTreeSet::new(),
            to_check: BTreeSet::new(),
            have_staged_record: false,
        };

        let mut phase = Phase::BeginEpoch;
        loop {
            phase = self.step(phase, &mut a);
            if let Phase::Done(outcome) = phase {
                return outcome;
            }
        }
    }

    fn step(&self, phase: Phase, a: &mut Attempt<K>) -> Phase {
        match phase {
            Phase::BeginEpoch => {
                a.txn_epoch += 1;
                a.txn_ts += 1;
                tracing::debug!(target: "submerge_txn", epoch = a.txn_epoch, ts = a.txn_ts, attempt = a.attempt, "BeginEpoch");
                if a.attempt > self.config.max_attempts {
                    return Phase::Done(Outcome::Abandoned);
                }
                a.to_write = self.pipelined_keys.iter().cloned().collect();
                Phase::PipelineWrites
            }

            Phase::PipelineWrites => {
                for k in self.pipelined_keys.iter() {
                    match self.state.pipeline_write(k, a.txn_epoch, a.txn_ts) {
                        PipelineOutcome::Written => {}
                        PipelineOutcome::AlreadyResolved => {
                            tracing::debug!(target: "submerge_txn", key = ?k, "PipelineWrite found resolved intent, dropping");
                        }
                    }
                }
                a.to_write.clear();
                a.to_check = self.pipelined_keys.iter().cloned().collect();
                a.to_write = self.parallel_keys.iter().cloned().collect();
                a.have_staged_record = false;
                Phase::StageWritesAndRecord
            }

            Phase::StageWritesAndRecord => {
                if a.attempt > self.config.max_attempts {
                    return Phase::Done(Outcome::Abandoned);
                }
                if a.to_write.is_empty() && a.to_check.is_empty() && a.have_staged_record {
                    return Phase::AckClient;
                }

                let enabled = EnabledSubsteps {
                    query_pipelined_write: !a.to_check.is_empty(),
                    parallel_write: !a.to_write.is_empty(),
                    stage_record: !a.have_staged_record,
                };

                match self.policy.choose_substep(enabled) {
                    SubStep::QueryPipelinedWrite => {
                        let k = self.policy.pick_key(&a.to_check);
                        if self.state.query_intent(&k, a.txn_epoch, a.txn_ts) {
                            a.to_check.remove(&k);
                        } else {
                            tracing::debug!(target: "submerge_txn", key = ?k, "QueryPipelinedWrite missing, restarting");
                            a.attempt += 1;
                            return Phase::BeginEpoch;
                        }
                        Phase::StageWritesAndRecord
                    }

                    SubStep::ParallelWrite => {
                        let k = self.policy.pick_key(&a.to_write);
                        match self.state.parallel_write(&k, a.txn_epoch, a.txn_ts) {
                            ParallelWriteOutcome::Idempotent | ParallelWriteOutcome::Written => {
                                a.to_write.remove(&k);
                                Phase::StageWritesAndRecord
                            }
                            ParallelWriteOutcome::Blocked => {
                                a.attempt += 1;
                                match self.policy.on_blocked_write() {
                                    BlockedWriteChoice::Refresh => {
                                        a.txn_ts += 1;
                                        tracing::debug!(target: "submerge_txn", key = ?k, new_ts = a.txn_ts, "ParallelWrite blocked, refreshing");
                                        a.to_check = self.pipelined_keys.iter().cloned().collect();
                                        a.to_write = self.parallel_keys.iter().cloned().collect();
                                        a.have_staged_record = false;
                                        Phase::StageWritesAndRecord
                                    }
                                    BlockedWriteChoice::Restart => {
                                        tracing::debug!(target: "submerge_txn", key = ?k, "ParallelWrite blocked, restarting");
                                        Phase::BeginEpoch
                                    }
                                }
                            }
                        }
                    }

                    SubStep::StageRecord => {
                        a.have_staged_record = true;
                        let before = self.state.stage_record(a.txn_epoch, a.txn_ts);
                        if before == Status::Aborted {
                            tracing::debug!(target: "submerge_txn", "StageRecord observed ABORTED, terminating");
                            return Phase::Done(Outcome::Aborted);
                        }
                        Phase::StageWritesAndRecord
                    }
                }
            }

            Phase::AckClient => {
                self.state.ack_client();
                Phase::MakeExplicit
            }

            Phase::MakeExplicit => {
                self.state.make_explicit();
                Phase::ResolveIntents
            }

            Phase::ResolveIntents => {
                for k in self.pipelined_keys.iter().chain(self.parallel_keys.iter()) {
                    self.state.resolve_intent(k);
                }
                Phase::Done(Outcome::Committed)
            }

            Phase::Done(outcome) => Phase::Done(outcome),
        }
    }
}
