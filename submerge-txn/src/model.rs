// Exhaustive model-checking harness for the invariants (spec §8.1) and
// liveness properties (spec §8.2) of the protocol, using `stateright`
// (already a `submerge-txn` dev-dependency, previously unused). This is the
// "interleaved concurrent state machine" of spec §1 made explicit and
// checkable: a pure, cloneable `GlobalState` plus an `Action` enum that
// names every nondeterministic choice spec §4 leaves open (which Phase-C
// sub-step runs next, which key it targets, Refresh vs Restart), so the
// checker explores every interleaving rather than following one policy.
//
// This is deliberately a second, independent representation of the
// protocol from `committer`/`preventer`/`shared`; it exists to be checked
// against spec §8, not to be reused as the runtime implementation.

use std::collections::{BTreeMap, BTreeSet};

use stateright::{Model, Property};

pub type KeyId = u8;

const KEYS: [KeyId; 2] = [0, 1];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct IntentState {
    epoch: u64,
    ts: u64,
    resolved: bool,
}

impl Default for IntentState {
    fn default() -> Self {
        IntentState { epoch: 0, ts: 0, resolved: false }
    }
}

impl IntentState {
    fn query(&self, epoch: u64, ts: u64) -> bool {
        !self.resolved && self.epoch == epoch && self.ts <= ts
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RecStatus {
    Pending,
    Staging,
    Committed,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct TxnRecord {
    status: RecStatus,
    epoch: u64,
    ts: u64,
}

impl Default for TxnRecord {
    fn default() -> Self {
        TxnRecord { status: RecStatus::Pending, epoch: 0, ts: 0 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum CommitterPhase {
    BeginEpoch,
    Pipeline,
    Stage,
    AckClient,
    MakeExplicit,
    ResolveIntents,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CommitterLocal {
    phase: CommitterPhase,
    attempt: u32,
    epoch: u64,
    ts: u64,
    to_write: BTreeSet<KeyId>,
    to_check: BTreeSet<KeyId>,
    have_staged_record: bool,
    pipelined_keys: BTreeSet<KeyId>,
    parallel_keys: BTreeSet<KeyId>,
    /// Set when a ParallelWrite found itself blocked; the Refresh/Restart
    /// choice is only enabled while this holds.
    blocked_on: Option<KeyId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum PreventerPhase {
    Push,
    Prevent,
    Recover,
    ResolveIntents,
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PreventerLocal {
    phase: PreventerPhase,
    prevent_epoch: u64,
    prevent_ts: u64,
    found_writes: BTreeSet<KeyId>,
    prevented: bool,
}

impl PreventerLocal {
    fn new() -> Self {
        PreventerLocal {
            phase: PreventerPhase::Push,
            prevent_epoch: 0,
            prevent_ts: 0,
            found_writes: BTreeSet::new(),
            prevented: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlobalState {
    record: TxnRecord,
    intents: BTreeMap<KeyId, IntentState>,
    tscache: BTreeMap<KeyId, u64>,
    commit_ack: bool,
    committer: CommitterLocal,
    preventers: Vec<PreventerLocal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    CommitterBeginEpoch,
    CommitterPipelineWrite(KeyId),
    CommitterQueryPipelined(KeyId),
    CommitterParallelWrite(KeyId),
    CommitterRefresh,
    CommitterRestart,
    CommitterStageRecord,
    CommitterAckClient,
    CommitterMakeExplicit,
    CommitterResolveIntents,
    PreventerPush(usize),
    PreventerCheckKey(usize, KeyId),
    PreventerRecover(usize),
    PreventerResolveIntents(usize),
}

/// Model parameters. `max_attempts` and the key partition are fixed per
/// instance; `num_preventers` controls how many independent preventer
/// processes race the committer (spec §9: "accept any nonnegative number").
pub struct ParallelCommitModel {
    pub max_attempts: u32,
    pub pipelined_keys: BTreeSet<KeyId>,
    pub parallel_keys: BTreeSet<KeyId>,
    pub num_preventers: usize,
}

impl ParallelCommitModel {
    pub fn new(pipelined_keys: &[KeyId], parallel_keys: &[KeyId], num_preventers: usize, max_attempts: u32) -> Self {
        ParallelCommitModel {
            max_attempts,
            pipelined_keys: pipelined_keys.iter().copied().collect(),
            parallel_keys: parallel_keys.iter().copied().collect(),
            num_preventers,
        }
    }

    fn all_keys(&self) -> BTreeSet<KeyId> {
        self.pipelined_keys.union(&self.parallel_keys).copied().collect()
    }

    fn implicit_commit(&self, s: &GlobalState) -> bool {
        s.record.status == RecStatus::Staging
            && KEYS.iter().all(|k| {
                !self.all_keys().contains(k)
                    || s.intents.get(k).map_or(false, |i| {
                        i.epoch == s.record.epoch && i.ts <= s.record.ts && !i.resolved
                    })
            })
    }

    fn explicit_commit(&self, s: &GlobalState) -> bool {
        s.record.status == RecStatus::Committed
    }

    /// Like `implicit_commit`, but ignoring `resolved` (once a record is
    /// COMMITTED, Phase F/P4 may already have resolved its intents, which
    /// would otherwise make `implicit_commit` look false for a transaction
    /// that genuinely committed).
    fn implicit_commit_or_already_resolved(&self, s: &GlobalState) -> bool {
        self.all_keys().iter().all(|k| {
            s.intents.get(k).map_or(false, |i| i.epoch == s.record.epoch && i.ts <= s.record.ts)
        })
    }

    /// Mutates `r` enforcing spec §3.1's invariants: terminal records are
    /// frozen, epoch/ts never decrease. A violation here is a genuine
    /// protocol bug reachable in the explored state space, so it panics
    /// rather than returning an error the checker would swallow.
    fn set_record(r: &mut TxnRecord, status: RecStatus, epoch: u64, ts: u64) {
        assert!(!r.status_is_terminal(), "mutating a terminal record");
        assert!(epoch >= r.epoch, "epoch moved backward");
        assert!(epoch > r.epoch || ts >= r.ts, "ts moved backward at same epoch");
        r.status = status;
        r.epoch = epoch;
        r.ts = ts;
    }
}

impl TxnRecord {
    fn status_is_terminal(&self) -> bool {
        matches!(self.status, RecStatus::Committed | RecStatus::Aborted)
    }
}

impl Model for ParallelCommitModel {
    type State = GlobalState;
    type Action = Action;

    fn init_states(&self) -> Vec<Self::State> {
        let intents: BTreeMap<KeyId, IntentState> =
            KEYS.iter().map(|&k| (k, IntentState::default())).collect();
        let tscache: BTreeMap<KeyId, u64> = KEYS.iter().map(|&k| (k, 0)).collect();
        vec![GlobalState {
            record: TxnRecord::default(),
            intents,
            tscache,
            commit_ack: false,
            committer: CommitterLocal {
                phase: CommitterPhase::BeginEpoch,
                attempt: 0,
                epoch: 0,
                ts: 0,
                to_write: BTreeSet::new(),
                to_check: BTreeSet::new(),
                have_staged_record: false,
                pipelined_keys: self.pipelined_keys.clone(),
                parallel_keys: self.parallel_keys.clone(),
                blocked_on: None,
            },
            preventers: (0..self.num_preventers).map(|_| PreventerLocal::new()).collect(),
        }]
    }

    fn actions(&self, s: &Self::State, actions: &mut Vec<Self::Action>) {
        match s.committer.phase {
            CommitterPhase::BeginEpoch => actions.push(Action::CommitterBeginEpoch),
            CommitterPhase::Pipeline => {
                match s.committer.to_write.iter().next() {
                    Some(&k) => actions.push(Action::CommitterPipelineWrite(k)),
                    None => actions.push(Action::CommitterPipelineWrite(u8::MAX)), // sentinel: advance phase
                }
            }
            CommitterPhase::Stage => {
                if s.committer.blocked_on.is_some() {
                    actions.push(Action::CommitterRefresh);
                    actions.push(Action::CommitterRestart);
                } else {
                    if !s.committer.to_check.is_empty() {
                        for &k in &s.committer.to_check {
                            actions.push(Action::CommitterQueryPipelined(k));
                        }
                    }
                    if !s.committer.to_write.is_empty() {
                        for &k in &s.committer.to_write {
                            actions.push(Action::CommitterParallelWrite(k));
                        }
                    }
                    if !s.committer.have_staged_record {
                        actions.push(Action::CommitterStageRecord);
                    }
                }
            }
            CommitterPhase::AckClient => actions.push(Action::CommitterAckClient),
            CommitterPhase::MakeExplicit => actions.push(Action::CommitterMakeExplicit),
            CommitterPhase::ResolveIntents => actions.push(Action::CommitterResolveIntents),
            CommitterPhase::Done => {}
        }

        for (i, p) in s.preventers.iter().enumerate() {
            match p.phase {
                PreventerPhase::Push => actions.push(Action::PreventerPush(i)),
                PreventerPhase::Prevent => {
                    let remaining = self.all_keys().difference(&p.found_writes).next().copied();
                    if let Some(k) = remaining {
                        actions.push(Action::PreventerCheckKey(i, k));
                    }
                }
                PreventerPhase::Recover => actions.push(Action::PreventerRecover(i)),
                PreventerPhase::ResolveIntents => actions.push(Action::PreventerResolveIntents(i)),
                PreventerPhase::Done => {}
            }
        }
    }

    fn next_state(&self, last: &Self::State, action: Self::Action) -> Option<Self::State> {
        let mut s = last.clone();

        match action {
            Action::CommitterBeginEpoch => {
                if s.committer.attempt > self.max_attempts {
                    s.committer.phase = CommitterPhase::Done;
                    return Some(s);
                }
                s.committer.epoch += 1;
                s.committer.ts += 1;
                s.committer.to_write = s.committer.pipelined_keys.clone();
                s.committer.phase = CommitterPhase::Pipeline;
            }

            Action::CommitterPipelineWrite(k) => {
                if k == u8::MAX {
                    s.committer.to_check = s.committer.pipelined_keys.clone();
                    s.committer.to_write = s.committer.parallel_keys.clone();
                    s.committer.have_staged_record = false;
                    s.committer.phase = CommitterPhase::Stage;
                } else {
                    let intent = s.intents.get_mut(&k)?;
                    if !intent.resolved {
                        let cache_ts = *s.tscache.get(&k)?;
                        if cache_ts >= s.committer.ts {
                            panic!("PipelineWrite protocol violation at key {}", k);
                        }
                        intent.epoch = s.committer.epoch;
                        intent.ts = s.committer.ts;
                    }
                    s.committer.to_write.remove(&k);
                }
            }

            Action::CommitterQueryPipelined(k) => {
                let found = s.intents.get(&k)?.query(s.committer.epoch, s.committer.ts);
                if found {
                    s.committer.to_check.remove(&k);
                } else {
                    s.committer.attempt += 1;
                    s.committer.phase = CommitterPhase::BeginEpoch;
                }
            }

            Action::CommitterParallelWrite(k) => {
                let cur = *s.intents.get(&k)?;
                if cur.epoch == s.committer.epoch {
                    s.committer.to_write.remove(&k);
                } else {
                    let cache_ts = *s.tscache.get(&k)?;
                    if cache_ts >= s.committer.ts || cur.resolved {
                        s.committer.blocked_on = Some(k);
                    } else {
                        let intent = s.intents.get_mut(&k)?;
                        intent.epoch = s.committer.epoch;
                        intent.ts = s.committer.ts;
                        s.committer.to_write.remove(&k);
                    }
                }
            }

            Action::CommitterRefresh => {
                s.committer.attempt += 1;
                s.committer.ts += 1;
                s.committer.to_check = s.committer.pipelined_keys.clone();
                s.committer.to_write = s.committer.parallel_keys.clone();
                s.committer.have_staged_record = false;
                s.committer.blocked_on = None;
            }

            Action::CommitterRestart => {
                s.committer.attempt += 1;
                s.committer.blocked_on = None;
                s.committer.phase = CommitterPhase::BeginEpoch;
            }

            Action::CommitterStageRecord => {
                s.committer.have_staged_record = true;
                match s.record.status {
                    RecStatus::Pending => {
                        Self::set_record(&mut s.record, RecStatus::Staging, s.committer.epoch, s.committer.ts);
                    }
                    RecStatus::Staging => {
                        if !(s.record.epoch <= s.committer.epoch && s.record.ts < s.committer.ts) {
                            panic!("StageRecord: illegal re-stage");
                        }
                        Self::set_record(&mut s.record, RecStatus::Staging, s.committer.epoch, s.committer.ts);
                    }
                    RecStatus::Aborted => {
                        s.committer.phase = CommitterPhase::Done;
                    }
                    RecStatus::Committed => panic!("StageRecord observed COMMITTED while staging"),
                }
                if s.committer.phase != CommitterPhase::Done {
                    let ready = s.committer.to_write.is_empty()
                        && s.committer.to_check.is_empty()
                        && s.committer.have_staged_record;
                    if ready {
                        s.committer.phase = CommitterPhase::AckClient;
                    }
                }
            }

            Action::CommitterAckClient => {
                if !(self.implicit_commit(&s) || self.explicit_commit(&s)) {
                    panic!("AckClient precondition violated");
                }
                s.commit_ack = true;
                s.committer.phase = CommitterPhase::MakeExplicit;
            }

            Action::CommitterMakeExplicit => {
                match s.record.status {
                    RecStatus::Staging => {
                        if !self.implicit_commit(&s) {
                            panic!("MakeExplicit without ImplicitCommit");
                        }
                        Self::set_record(&mut s.record, RecStatus::Committed, s.record.epoch, s.record.ts);
                    }
                    RecStatus::Committed => {}
                    other => panic!("MakeExplicit on {:?}", other),
                }
                s.committer.phase = CommitterPhase::ResolveIntents;
            }

            Action::CommitterResolveIntents => {
                for k in s.committer.pipelined_keys.clone().iter().chain(s.committer.parallel_keys.clone().iter()) {
                    if let Some(i) = s.intents.get_mut(k) {
                        i.resolved = true;
                    }
                }
                s.committer.phase = CommitterPhase::Done;
            }

            Action::PreventerPush(i) => {
                let p = s.preventers.get_mut(i)?;
                match s.record.status {
                    RecStatus::Pending => {
                        p.phase = PreventerPhase::ResolveIntents;
                    }
                    RecStatus::Staging => {
                        p.prevent_epoch = s.record.epoch;
                        p.prevent_ts = s.record.ts;
                        p.found_writes = BTreeSet::new();
                        p.phase = PreventerPhase::Prevent;
                    }
                    RecStatus::Committed | RecStatus::Aborted => {
                        p.phase = PreventerPhase::ResolveIntents;
                    }
                }
                if s.record.status == RecStatus::Pending {
                    Self::set_record(&mut s.record, RecStatus::Aborted, s.record.epoch, s.record.ts);
                }
            }

            Action::PreventerCheckKey(i, k) => {
                let found = s.intents.get(&k)?.query(s.preventers[i].prevent_epoch, s.preventers[i].prevent_ts);
                let p = s.preventers.get_mut(i)?;
                if found {
                    p.found_writes.insert(k);
                    if p.found_writes.len() == self.all_keys().len() {
                        p.prevented = false;
                        p.phase = PreventerPhase::Recover;
                    }
                } else {
                    let ts = p.prevent_ts;
                    p.prevented = true;
                    p.phase = PreventerPhase::Recover;
                    let c = s.tscache.get_mut(&k)?;
                    *c = (*c).max(ts);
                }
            }

            Action::PreventerRecover(i) => {
                let p = s.preventers[i].clone();
                let legal_change = s.record.epoch >= p.prevent_epoch && s.record.ts > p.prevent_ts;
                if p.prevented {
                    match s.record.status {
                        RecStatus::Aborted | RecStatus::Committed => {
                            s.preventers[i].phase = PreventerPhase::ResolveIntents;
                        }
                        RecStatus::Pending => panic!("RecoverRecord(prevented) saw PENDING"),
                        RecStatus::Staging => {
                            if legal_change {
                                s.preventers[i].phase = PreventerPhase::Push;
                            } else {
                                Self::set_record(&mut s.record, RecStatus::Aborted, s.record.epoch, s.record.ts);
                                s.preventers[i].phase = PreventerPhase::ResolveIntents;
                            }
                        }
                    }
                } else {
                    match s.record.status {
                        RecStatus::Pending | RecStatus::Aborted => {
                            panic!("RecoverRecord(not prevented) saw {:?}", s.record.status)
                        }
                        RecStatus::Staging | RecStatus::Committed => {
                            if !(s.record.epoch == p.prevent_epoch && s.record.ts == p.prevent_ts) {
                                panic!("RecoverRecord(not prevented): record moved since snapshot");
                            }
                            if s.record.status == RecStatus::Staging {
                                if !self.implicit_commit(&s) {
                                    panic!("RecoverRecord(not prevented) without ImplicitCommit");
                                }
                                Self::set_record(&mut s.record, RecStatus::Committed, s.record.epoch, s.record.ts);
                            }
                            s.preventers[i].phase = PreventerPhase::ResolveIntents;
                        }
                    }
                }
            }

            Action::PreventerResolveIntents(i) => {
                for k in self.all_keys() {
                    if let Some(intent) = s.intents.get_mut(&k) {
                        intent.resolved = true;
                    }
                }
                s.preventers[i].phase = PreventerPhase::Done;
            }
        }

        Some(s)
    }

    fn properties(&self) -> Vec<Property<Self>> {
        vec![
            // Terminal-record immutability (spec §8.1) is enforced by
            // `set_record`'s own assertions, which abort the search with a
            // panic the moment a transition would violate it, which is
            // stronger than a `Property::always` over reachable states,
            // which could only ever observe the violation after the fact.
            Property::always("epoch/ts/tscache stay within the finite-model bound", |m, s| {
                let bound = m.max_attempts as u64 + 2;
                s.record.epoch <= bound
                    && s.record.ts <= bound
                    && s.tscache.values().all(|&v| v <= bound)
            }),
            Property::always("a COMMITTED record always has a fully-resolved-eligible intent set", |m, s| {
                s.record.status != RecStatus::Committed || m.implicit_commit_or_already_resolved(s)
            }),
            Property::eventually("record reaches a terminal status", |_, s| s.record.status_is_terminal()),
            Property::eventually("every intent is eventually resolved", |_, s| {
                s.intents.values().all(|i| i.resolved)
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateright::Checker;

    #[test]
    fn happy_path_no_preventers_reaches_committed() {
        let model = ParallelCommitModel::new(&[0], &[1], 0, 2);
        model.checker().spawn_bfs().join().assert_properties();
    }

    #[test]
    fn single_preventer_one_key_each() {
        let model = ParallelCommitModel::new(&[], &[0, 1], 1, 2);
        model.checker().spawn_bfs().join().assert_properties();
    }

    #[test]
    fn two_preventers_race_the_committer() {
        let model = ParallelCommitModel::new(&[0], &[1], 2, 2);
        model.checker().spawn_bfs().join().assert_properties();
    }
}
