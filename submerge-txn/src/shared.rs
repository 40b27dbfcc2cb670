// The four shared objects of spec §2, each mutated under the atomic-step
// discipline of spec §5: a single critical section on `record`, per-key
// critical sections on `intents` and `tscache`, and a one-shot flag for
// `commit_ack`. Every public method here corresponds to exactly one named
// step from §4/§5 (Phase A/B/C.1/C.2/C.3/D/E/F on the committer side,
// P1/P2/P3/P4 on the preventer side) and is atomic with respect to the
// objects it touches.
//
// `dashmap` gives the per-key sharding spec §5 asks for; `parking_lot`
// gives a cheap mutex for the single-record critical section. Neither crate
// appears in the rest of this workspace; both are carried over from
// `stratadb-labs-strata-core`, which uses exactly this pair for the same
// purpose.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::fatal;
use crate::intent::Intent;
use crate::record::{Status, TxnRecord};
use crate::tscache::TsCacheEntry;

/// The key type used throughout `submerge-txn`. Mirrors the bound
/// `submerge-net::Data` applies to its own message payloads.
pub trait Key: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}
impl<T> Key for T where T: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static {}

/// What happened when the committer tried a pipelined write (spec §4.1
/// Phase B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Written,
    /// The intent at this key was already resolved; dropped without
    /// writing. The corresponding QueryIntent in Phase C is expected to
    /// fail and trigger a restart.
    AlreadyResolved,
}

/// What happened when the committer tried a parallel write (spec §4.1
/// Phase C.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelWriteOutcome {
    /// Intent already present from a previous refresh at this epoch.
    Idempotent,
    Written,
    Blocked,
}

pub struct SharedTxnState<K: Key> {
    record: Mutex<TxnRecord>,
    intents: DashMap<K, Intent>,
    tscache: DashMap<K, TsCacheEntry>,
    commit_ack: AtomicBool,
}

impl<K: Key> SharedTxnState<K> {
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        let intents = DashMap::new();
        let tscache = DashMap::new();
        for k in keys {
            intents.insert(k.clone(), Intent::new());
            tscache.insert(k, TsCacheEntry::default());
        }
        SharedTxnState {
            record: Mutex::new(TxnRecord::new()),
            intents,
            tscache,
            commit_ack: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> BTreeSet<K> {
        self.intents.iter().map(|e| e.key().clone()).collect()
    }

    pub fn record(&self) -> TxnRecord {
        *self.record.lock()
    }

    pub fn commit_ack(&self) -> bool {
        self.commit_ack.load(Ordering::SeqCst)
    }

    pub fn intent_of(&self, k: &K) -> Intent {
        *self.intents.get(k).unwrap_or_else(|| fatal!("intent_of: unknown key {:?}", k))
    }

    pub fn tscache_of(&self, k: &K) -> u64 {
        self.tscache.get(k).map(|e| e.get()).unwrap_or_else(|| fatal!("tscache_of: unknown key {:?}", k))
    }

    /// Phase A: begin (or restart) an epoch. Touches only local committer
    /// state, no shared object (kept here only as documentation); the real
    /// work is in `committer::Committer`.
    /// Phase B: PipelineWrite for a single key.
    pub fn pipeline_write(&self, k: &K, txn_epoch: u64, txn_ts: u64) -> PipelineOutcome {
        let mut intent = self.intents.get_mut(k).unwrap_or_else(|| fatal!("pipeline_write: unknown key {:?}", k));
        if intent.resolved {
            return PipelineOutcome::AlreadyResolved;
        }
        let cache_ts = self.tscache_of(k);
        if cache_ts >= txn_ts {
            fatal!(
                "PipelineWrite protocol violation at key {:?}: tscache={} >= txn_ts={}",
                k, cache_ts, txn_ts
            );
        }
        intent.lay(txn_epoch, txn_ts);
        PipelineOutcome::Written
    }

    /// Phase C.1: QueryPipelinedWrite for a single key.
    pub fn query_intent(&self, k: &K, epoch: u64, ts: u64) -> bool {
        self.intents.get(k).unwrap_or_else(|| fatal!("query_intent: unknown key {:?}", k)).query(epoch, ts)
    }

    /// Phase C.2: ParallelWrite for a single key. Locks `intents[k]` then
    /// `tscache[k]`, in that fixed order everywhere in this module, so the
    /// decision and the mutation it implies are atomic together.
    pub fn parallel_write(&self, k: &K, txn_epoch: u64, txn_ts: u64) -> ParallelWriteOutcome {
        let mut intent = self.intents.get_mut(k).unwrap_or_else(|| fatal!("parallel_write: unknown key {:?}", k));
        if intent.epoch == txn_epoch {
            return ParallelWriteOutcome::Idempotent;
        }
        let cache_ts = self.tscache.get(k).map(|e| e.get()).unwrap_or_else(|| fatal!("parallel_write: unknown key {:?}", k));
        if cache_ts >= txn_ts || intent.resolved {
            return ParallelWriteOutcome::Blocked;
        }
        intent.lay(txn_epoch, txn_ts);
        ParallelWriteOutcome::Written
    }

    /// Phase C.3 / P3: stage (or re-stage) the record at `(epoch, ts)`.
    /// Panics (via `TxnRecord::stage`) on an illegal re-stage or if found
    /// COMMITTED. Returns the record status observed *before* the attempt,
    /// so callers can detect ABORTED without a second lock acquisition.
    pub fn stage_record(&self, epoch: u64, ts: u64) -> Status {
        let mut r = self.record.lock();
        let before = r.status;
        if before == Status::Aborted {
            return before;
        }
        r.stage(epoch, ts);
        before
    }

    /// P1: push a PENDING record straight to ABORTED.
    pub fn push_abort_pending(&self) {
        self.record.lock().push_abort_pending();
    }

    /// P3 (`prevented` branch): abort a STAGING record.
    pub fn prevent_abort_staging(&self) {
        self.record.lock().prevent_abort_staging();
    }

    /// Bump `tscache[k]` to at least `ts` (spec §4.2 P2).
    pub fn bump_tscache(&self, k: &K, ts: u64) {
        self.tscache
            .get_mut(k)
            .unwrap_or_else(|| fatal!("bump_tscache: unknown key {:?}", k))
            .bump(ts);
    }

    /// `ImplicitCommit` (spec §3.5), evaluated against a just-read record
    /// snapshot and the current intents.
    pub fn implicit_commit_at(&self, r: &TxnRecord) -> bool {
        if r.status != Status::Staging {
            return false;
        }
        self.intents.iter().all(|e| {
            let i = *e.value();
            i.epoch == r.epoch && i.ts <= r.ts && !i.resolved
        })
    }

    pub fn implicit_commit(&self) -> bool {
        let r = self.record();
        self.implicit_commit_at(&r)
    }

    pub fn explicit_commit(&self) -> bool {
        self.record().status == Status::Committed
    }

    /// Phase D: ack the client. Precondition (checked, fatal if violated):
    /// `ImplicitCommit \/ ExplicitCommit`.
    pub fn ack_client(&self) {
        if !(self.implicit_commit() || self.explicit_commit()) {
            fatal!("AckClient precondition violated: neither implicit nor explicit commit");
        }
        self.commit_ack.store(true, Ordering::SeqCst);
    }

    /// Phase E: make an implicit commit explicit.
    pub fn make_explicit(&self) {
        let mut r = self.record.lock();
        match r.status {
            Status::Staging => {
                if !self.implicit_commit_at(&r) {
                    fatal!("make_explicit called without ImplicitCommit holding");
                }
                r.make_committed();
            }
            Status::Committed => { /* a preventer beat us to it */ }
            other => fatal!("make_explicit called on {:?}", other),
        }
    }

    /// P3 (`¬prevented` branch): STAGING or COMMITTED record with
    /// `(epoch, ts)` confirmed equal to the preventer's snapshot; if still
    /// STAGING, require `ImplicitCommit` and make it explicit.
    pub fn confirm_committed(&self) {
        let mut r = self.record.lock();
        match r.status {
            Status::Staging => {
                if !self.implicit_commit_at(&r) {
                    fatal!("confirm_committed called without ImplicitCommit holding");
                }
                r.make_committed();
            }
            Status::Committed => {}
            other => fatal!("confirm_committed called on {:?}", other),
        }
    }

    /// Phase F / P4: resolve a single key's intent. Idempotent.
    pub fn resolve_intent(&self, k: &K) {
        self.intents
            .get_mut(k)
            .unwrap_or_else(|| fatal!("resolve_intent: unknown key {:?}", k))
            .resolve();
    }
}
