// Spec §9: the interleaving of Phase C's three sub-steps, and the choice
// between Refresh and Restart on a blocked ParallelWrite, are left open by
// the model ("any policy that is weakly fair preserves correctness"). This
// module is where an implementation picks one.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::shared::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubStep {
    QueryPipelinedWrite,
    ParallelWrite,
    StageRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedWriteChoice {
    Refresh,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnabledSubsteps {
    pub query_pipelined_write: bool,
    pub parallel_write: bool,
    pub stage_record: bool,
}

impl EnabledSubsteps {
    fn options(&self) -> Vec<SubStep> {
        let mut v = Vec::with_capacity(3);
        if self.query_pipelined_write {
            v.push(SubStep::QueryPipelinedWrite);
        }
        if self.parallel_write {
            v.push(SubStep::ParallelWrite);
        }
        if self.stage_record {
            v.push(SubStep::StageRecord);
        }
        v
    }
}

/// Chooses the next Phase-C sub-step and the Refresh/Restart branch of a
/// blocked ParallelWrite. Any implementation that is weakly fair (never
/// starves an enabled sub-step forever) preserves the protocol's safety and
/// liveness properties.
pub trait Policy<K: Key>: Send + Sync {
    fn choose_substep(&self, enabled: EnabledSubsteps) -> SubStep;
    fn pick_key(&self, candidates: &BTreeSet<K>) -> K;
    fn on_blocked_write(&self) -> BlockedWriteChoice;
}

/// Deterministic default: prefer query over write over stage, always pick
/// the smallest key, and always refresh before restarting. Weakly fair
/// because every enabled sub-step is eventually the only one left enabled.
#[derive(Debug, Default)]
pub struct FixedPolicy;

impl<K: Key> Policy<K> for FixedPolicy {
    fn choose_substep(&self, enabled: EnabledSubsteps) -> SubStep {
        if enabled.query_pipelined_write {
            SubStep::QueryPipelinedWrite
        } else if enabled.parallel_write {
            SubStep::ParallelWrite
        } else if enabled.stage_record {
            SubStep::StageRecord
        } else {
            unreachable!("choose_substep called with nothing enabled")
        }
    }

    fn pick_key(&self, candidates: &BTreeSet<K>) -> K {
        candidates.iter().next().cloned().expect("pick_key called on empty set")
    }

    fn on_blocked_write(&self) -> BlockedWriteChoice {
        BlockedWriteChoice::Refresh
    }
}

/// Randomized policy used by the demo binary and by tests that want to
/// fuzz the interleaving. Seeded for reproducibility.
pub struct RandomPolicy {
    rng: Mutex<StdRng>,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        RandomPolicy { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl<K: Key> Policy<K> for RandomPolicy {
    fn choose_substep(&self, enabled: EnabledSubsteps) -> SubStep {
        let options = enabled.options();
        assert!(!options.is_empty(), "choose_substep called with nothing enabled");
        let mut rng = self.rng.lock();
        options[rng.gen_range(0..options.len())]
    }

    fn pick_key(&self, candidates: &BTreeSet<K>) -> K {
        assert!(!candidates.is_empty(), "pick_key called on empty set");
        let mut rng = self.rng.lock();
        let idx = rng.gen_range(0..candidates.len());
        candidates.iter().nth(idx).expect("idx in range").clone()
    }

    fn on_blocked_write(&self) -> BlockedWriteChoice {
        if self.rng.lock().gen_bool(0.5) {
            BlockedWriteChoice::Refresh
        } else {
            BlockedWriteChoice::Restart
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_prefers_query_then_write_then_stage() {
        let p = FixedPolicy;
        let all = EnabledSubsteps { query_pipelined_write: true, parallel_write: true, stage_record: true };
        assert_eq!(<FixedPolicy as Policy<&str>>::choose_substep(&p, all), SubStep::QueryPipelinedWrite);
        let no_query = EnabledSubsteps { query_pipelined_write: false, parallel_write: true, stage_record: true };
        assert_eq!(<FixedPolicy as Policy<&str>>::choose_substep(&p, no_query), SubStep::ParallelWrite);
        let stage_only = EnabledSubsteps { query_pipelined_write: false, parallel_write: false, stage_record: true };
        assert_eq!(<FixedPolicy as Policy<&str>>::choose_substep(&p, stage_only), SubStep::StageRecord);
    }

    #[test]
    fn fixed_policy_picks_smallest_key() {
        let p = FixedPolicy;
        let candidates: BTreeSet<&str> = ["b", "a", "c"].into_iter().collect();
        assert_eq!(<FixedPolicy as Policy<&str>>::pick_key(&p, &candidates), "a");
    }

    #[test]
    fn random_policy_only_returns_enabled_substeps() {
        let p = RandomPolicy::new(42);
        let enabled = EnabledSubsteps { query_pipelined_write: false, parallel_write: true, stage_record: false };
        for _ in 0..20 {
            assert_eq!(<RandomPolicy as Policy<&str>>::choose_substep(&p, enabled), SubStep::ParallelWrite);
        }
    }
}
