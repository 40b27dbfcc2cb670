// A small illustrative driver over `submerge_txn`: wires up a committer and
// any number of racing preventers against a shared set of keys, the way an
// external client and a set of contending readers would in a real
// deployment. Not itself part of the protocol; kept separate so it can be
// exercised from a binary without pulling demo scaffolding into the library.

use std::sync::Arc;

use submerge_txn::committer::{Committer, Outcome as CommitOutcome};
use submerge_txn::preventer::{Outcome as PreventOutcome, Preventer};
use submerge_txn::{Config, RandomPolicy, SharedTxnState};

pub struct DemoOutcome {
    pub committer: CommitOutcome,
    pub preventers: Vec<PreventOutcome>,
}

/// Runs one transaction to completion: a committer over `pipelined_keys` and
/// `parallel_keys`, racing `num_preventers` independent preventers over the
/// full key set. Returns once every participant has terminated.
pub fn run_demo(
    pipelined_keys: Vec<&'static str>,
    parallel_keys: Vec<&'static str>,
    num_preventers: usize,
    config: Config,
    seed: u64,
) -> DemoOutcome {
    let all_keys: Vec<&'static str> =
        pipelined_keys.iter().chain(parallel_keys.iter()).copied().collect();
    let state = Arc::new(SharedTxnState::new(all_keys.iter().copied()));

    let committer_state = state.clone();
    let committer_pipelined = pipelined_keys.clone();
    let committer_parallel = parallel_keys.clone();
    let committer_handle = std::thread::spawn(move || {
        Committer::new(committer_state, config, committer_pipelined, committer_parallel)
            .with_policy(Box::new(RandomPolicy::new(seed)))
            .run()
    });

    let preventer_handles: Vec<_> = (0..num_preventers)
        .map(|_| {
            let preventer_state = state.clone();
            let keys = all_keys.clone();
            std::thread::spawn(move || Preventer::new(preventer_state, keys).run_until_terminal())
        })
        .collect();

    let committer = committer_handle.join().expect("committer thread panicked");
    let preventers = preventer_handles
        .into_iter()
        .map(|h| h.join().expect("preventer thread panicked"))
        .collect();

    DemoOutcome { committer, preventers }
}
