// A per-key intent write (spec §3.2): epoch, ts, resolved. Once resolved the
// entry is terminal, no field of it may change again, and laying a new
// write at that key is forbidden (the transaction must restart at a new
// epoch).

use serde::{Deserialize, Serialize};

use crate::error::fatal;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Intent {
    pub epoch: u64,
    pub ts: u64,
    pub resolved: bool,
}

impl Default for Intent {
    fn default() -> Self {
        Intent { epoch: 0, ts: 0, resolved: false }
    }
}

impl Intent {
    pub fn new() -> Self {
        Self::default()
    }

    /// `QueryIntent(k, e, t)` from spec §3.5: does an unresolved intent at
    /// `k` exist at epoch `e` with ts at most `t`?
    pub fn query(&self, epoch: u64, ts: u64) -> bool {
        !self.resolved && self.epoch == epoch && self.ts <= ts
    }

    /// Lay (or idempotently re-confirm) a write at `(epoch, ts)`. Intents
    /// never move backward and a resolved entry is terminal.
    pub fn lay(&mut self, epoch: u64, ts: u64) {
        if self.resolved {
            fatal!("lay() called on a resolved intent");
        }
        if epoch < self.epoch || (epoch == self.epoch && ts < self.ts) {
            fatal!(
                "lay() would move intent backward: ({}, {}) -> ({}, {})",
                self.epoch, self.ts, epoch, ts
            );
        }
        self.epoch = epoch;
        self.ts = ts;
    }

    pub fn resolve(&mut self) {
        self.resolved = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_matches_epoch_and_ts_bound() {
        let i = Intent { epoch: 1, ts: 3, resolved: false };
        assert!(i.query(1, 3));
        assert!(i.query(1, 5));
        assert!(!i.query(1, 2));
        assert!(!i.query(2, 3));
    }

    #[test]
    fn resolved_intent_never_matches_query() {
        let i = Intent { epoch: 1, ts: 1, resolved: true };
        assert!(!i.query(1, 1));
    }

    #[test]
    fn lay_advances_in_place() {
        let mut i = Intent::new();
        i.lay(1, 1);
        i.lay(1, 2);
        assert_eq!(i, Intent { epoch: 1, ts: 2, resolved: false });
    }

    #[test]
    #[should_panic]
    fn lay_on_resolved_is_fatal() {
        let mut i = Intent { epoch: 1, ts: 1, resolved: true };
        i.lay(2, 1);
    }

    #[test]
    #[should_panic]
    fn lay_backward_is_fatal() {
        let mut i = Intent { epoch: 2, ts: 5, resolved: false };
        i.lay(2, 3);
    }

    #[test]
    fn resolve_is_terminal() {
        let mut i = Intent { epoch: 1, ts: 1, resolved: false };
        i.resolve();
        assert!(i.resolved);
    }
}
