// The transaction record (spec §3.1): status, epoch and ts, with the
// transition table enforced in one place so neither the committer nor any
// preventer can (even by mistake) walk it through a forbidden edge.

use serde::{Deserialize, Serialize};

use crate::error::fatal;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Staging,
    Committed,
    Aborted,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Committed | Status::Aborted)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TxnRecord {
    pub status: Status,
    pub epoch: u64,
    pub ts: u64,
}

impl Default for TxnRecord {
    fn default() -> Self {
        TxnRecord { status: Status::Pending, epoch: 0, ts: 0 }
    }
}

impl TxnRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committer: PENDING -> STAGING, or STAGING -> STAGING at a strictly
    /// higher (epoch, ts). Fatal on anything else (the committer's own
    /// StageRecord sub-step, spec §4.1 Phase C.3).
    pub fn stage(&mut self, epoch: u64, ts: u64) {
        match self.status {
            Status::Pending => {
                self.status = Status::Staging;
                self.epoch = epoch;
                self.ts = ts;
            }
            Status::Staging => {
                if !(self.epoch <= epoch && self.ts < ts) {
                    fatal!(
                        "StageRecord: illegal re-stage from ({}, {}) to ({}, {})",
                        self.epoch, self.ts, epoch, ts
                    );
                }
                self.epoch = epoch;
                self.ts = ts;
            }
            Status::Committed => fatal!("StageRecord observed COMMITTED while staging"),
            Status::Aborted => { /* caller checks for this and bails out, not our job */ }
        }
    }

    /// Preventer: PENDING -> ABORTED (push before any attempt, spec §4.2 P1).
    pub fn push_abort_pending(&mut self) {
        if self.status != Status::Pending {
            fatal!("push_abort_pending called on non-PENDING record");
        }
        self.status = Status::Aborted;
    }

    /// Preventer: STAGING -> ABORTED (recovered and prevented, spec §4.2 P3).
    pub fn prevent_abort_staging(&mut self) {
        if self.status != Status::Staging {
            fatal!("prevent_abort_staging called on non-STAGING record");
        }
        self.status = Status::Aborted;
    }

    /// Committer or preventer: STAGING -> COMMITTED (implicit commit made
    /// explicit, spec §4.1 Phase E / §4.2 P3).
    pub fn make_committed(&mut self) {
        match self.status {
            Status::Staging => self.status = Status::Committed,
            Status::Committed => { /* someone else beat us to it: no-op */ }
            other => fatal!("make_committed called on {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_staging() {
        let mut r = TxnRecord::new();
        r.stage(1, 1);
        assert_eq!(r, TxnRecord { status: Status::Staging, epoch: 1, ts: 1 });
    }

    #[test]
    fn restage_at_higher_ts() {
        let mut r = TxnRecord { status: Status::Staging, epoch: 1, ts: 1 };
        r.stage(1, 2);
        assert_eq!(r.ts, 2);
    }

    #[test]
    #[should_panic]
    fn restage_at_equal_ts_is_fatal() {
        let mut r = TxnRecord { status: Status::Staging, epoch: 1, ts: 1 };
        r.stage(1, 1);
    }

    #[test]
    #[should_panic]
    fn restage_at_lower_epoch_is_fatal() {
        let mut r = TxnRecord { status: Status::Staging, epoch: 2, ts: 1 };
        r.stage(1, 5);
    }

    #[test]
    fn make_committed_is_idempotent_once_committed() {
        let mut r = TxnRecord { status: Status::Committed, epoch: 1, ts: 1 };
        r.make_committed();
        assert_eq!(r.status, Status::Committed);
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Committed.is_terminal());
        assert!(Status::Aborted.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Staging.is_terminal());
    }
}
