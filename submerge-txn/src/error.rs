// Recoverable errors the protocol's own state machines branch on (spec §7),
// plus a `fatal!` escape hatch for the conditions §7 says must never be
// surfaced as a recoverable `Result`: a violated invariant or an
// external-storage bug.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnError {
    /// A ParallelWrite found `tscache[k] >= txn_ts` or a resolved intent at `k`.
    WriteTooOld,
    /// QueryPipelinedWrite did not find the expected intent.
    IntentMissing,
    /// The record was observed ABORTED mid-protocol.
    AbortObserved,
}

impl fmt::Display for TxnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnError::WriteTooOld => write!(f, "write too old"),
            TxnError::IntentMissing => write!(f, "intent missing"),
            TxnError::AbortObserved => write!(f, "abort observed"),
        }
    }
}

impl std::error::Error for TxnError {}

impl TxnError {
    /// Crosses into the workspace-wide error boundary, picking up a
    /// backtrace via `submerge_base`'s blanket `From` impl.
    pub fn into_base(self) -> submerge_base::Error {
        self.into()
    }
}

/// Logs then panics. Used only for the conditions spec §7 calls fatal:
/// a protocol-invariant violation or an external-storage contract
/// violation. Never returned as a `Result`.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!(target: "submerge_txn", "{}", msg);
        panic!("{}", msg);
    }};
}

pub(crate) use fatal;

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn display_matches_variant() {
        assert_eq!(TxnError::WriteTooOld.to_string(), "write too old");
        assert_eq!(TxnError::IntentMissing.to_string(), "intent missing");
        assert_eq!(TxnError::AbortObserved.to_string(), "abort observed");
    }

    #[test]
    #[should_panic(expected = "boom 42")]
    fn fatal_panics() {
        fatal!("boom {}", 42);
    }

    #[test_log::test]
    fn crosses_into_base_error() {
        let _base: submerge_base::Error = TxnError::IntentMissing.into_base();
    }
}
