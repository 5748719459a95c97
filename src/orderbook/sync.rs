//! Sequence checks between a replica and an incoming diff.
//!
//! Venues link their diffs in one of two ways, and each adapter picks the
//! matching [`GapPolicy`]:
//!
//! - [`GapPolicy::Linked`]: every diff carries the last id of the previous
//!   one (`prior_seq`). Binance futures work this way.
//! - [`GapPolicy::Contiguous`]: diffs cover `[first_seq, last_seq]` and the
//!   next diff must start at `last_seq + 1`. Binance spot and Gate work this
//!   way.

use std::fmt;

use crate::types::{DiffMessage, Sequence};

/// How a venue links consecutive diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Diffs carry the previous diff's last id
    Linked,
    /// Diffs cover consecutive id ranges
    #[default]
    Contiguous,
}

/// Why a replica has to be rebuilt from a fresh snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// No snapshot has been applied yet
    NoSnapshot,
    /// Diffs were missed while the book was live
    Gap {
        /// Id the next diff should have continued from
        expected: Sequence,
        /// Id the diff actually continued from
        got: Sequence,
    },
    /// The stream is already past the snapshot; it can never catch up
    SnapshotBehind {
        /// Snapshot id
        snapshot: Sequence,
        /// First id of the diff that overtook it
        first: Sequence,
    },
    /// Diffs were dropped before reaching the replica
    Overflow,
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncReason::NoSnapshot => write!(f, "no snapshot"),
            ResyncReason::Gap { expected, got } => {
                write!(f, "sequence gap: expected {}, got {}", expected, got)
            }
            ResyncReason::SnapshotBehind { snapshot, first } => {
                write!(f, "snapshot {} behind stream at {}", snapshot, first)
            }
            ResyncReason::Overflow => write!(f, "diff queue overflowed"),
        }
    }
}

/// Result of checking a diff against the replica's sequence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCheck {
    /// Apply the diff; `becomes_ready` is set on the diff that catches up
    /// with the snapshot
    Apply {
        /// Whether applying this diff makes the replica ready
        becomes_ready: bool,
    },
    /// Late or duplicate delivery; drop without touching the replica
    Stale,
    /// Do not apply; fetch a fresh snapshot
    Resync(ResyncReason),
}

impl GapPolicy {
    /// Check `diff` against a replica at `last_sequence`
    #[must_use]
    pub fn check(self, ready: bool, last_sequence: Sequence, diff: &DiffMessage) -> SyncCheck {
        if last_sequence == 0 {
            return SyncCheck::Resync(ResyncReason::NoSnapshot);
        }
        if diff.last_seq < last_sequence {
            return SyncCheck::Stale;
        }

        let next = last_sequence + 1;
        match (self, ready) {
            (GapPolicy::Linked, false) => {
                let straddles = diff.first_seq <= last_sequence;
                if straddles || diff.prior_seq == Some(last_sequence) {
                    SyncCheck::Apply {
                        becomes_ready: true,
                    }
                } else {
                    SyncCheck::Resync(ResyncReason::SnapshotBehind {
                        snapshot: last_sequence,
                        first: diff.first_seq,
                    })
                }
            }
            (GapPolicy::Linked, true) => match diff.prior_seq {
                Some(prior) if prior == last_sequence => SyncCheck::Apply {
                    becomes_ready: false,
                },
                prior => SyncCheck::Resync(ResyncReason::Gap {
                    expected: last_sequence,
                    got: prior.unwrap_or_else(|| diff.first_seq.saturating_sub(1)),
                }),
            },
            (GapPolicy::Contiguous, false) => {
                if diff.first_seq <= next {
                    SyncCheck::Apply {
                        becomes_ready: true,
                    }
                } else {
                    SyncCheck::Resync(ResyncReason::SnapshotBehind {
                        snapshot: last_sequence,
                        first: diff.first_seq,
                    })
                }
            }
            (GapPolicy::Contiguous, true) => {
                if diff.first_seq > next {
                    SyncCheck::Resync(ResyncReason::Gap {
                        expected: next,
                        got: diff.first_seq,
                    })
                } else {
                    SyncCheck::Apply {
                        becomes_ready: false,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(first: Sequence, last: Sequence, prior: Option<Sequence>) -> DiffMessage {
        DiffMessage {
            instrument: "BTC_USDT".into(),
            first_seq: first,
            last_seq: last,
            prior_seq: prior,
            bids: vec![],
            asks: vec![],
            server_time: 0,
        }
    }

    #[test]
    fn test_empty_replica_resyncs() {
        for policy in [GapPolicy::Linked, GapPolicy::Contiguous] {
            assert_eq!(
                policy.check(false, 0, &diff(1, 5, Some(0))),
                SyncCheck::Resync(ResyncReason::NoSnapshot)
            );
        }
    }

    #[test]
    fn test_stale_dropped_before_gap_check() {
        for policy in [GapPolicy::Linked, GapPolicy::Contiguous] {
            assert_eq!(policy.check(true, 100, &diff(90, 95, Some(89))), SyncCheck::Stale);
            assert_eq!(policy.check(false, 100, &diff(90, 95, Some(89))), SyncCheck::Stale);
        }
    }

    #[test]
    fn test_linked_catch_up() {
        let policy = GapPolicy::Linked;
        // range contains the snapshot id
        assert_eq!(
            policy.check(false, 10, &diff(8, 12, Some(7))),
            SyncCheck::Apply { becomes_ready: true }
        );
        // links directly to it
        assert_eq!(
            policy.check(false, 10, &diff(11, 11, Some(10))),
            SyncCheck::Apply { becomes_ready: true }
        );
        // stream already past the snapshot
        assert_eq!(
            policy.check(false, 10, &diff(15, 20, Some(14))),
            SyncCheck::Resync(ResyncReason::SnapshotBehind {
                snapshot: 10,
                first: 15
            })
        );
    }

    #[test]
    fn test_linked_gap_when_ready() {
        let policy = GapPolicy::Linked;
        assert_eq!(
            policy.check(true, 10, &diff(11, 11, Some(10))),
            SyncCheck::Apply {
                becomes_ready: false
            }
        );
        assert_eq!(
            policy.check(true, 10, &diff(13, 14, Some(12))),
            SyncCheck::Resync(ResyncReason::Gap {
                expected: 10,
                got: 12
            })
        );
    }

    #[test]
    fn test_contiguous_rules() {
        let policy = GapPolicy::Contiguous;
        assert_eq!(
            policy.check(false, 10, &diff(5, 11, None)),
            SyncCheck::Apply { becomes_ready: true }
        );
        assert_eq!(
            policy.check(false, 10, &diff(12, 13, None)),
            SyncCheck::Resync(ResyncReason::SnapshotBehind {
                snapshot: 10,
                first: 12
            })
        );
        assert_eq!(
            policy.check(true, 10, &diff(11, 12, None)),
            SyncCheck::Apply {
                becomes_ready: false
            }
        );
        assert_eq!(
            policy.check(true, 10, &diff(13, 14, None)),
            SyncCheck::Resync(ResyncReason::Gap {
                expected: 11,
                got: 13
            })
        );
    }

    #[test]
    fn test_reason_display() {
        let reason = ResyncReason::Gap {
            expected: 11,
            got: 13,
        };
        assert_eq!(reason.to_string(), "sequence gap: expected 11, got 13");
    }
}
