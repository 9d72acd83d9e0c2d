//! Backlog computation
//!
//! Compares the newest release already mirrored downstream (the ledger
//! marker) with the upstream release list and yields the releases still to
//! publish, oldest first.

use crate::core::error::ReconciliationWarning;
use crate::core::traits::ReleaseInfo;
use serde::Serialize;
use tracing::{info, warn};

/// How a backlog was derived from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum BacklogBasis {
    /// Nothing mirrored yet; the whole upstream list is replayed
    NoLedger,
    /// Ledger marker found at this index of the upstream list
    AfterLedger { index: usize },
    /// Ledger marker not present upstream; the whole list is replayed
    LedgerNotFound,
    /// Ledger marker had no usable name; nothing is processed
    UnusableLedger,
}

/// Releases to publish, oldest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backlog {
    pub entries: Vec<ReleaseInfo>,
    pub basis: BacklogBasis,
}

impl Backlog {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|r| r.name.as_str()).collect()
    }

    fn replay(all_upstream: &[ReleaseInfo], basis: BacklogBasis) -> Self {
        Self {
            entries: all_upstream.iter().rev().cloned().collect(),
            basis,
        }
    }
}

/// Compute the ordered backlog.
///
/// `all_upstream` is newest first, as the feed returns it.
pub fn compute_backlog(
    latest_mirrored: Option<&ReleaseInfo>,
    all_upstream: &[ReleaseInfo],
) -> Backlog {
    let backlog = match latest_mirrored {
        None => Backlog::replay(all_upstream, BacklogBasis::NoLedger),
        Some(marker) if marker.name.is_empty() => {
            warn!("{}", ReconciliationWarning::UnusableLedgerEntry);
            Backlog {
                entries: Vec::new(),
                basis: BacklogBasis::UnusableLedger,
            }
        }
        Some(marker) => {
            let ledger = marker.name.to_lowercase();
            match all_upstream
                .iter()
                .position(|r| r.name.to_lowercase() == ledger)
            {
                Some(index) => Backlog {
                    entries: all_upstream[..index].iter().rev().cloned().collect(),
                    basis: BacklogBasis::AfterLedger { index },
                },
                None => {
                    warn!(
                        ledger = %marker.name,
                        "latest mirrored release not found upstream, replaying all releases"
                    );
                    Backlog::replay(all_upstream, BacklogBasis::LedgerNotFound)
                }
            }
        }
    };

    info!(count = backlog.len(), basis = ?backlog.basis, "releases that need processing");
    backlog
}
