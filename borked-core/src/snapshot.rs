//! Snapshot change detection.
//!
//! Decides whether a freshly computed aggregate differs enough from the
//! latest stored snapshot to be recorded. History grows on any
//! state-relevant change, and at least once a day otherwise.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::model::ProjectSnapshot;

/// Maximum age of the latest snapshot before a new one is forced.
pub const SNAPSHOT_MAX_AGE_HOURS: i64 = 24;

/// The aggregate computed for a project in the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCandidate {
    pub total_prs: u32,
    pub failed_numbers: BTreeSet<u64>,
}

/// Why a new snapshot is warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    NoPrevious,
    Stale,
    TotalChanged,
    FailedCountChanged,
    FailedSetChanged,
}

impl SnapshotTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoPrevious => "no previous snapshot",
            Self::Stale => "previous snapshot older than 24h",
            Self::TotalChanged => "open PR count changed",
            Self::FailedCountChanged => "failing PR count changed",
            Self::FailedSetChanged => "failing PR set changed",
        }
    }
}

/// Returns the first reason a new snapshot must be written, or `None` when the
/// previous snapshot still describes the candidate.
///
/// Checks run in a fixed order so the reported trigger is deterministic.
pub fn snapshot_trigger(
    previous: Option<&ProjectSnapshot>,
    candidate: &SnapshotCandidate,
    now: DateTime<Utc>,
) -> Option<SnapshotTrigger> {
    let Some(previous) = previous else {
        return Some(SnapshotTrigger::NoPrevious);
    };

    if previous.created_at < now - Duration::hours(SNAPSHOT_MAX_AGE_HOURS) {
        return Some(SnapshotTrigger::Stale);
    }

    if previous.number_of_prs != candidate.total_prs {
        return Some(SnapshotTrigger::TotalChanged);
    }

    let candidate_failed = candidate.failed_numbers.len();
    if usize::try_from(previous.number_of_failed_prs).ok() != Some(candidate_failed) {
        return Some(SnapshotTrigger::FailedCountChanged);
    }

    // BTreeSet equality is an ordered element-wise comparison of both sets,
    // so the order the numbers were stored in is irrelevant.
    if previous.failed_pr_numbers != candidate.failed_numbers {
        return Some(SnapshotTrigger::FailedSetChanged);
    }

    None
}

/// Convenience wrapper over [`snapshot_trigger`].
pub fn should_snapshot(
    previous: Option<&ProjectSnapshot>,
    candidate: &SnapshotCandidate,
    now: DateTime<Utc>,
) -> bool {
    snapshot_trigger(previous, candidate, now).is_some()
}

/// Encode a failed-number set for storage as a JSON array.
pub fn encode_failed_numbers(numbers: &BTreeSet<u64>) -> String {
    // Serializing a set of integers can't fail.
    serde_json::to_string(numbers).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a stored failed-number list.
///
/// Missing, empty or unparseable values decode to an empty set so change
/// detection never fails on bad history. Duplicates and ordering in the stored
/// value are irrelevant.
pub fn decode_failed_numbers(raw: Option<&str>) -> BTreeSet<u64> {
    let Some(raw) = raw else {
        return BTreeSet::new();
    };
    if raw.trim().is_empty() {
        return BTreeSet::new();
    }
    match serde_json::from_str::<Vec<u64>>(raw) {
        Ok(numbers) => numbers.into_iter().collect(),
        Err(e) => {
            warn!(
                "Failed to decode stored failed PR numbers '{}': {}. Treating as empty.",
                raw, e
            );
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProjectId, SnapshotId};
    use proptest::prelude::*;

    fn snapshot(
        created_at: DateTime<Utc>,
        total: u32,
        failed: &[u64],
    ) -> ProjectSnapshot {
        let set: BTreeSet<u64> = failed.iter().copied().collect();
        ProjectSnapshot {
            id: SnapshotId(1),
            project_id: ProjectId(1),
            created_at,
            number_of_prs: total,
            number_of_failed_prs: set.len() as u32,
            failed_pr_numbers: set,
        }
    }

    fn candidate(total: u32, failed: &[u64]) -> SnapshotCandidate {
        SnapshotCandidate {
            total_prs: total,
            failed_numbers: failed.iter().copied().collect(),
        }
    }

    #[test]
    fn test_no_previous_triggers() {
        let now = Utc::now();
        assert_eq!(
            snapshot_trigger(None, &candidate(0, &[]), now),
            Some(SnapshotTrigger::NoPrevious)
        );
    }

    #[test]
    fn test_identical_recent_snapshot_is_reused() {
        let now = Utc::now();
        let prev = snapshot(now - Duration::hours(1), 3, &[5, 7]);
        assert!(!should_snapshot(Some(&prev), &candidate(3, &[7, 5]), now));
    }

    #[test]
    fn test_stale_snapshot_triggers_with_identical_values() {
        let now = Utc::now();
        let prev = snapshot(now - Duration::hours(25), 3, &[5]);
        assert_eq!(
            snapshot_trigger(Some(&prev), &candidate(3, &[5]), now),
            Some(SnapshotTrigger::Stale)
        );
    }

    #[test]
    fn test_exactly_24h_is_not_stale() {
        let now = Utc::now();
        let prev = snapshot(now - Duration::hours(24), 3, &[5]);
        assert!(!should_snapshot(Some(&prev), &candidate(3, &[5]), now));
    }

    #[test]
    fn test_total_change_triggers() {
        let now = Utc::now();
        let prev = snapshot(now, 3, &[5]);
        assert_eq!(
            snapshot_trigger(Some(&prev), &candidate(4, &[5]), now),
            Some(SnapshotTrigger::TotalChanged)
        );
    }

    #[test]
    fn test_failed_count_change_triggers() {
        let now = Utc::now();
        let prev = snapshot(now, 3, &[5]);
        assert_eq!(
            snapshot_trigger(Some(&prev), &candidate(3, &[5, 6]), now),
            Some(SnapshotTrigger::FailedCountChanged)
        );
    }

    #[test]
    fn test_same_count_different_members_triggers() {
        let now = Utc::now();
        let prev = snapshot(now, 2, &[10]);
        assert_eq!(
            snapshot_trigger(Some(&prev), &candidate(2, &[12]), now),
            Some(SnapshotTrigger::FailedSetChanged)
        );
    }

    #[test]
    fn test_stored_count_disagreeing_with_decoded_set_triggers() {
        // A corrupt list decodes to empty while the count column still says 2.
        let now = Utc::now();
        let mut prev = snapshot(now, 4, &[]);
        prev.number_of_failed_prs = 2;
        assert_eq!(
            snapshot_trigger(Some(&prev), &candidate(4, &[]), now),
            Some(SnapshotTrigger::FailedCountChanged)
        );
    }

    #[test]
    fn test_decode_valid_unsorted_with_duplicates() {
        let set = decode_failed_numbers(Some("[12, 3, 12, 7]"));
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![3, 7, 12]);
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        assert!(decode_failed_numbers(Some("not json")).is_empty());
        assert!(decode_failed_numbers(Some("{\"a\":1}")).is_empty());
        assert!(decode_failed_numbers(Some("")).is_empty());
        assert!(decode_failed_numbers(None).is_empty());
    }

    #[test]
    fn test_encode_is_sorted_json_array() {
        let set: BTreeSet<u64> = [9, 1, 4].into_iter().collect();
        assert_eq!(encode_failed_numbers(&set), "[1,4,9]");
        assert_eq!(encode_failed_numbers(&BTreeSet::new()), "[]");
    }

    proptest! {
        /// Reordering the stored history never produces a spurious snapshot.
        #[test]
        fn prop_order_of_stored_numbers_is_irrelevant(
            numbers in proptest::collection::vec(0u64..10_000, 0..40),
            total_extra in 0u32..20,
        ) {
            let now = Utc::now();
            let mut shuffled = numbers.clone();
            shuffled.reverse();
            let stored = decode_failed_numbers(Some(&serde_json::to_string(&shuffled).unwrap()));
            let prev = ProjectSnapshot {
                id: SnapshotId(1),
                project_id: ProjectId(1),
                created_at: now,
                number_of_prs: stored.len() as u32 + total_extra,
                number_of_failed_prs: stored.len() as u32,
                failed_pr_numbers: stored,
            };
            let cand = SnapshotCandidate {
                total_prs: prev.number_of_prs,
                failed_numbers: numbers.into_iter().collect(),
            };
            prop_assert!(!should_snapshot(Some(&prev), &cand, now));
        }

        /// A different failing set of the same size is always detected.
        #[test]
        fn prop_any_membership_change_is_detected(
            base in proptest::collection::btree_set(0u64..1_000, 1..20),
            replacement in 1_000u64..2_000,
        ) {
            let now = Utc::now();
            let prev = ProjectSnapshot {
                id: SnapshotId(1),
                project_id: ProjectId(1),
                created_at: now,
                number_of_prs: 50,
                number_of_failed_prs: base.len() as u32,
                failed_pr_numbers: base.clone(),
            };
            let mut changed = base.clone();
            let first = *changed.iter().next().unwrap();
            changed.remove(&first);
            changed.insert(replacement);
            let cand = SnapshotCandidate { total_prs: 50, failed_numbers: changed };
            prop_assert_eq!(
                snapshot_trigger(Some(&prev), &cand, now),
                Some(SnapshotTrigger::FailedSetChanged)
            );
        }
    }
}
