use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Instant;

/// Secondary key for trackers that only care about the primary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NoSecondaryKey;

struct FreshnessStatus<S> {
    /// When the primary key was last marked out-of-date. Never goes back to
    /// `None`: an operation that began before this instant must not restore
    /// freshness.
    last_out_of_date: Option<Instant>,
    up_to_date_secondary_keys: HashSet<S>,
}

impl<S> Default for FreshnessStatus<S> {
    fn default() -> Self {
        FreshnessStatus { last_out_of_date: None, up_to_date_secondary_keys: HashSet::new() }
    }
}

/// Remembers which `(primary, secondary)` pairs are known fresh relative to
/// the start time of the operation that produced them, so that prepare and
/// index jobs can be skipped without consulting disk or the index store.
///
/// State is process-wide and never shrinks; the set of keys is bounded by
/// the project's targets and files.
pub struct UpToDateTracker<P, S = NoSecondaryKey> {
    status_by_primary: Mutex<HashMap<P, FreshnessStatus<S>>>,
}

impl<P: Clone + Eq + Hash, S: Clone + Eq + Hash> UpToDateTracker<P, S> {
    pub fn new() -> Self {
        UpToDateTracker { status_by_primary: Mutex::new(HashMap::new()) }
    }

    /// Records `pairs` as fresh, produced by an operation that started at
    /// `op_start`. Pairs whose primary was invalidated at or after
    /// `op_start` are ignored: the operation may have read state from
    /// before the invalidation.
    pub fn mark_up_to_date(
        &self,
        pairs: impl IntoIterator<Item = (P, S)>,
        op_start: Instant,
    ) {
        let mut status_by_primary = self.status_by_primary.lock().unwrap();
        for (primary, secondary) in pairs {
            let status = status_by_primary.entry(primary).or_default();
            match status.last_out_of_date {
                Some(last_out_of_date) if last_out_of_date >= op_start => {}
                _ => {
                    status.up_to_date_secondary_keys.insert(secondary);
                }
            }
        }
    }

    pub fn mark_out_of_date(&self, primaries: impl IntoIterator<Item = P>) {
        let now = Instant::now();
        let mut status_by_primary = self.status_by_primary.lock().unwrap();
        for primary in primaries {
            let status = status_by_primary.entry(primary).or_default();
            status.last_out_of_date = Some(now);
            status.up_to_date_secondary_keys.clear();
        }
    }

    /// Invalidates every primary key the tracker has ever seen.
    pub fn mark_all_known_out_of_date(&self) {
        let now = Instant::now();
        let mut status_by_primary = self.status_by_primary.lock().unwrap();
        for status in status_by_primary.values_mut() {
            status.last_out_of_date = Some(now);
            status.up_to_date_secondary_keys.clear();
        }
    }

    pub fn is_up_to_date(&self, primary: &P, secondary: &S) -> bool {
        self.status_by_primary
            .lock()
            .unwrap()
            .get(primary)
            .is_some_and(|status| status.up_to_date_secondary_keys.contains(secondary))
    }
}

impl<P: Clone + Eq + Hash, S: Clone + Eq + Hash> Default for UpToDateTracker<P, S> {
    fn default() -> Self {
        Self::new()
    }
}
