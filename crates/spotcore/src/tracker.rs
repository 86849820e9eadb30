//! Run-wide bookkeeping of assigned map ids.
//!
//! Un-prefixed files get a generated map id. Two such files must never share
//! an output folder, so every generated id is registered here, per file kind,
//! and a counter suffix is appended on collision. The same structure also
//! versions prefixed ids when the run is configured to do so.

use std::collections::{HashMap, HashSet};

use log::warn;
use parking_lot::Mutex;

use crate::record::FileKind;

#[derive(Default)]
struct TrackerState {
    generated: HashMap<FileKind, HashSet<String>>,
    prefixed: HashMap<FileKind, HashSet<(String, String)>>,
}

/// Shared across all files of one run; registration is serialized by a mutex.
#[derive(Default)]
pub struct DuplicateTracker {
    state: Mutex<TrackerState>,
}

impl DuplicateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generated map id, returning the id to use.
    ///
    /// A candidate already taken for `kind` becomes `candidate-2`,
    /// `candidate-3`, ... until it is unique.
    pub fn register(&self, kind: FileKind, candidate: &str) -> String {
        let mut state = self.state.lock();
        let ids = state.generated.entry(kind).or_default();

        if ids.insert(candidate.to_string()) {
            return candidate.to_string();
        }

        let mut counter = 2u32;
        loop {
            let next = format!("{candidate}-{counter}");
            if ids.insert(next.clone()) {
                warn!("{kind} map id {candidate} already assigned in this run, using {next}");
                return next;
            }
            counter += 1;
        }
    }

    /// Register a map id taken from a prefixed filename.
    ///
    /// Returns `map_id` the first time a `(registry_id, map_id)` pair is seen
    /// for `kind`, then `map_id-v2`, `map_id-v3`, ...
    pub fn register_prefixed(&self, kind: FileKind, registry_id: &str, map_id: &str) -> String {
        let mut state = self.state.lock();
        let pairs = state.prefixed.entry(kind).or_default();

        if pairs.insert((registry_id.to_string(), map_id.to_string())) {
            return map_id.to_string();
        }

        let mut version = 2u32;
        loop {
            let next = format!("{map_id}-v{version}");
            if pairs.insert((registry_id.to_string(), next.clone())) {
                warn!("{kind} {registry_id}/{map_id} seen again in this run, storing as {next}");
                return next;
            }
            version += 1;
        }
    }

    /// Generated ids assigned so far for `kind`, sorted.
    pub fn assigned(&self, kind: FileKind) -> Vec<String> {
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .generated
            .get(&kind)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn first_registration_keeps_candidate() {
        let tracker = DuplicateTracker::new();
        assert_eq!(tracker.register(FileKind::Dem, "AB12"), "AB12");
        assert_eq!(tracker.assigned(FileKind::Dem), vec!["AB12"]);
    }

    #[test]
    fn collisions_get_counter_suffix() {
        let tracker = DuplicateTracker::new();
        assert_eq!(tracker.register(FileKind::Dem, "AB12"), "AB12");
        assert_eq!(tracker.register(FileKind::Dem, "AB12"), "AB12-2");
        assert_eq!(tracker.register(FileKind::Dem, "AB12"), "AB12-3");
    }

    #[test]
    fn kinds_are_partitioned() {
        let tracker = DuplicateTracker::new();
        assert_eq!(tracker.register(FileKind::Dem, "AB12"), "AB12");
        assert_eq!(tracker.register(FileKind::Rgb, "AB12"), "AB12");
        assert!(tracker.assigned(FileKind::Mesh3D).is_empty());
    }

    #[test]
    fn suffixed_candidate_does_not_reuse_taken_suffix() {
        let tracker = DuplicateTracker::new();
        tracker.register(FileKind::Rgb, "X");
        tracker.register(FileKind::Rgb, "X-2");
        assert_eq!(tracker.register(FileKind::Rgb, "X"), "X-3");
    }

    #[test]
    fn prefixed_pairs_are_versioned() {
        let tracker = DuplicateTracker::new();
        assert_eq!(tracker.register_prefixed(FileKind::Dem, "SITE01", "A1"), "A1");
        assert_eq!(tracker.register_prefixed(FileKind::Dem, "SITE01", "A1"), "A1-v2");
        assert_eq!(tracker.register_prefixed(FileKind::Dem, "SITE02", "A1"), "A1");
        assert_eq!(tracker.register_prefixed(FileKind::Rgb, "SITE01", "A1"), "A1");
    }

    #[test]
    fn concurrent_registration_stays_unique() {
        let tracker = DuplicateTracker::new();
        let ids: Vec<String> = (0..256)
            .into_par_iter()
            .map(|_| tracker.register(FileKind::Rgb, "SAME"))
            .collect();

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }
}
