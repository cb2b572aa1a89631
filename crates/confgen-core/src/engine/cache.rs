use crate::core::library::entry::FragmentEntry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Fragment results produced or looked up while generating one molecule.
///
/// It avoids regenerating a fragment that occurs several times in a molecule (or in
/// several stereo variants) when no shared library is set, and makes sure the shared
/// library's occurrence counter moves once per fragment per molecule.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: HashMap<u64, Arc<FragmentEntry>>,
    counted: HashSet<u64>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached entry for `fingerprint` if its topology matches.
    pub fn get(&self, fingerprint: u64, topology: &[u8]) -> Option<Arc<FragmentEntry>> {
        self.entries
            .get(&fingerprint)
            .filter(|entry| entry.topology() == topology)
            .cloned()
    }

    pub fn insert(&mut self, fingerprint: u64, entry: Arc<FragmentEntry>) {
        self.entries.insert(fingerprint, entry);
    }

    /// Records that the fragment was seen; returns `true` the first time.
    pub fn mark_counted(&mut self, fingerprint: u64) -> bool {
        self.counted.insert(fingerprint)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.counted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_requires_matching_topology() {
        let mut cache = RunCache::new();
        cache.insert(7, Arc::new(FragmentEntry::new(vec![1, 2, 3], vec![], 1)));
        assert!(cache.get(7, &[1, 2, 3]).is_some());
        assert!(cache.get(7, &[1, 2]).is_none());
        assert!(cache.get(8, &[1, 2, 3]).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn occurrences_are_counted_once() {
        let mut cache = RunCache::new();
        assert!(cache.mark_counted(3));
        assert!(!cache.mark_counted(3));
        cache.clear();
        assert!(cache.mark_counted(3));
        assert!(cache.is_empty());
    }
}
