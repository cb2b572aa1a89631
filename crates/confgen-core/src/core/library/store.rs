use super::entry::FragmentEntry;
use super::format::{self, LibraryIoError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`FragmentLibrary::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An entry with the same fingerprint already existed; it was left unchanged.
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub entries: usize,
    pub conformers: usize,
    pub occurrences: u64,
    pub topology_bytes: usize,
}

/// A thread-safe fragment conformer cache keyed by canonical fingerprint.
///
/// Lookups take a shared lock and hand out `Arc`s, so readers never block each other
/// and entries stay valid even if they are later removed from the map. Insertion is
/// idempotent: the first writer for a fingerprint wins.
#[derive(Debug, Default)]
pub struct FragmentLibrary {
    entries: RwLock<HashMap<u64, Arc<FragmentEntry>>>,
}

impl FragmentLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, fingerprint: u64) -> bool {
        self.entries.read().contains_key(&fingerprint)
    }

    pub fn lookup(&self, fingerprint: u64) -> Option<Arc<FragmentEntry>> {
        self.entries.read().get(&fingerprint).cloned()
    }

    /// Looks up an entry and confirms that its stored topology matches.
    ///
    /// A fingerprint hit with a different topology is a hash collision and is reported
    /// as a miss.
    pub fn lookup_verified(&self, fingerprint: u64, topology: &[u8]) -> Option<Arc<FragmentEntry>> {
        let entry = self.lookup(fingerprint)?;
        if entry.topology() != topology {
            warn!(
                fingerprint = %format!("{fingerprint:016x}"),
                "Fragment fingerprint collision; ignoring cached entry."
            );
            return None;
        }
        Some(entry)
    }

    /// Inserts an entry unless one with the same fingerprint is already present.
    pub fn insert(&self, fingerprint: u64, entry: FragmentEntry) -> InsertOutcome {
        let mut entries = self.entries.write();
        if entries.contains_key(&fingerprint) {
            return InsertOutcome::AlreadyPresent;
        }
        entries.insert(fingerprint, Arc::new(entry));
        InsertOutcome::Inserted
    }

    pub fn remove(&self, fingerprint: u64) -> Option<Arc<FragmentEntry>> {
        self.entries.write().remove(&fingerprint)
    }

    /// Bumps the usage counter of an entry. Returns `false` if it is not present.
    pub fn record_occurrence(&self, fingerprint: u64) -> bool {
        match self.entries.read().get(&fingerprint) {
            Some(entry) => {
                entry.record_occurrence();
                true
            }
            None => false,
        }
    }

    /// All fingerprints in ascending order.
    pub fn fingerprints(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.entries.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Merges `other` into `self`.
    ///
    /// New fingerprints are inserted; for fingerprints already present the existing
    /// conformers are kept and the occurrence counts are summed. Returns the number of
    /// entries added.
    pub fn merge(&self, other: &FragmentLibrary) -> usize {
        let incoming: Vec<(u64, Arc<FragmentEntry>)> = other
            .entries
            .read()
            .iter()
            .map(|(&fp, entry)| (fp, Arc::clone(entry)))
            .collect();
        let mut entries = self.entries.write();
        let mut added = 0;
        for (fingerprint, entry) in incoming {
            match entries.get(&fingerprint) {
                Some(existing) if Arc::ptr_eq(existing, &entry) => {}
                Some(existing) => existing.add_occurrences(entry.occurrences()),
                None => {
                    entries.insert(fingerprint, Arc::new(FragmentEntry::clone(&entry)));
                    added += 1;
                }
            }
        }
        debug!(added, total = entries.len(), "Merged fragment library.");
        added
    }

    /// Removes the least used entries until at most `max_entries` remain.
    ///
    /// Ties on the occurrence count are broken by fingerprint so the result does not
    /// depend on map iteration order. Returns the number of entries removed.
    pub fn prune_to(&self, max_entries: usize) -> usize {
        let mut entries = self.entries.write();
        if entries.len() <= max_entries {
            return 0;
        }
        let mut ranked: Vec<(u64, u64)> = entries
            .iter()
            .map(|(&fp, entry)| (entry.occurrences(), fp))
            .collect();
        ranked.sort_unstable();
        let excess = entries.len() - max_entries;
        for &(_, fingerprint) in &ranked[..excess] {
            entries.remove(&fingerprint);
        }
        info!(removed = excess, remaining = entries.len(), "Pruned fragment library.");
        excess
    }

    pub fn stats(&self) -> LibraryStats {
        let entries = self.entries.read();
        entries.values().fold(
            LibraryStats {
                entries: entries.len(),
                ..LibraryStats::default()
            },
            |mut stats, entry| {
                stats.conformers += entry.conformer_count();
                stats.occurrences += entry.occurrences();
                stats.topology_bytes += entry.topology().len();
                stats
            },
        )
    }

    /// Snapshot of the entries sorted by fingerprint.
    pub fn entries(&self) -> Vec<(u64, Arc<FragmentEntry>)> {
        let mut list: Vec<(u64, Arc<FragmentEntry>)> = self
            .entries
            .read()
            .iter()
            .map(|(&fp, entry)| (fp, Arc::clone(entry)))
            .collect();
        list.sort_unstable_by_key(|(fp, _)| *fp);
        list
    }

    /// Reads entries from a library stream and inserts them.
    ///
    /// Duplicate fingerprints keep the first record. Returns the number of entries added.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryIoError`] for a bad header, an unsupported version, or a record
    /// that is truncated or internally inconsistent. Entries read before the error are
    /// kept.
    pub fn load<R: Read>(&self, reader: R) -> Result<usize, LibraryIoError> {
        let mut added = 0;
        format::read_records(reader, |fingerprint, entry| {
            if self.insert(fingerprint, entry) == InsertOutcome::Inserted {
                added += 1;
            }
        })?;
        Ok(added)
    }

    /// Writes every entry, in fingerprint order, as a library stream.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), LibraryIoError> {
        format::write_records(writer, &self.entries())
    }

    pub fn load_path(&self, path: &Path) -> Result<usize, LibraryIoError> {
        let file = File::open(path).map_err(|source| LibraryIoError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let added = self.load(BufReader::new(file))?;
        info!(path = %path.display(), added, total = self.len(), "Loaded fragment library.");
        Ok(added)
    }

    pub fn save_path(&self, path: &Path) -> Result<(), LibraryIoError> {
        let file = File::create(path).map_err(|source| LibraryIoError::File {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        self.save(&mut writer)?;
        writer.flush()?;
        info!(path = %path.display(), entries = self.len(), "Saved fragment library.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::entry::StoredConformer;
    use std::thread;

    fn entry(tag: u8, occurrences: u64) -> FragmentEntry {
        FragmentEntry::new(
            vec![tag, tag],
            vec![StoredConformer {
                energy: tag as f32,
                coords: vec![[tag as f32, 0.0, 0.0]],
            }],
            occurrences,
        )
    }

    #[test]
    fn insert_is_idempotent() {
        let library = FragmentLibrary::new();
        assert_eq!(library.insert(7, entry(1, 1)), InsertOutcome::Inserted);
        assert_eq!(library.insert(7, entry(2, 1)), InsertOutcome::AlreadyPresent);
        assert_eq!(library.len(), 1);
        assert_eq!(library.lookup(7).unwrap().topology(), &[1, 1]);
    }

    #[test]
    fn lookup_verified_treats_collisions_as_misses() {
        let library = FragmentLibrary::new();
        library.insert(7, entry(1, 1));
        assert!(library.lookup_verified(7, &[1, 1]).is_some());
        assert!(library.lookup_verified(7, &[9, 9]).is_none());
        assert!(library.lookup_verified(8, &[1, 1]).is_none());
    }

    #[test]
    fn removed_entries_stay_valid_for_holders() {
        let library = FragmentLibrary::new();
        library.insert(3, entry(3, 1));
        let held = library.lookup(3).unwrap();
        assert!(library.remove(3).is_some());
        assert!(library.lookup(3).is_none());
        assert_eq!(held.conformer_count(), 1);
        assert!(!library.record_occurrence(3));
    }

    #[test]
    fn prune_removes_lowest_occurrence_first() {
        let library = FragmentLibrary::new();
        library.insert(1, entry(1, 5));
        library.insert(2, entry(2, 1));
        library.insert(3, entry(3, 9));
        library.insert(4, entry(4, 1));
        assert_eq!(library.prune_to(2), 2);
        assert_eq!(library.fingerprints(), vec![1, 3]);
        assert_eq!(library.prune_to(2), 0);
    }

    #[test]
    fn merge_adds_new_entries_and_sums_occurrences() {
        let left = FragmentLibrary::new();
        left.insert(1, entry(1, 2));
        let right = FragmentLibrary::new();
        right.insert(1, entry(9, 3));
        right.insert(2, entry(2, 1));

        assert_eq!(left.merge(&right), 1);
        assert_eq!(left.len(), 2);
        let shared = left.lookup(1).unwrap();
        assert_eq!(shared.topology(), &[1, 1]);
        assert_eq!(shared.occurrences(), 5);
        assert_eq!(right.lookup(1).unwrap().occurrences(), 3);
    }

    #[test]
    fn concurrent_inserts_keep_a_single_winner() {
        let library = Arc::new(FragmentLibrary::new());
        let handles: Vec<_> = (0..8u8)
            .map(|tag| {
                let library = Arc::clone(&library);
                thread::spawn(move || library.insert(42, entry(tag, 1)))
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == InsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn save_and_load_preserve_entries() {
        let library = FragmentLibrary::new();
        library.insert(11, entry(1, 4));
        library.insert(5, entry(2, 1));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragments.cglib");
        library.save_path(&path).unwrap();

        let restored = FragmentLibrary::new();
        assert_eq!(restored.load_path(&path).unwrap(), 2);
        assert_eq!(restored.stats(), library.stats());
        let entry = restored.lookup(11).unwrap();
        assert_eq!(entry.occurrences(), 4);
        assert_eq!(entry.conformers()[0].coords, vec![[1.0, 0.0, 0.0]]);
    }

    #[test]
    fn load_path_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.cglib");
        let err = FragmentLibrary::new().load_path(&missing).unwrap_err();
        assert!(matches!(err, LibraryIoError::File { path, .. } if path == missing));
    }
}
