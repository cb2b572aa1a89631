use crate::core::chem::canon::CanonicalForm;
use crate::core::models::conformer::Conformer;
use nalgebra::Point3;
use std::sync::atomic::{AtomicU64, Ordering};

/// A conformer as stored in the library: single precision, canonical atom order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredConformer {
    pub energy: f32,
    pub coords: Vec<[f32; 3]>,
}

/// One cached fragment.
///
/// The topology and conformers never change after construction; only the occurrence
/// counter is updated, atomically, while the entry is shared.
#[derive(Debug)]
pub struct FragmentEntry {
    topology: Vec<u8>,
    conformers: Vec<StoredConformer>,
    occurrences: AtomicU64,
}

impl Clone for FragmentEntry {
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            conformers: self.conformers.clone(),
            occurrences: AtomicU64::new(self.occurrences()),
        }
    }
}

impl FragmentEntry {
    pub fn new(topology: Vec<u8>, conformers: Vec<StoredConformer>, occurrences: u64) -> Self {
        Self {
            topology,
            conformers,
            occurrences: AtomicU64::new(occurrences),
        }
    }

    /// Builds an entry from conformers in the fragment's local atom order.
    pub fn from_conformers(form: &CanonicalForm, conformers: &[Conformer]) -> Self {
        let stored = conformers
            .iter()
            .map(|conf| StoredConformer {
                energy: conf.energy as f32,
                coords: form
                    .order
                    .iter()
                    .map(|&local| {
                        let p = conf.coords[local];
                        [p.x as f32, p.y as f32, p.z as f32]
                    })
                    .collect(),
            })
            .collect();
        Self::new(form.topology.clone(), stored, 1)
    }

    pub fn topology(&self) -> &[u8] {
        &self.topology
    }

    pub fn conformers(&self) -> &[StoredConformer] {
        &self.conformers
    }

    pub fn conformer_count(&self) -> usize {
        self.conformers.len()
    }

    pub fn occurrences(&self) -> u64 {
        self.occurrences.load(Ordering::Relaxed)
    }

    pub fn record_occurrence(&self) {
        self.occurrences.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_occurrences(&self, count: u64) {
        self.occurrences.fetch_add(count, Ordering::Relaxed);
    }

    /// Conformers mapped back to the local atom order of a fragment with this form.
    ///
    /// Conformers whose atom count does not match the form are skipped.
    pub fn conformers_for(&self, form: &CanonicalForm) -> Vec<Conformer> {
        self.conformers
            .iter()
            .filter(|stored| stored.coords.len() == form.order.len())
            .map(|stored| {
                let mut coords = vec![Point3::origin(); form.order.len()];
                for (position, &local) in form.order.iter().enumerate() {
                    let [x, y, z] = stored.coords[position];
                    coords[local] = Point3::new(x as f64, y as f64, z as f64);
                }
                Conformer::new(coords, stored.energy as f64)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form() -> CanonicalForm {
        CanonicalForm {
            fingerprint: 42,
            topology: vec![1, 2, 3],
            order: vec![2, 0, 1],
        }
    }

    #[test]
    fn conformers_round_trip_through_canonical_order() {
        let conf = Conformer::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
            ],
            -3.5,
        );
        let entry = FragmentEntry::from_conformers(&form(), std::slice::from_ref(&conf));
        assert_eq!(entry.conformers()[0].coords[0], [2.0, 0.0, 0.0]);
        let restored = entry.conformers_for(&form());
        assert_eq!(restored, vec![conf]);
        assert_eq!(entry.occurrences(), 1);
    }

    #[test]
    fn occurrence_counter_is_shared_state() {
        let entry = FragmentEntry::new(vec![], vec![], 0);
        entry.record_occurrence();
        entry.add_occurrences(4);
        assert_eq!(entry.occurrences(), 5);
        assert_eq!(entry.clone().occurrences(), 5);
    }

    #[test]
    fn mismatched_conformers_are_skipped() {
        let entry = FragmentEntry::new(
            vec![],
            vec![StoredConformer {
                energy: 0.0,
                coords: vec![[0.0; 3]; 2],
            }],
            0,
        );
        assert!(entry.conformers_for(&form()).is_empty());
    }
}
