use crate::core::chem::symmetry::SymmetryMappings;
use crate::core::models::conformer::{Conformer, sort_by_energy};

/// The retained set of a sampling run, kept diverse and inside an energy window.
///
/// Structures are offered in generation order. An offered structure is rejected when
/// it lies above the window of the current best, or when it is within the RMSD
/// threshold of a retained structure of equal or lower energy. A structure that is
/// similar to exactly one retained structure of higher energy replaces it. A new best
/// energy evicts everything that falls out of the window.
#[derive(Debug)]
pub struct ConformerPool<'a> {
    symmetry: &'a SymmetryMappings,
    energy_window: f64,
    rmsd_threshold: f64,
    retained: Vec<Conformer>,
    offered: usize,
}

impl<'a> ConformerPool<'a> {
    pub fn new(symmetry: &'a SymmetryMappings, energy_window: f64, rmsd_threshold: f64) -> Self {
        Self {
            symmetry,
            energy_window,
            rmsd_threshold,
            retained: Vec::new(),
            offered: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Number of structures offered so far, retained or not.
    pub fn offered(&self) -> usize {
        self.offered
    }

    pub fn best_energy(&self) -> Option<f64> {
        self.retained
            .iter()
            .map(|c| c.energy)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn conformers(&self) -> &[Conformer] {
        &self.retained
    }

    /// Offers a refined structure; returns whether it was retained.
    pub fn offer(&mut self, conformer: Conformer) -> bool {
        self.offered += 1;
        if !conformer.energy.is_finite() {
            return false;
        }
        let best = self.best_energy();
        if best.is_some_and(|best| conformer.energy > best + self.energy_window) {
            return false;
        }

        if self.rmsd_threshold > 0.0 {
            let similar: Vec<usize> = self
                .retained
                .iter()
                .enumerate()
                .filter(|(_, kept)| {
                    self.symmetry
                        .within(&kept.coords, &conformer.coords, self.rmsd_threshold)
                })
                .map(|(i, _)| i)
                .collect();
            match similar.as_slice() {
                [] => self.retained.push(conformer),
                [single] if self.retained[*single].energy > conformer.energy => {
                    self.retained[*single] = conformer;
                }
                _ => return false,
            }
        } else {
            self.retained.push(conformer);
        }

        if let Some(new_best) = self.best_energy() {
            let limit = new_best + self.energy_window;
            self.retained.retain(|c| c.energy <= limit);
        }
        true
    }

    /// The retained structures in ascending energy, capped at `max_conformers`.
    pub fn finish(self, max_conformers: usize) -> Vec<Conformer> {
        let mut conformers = self.retained;
        sort_by_energy(&mut conformers);
        conformers.truncate(max_conformers);
        conformers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::models::molecule::Molecule;
    use crate::core::models::topology::BondOrder;
    use nalgebra::Point3;

    fn propane() -> Molecule {
        let mut mol = Molecule::new("propane");
        for _ in 0..3 {
            mol.add_atom(Atom::new(Element::C, Point3::origin()));
        }
        mol.add_bond(0, 1, BondOrder::Single).unwrap();
        mol.add_bond(1, 2, BondOrder::Single).unwrap();
        mol
    }

    fn bent(angle_degrees: f64, energy: f64) -> Conformer {
        let angle = angle_degrees.to_radians();
        Conformer::new(
            vec![
                Point3::new(1.5, 0.0, 0.0),
                Point3::origin(),
                Point3::new(1.5 * angle.cos(), 1.5 * angle.sin(), 0.0),
            ],
            energy,
        )
    }

    #[test]
    fn similar_structures_keep_the_lower_energy() {
        let mol = propane();
        let symmetry = SymmetryMappings::compute(&mol, 100);
        let mut pool = ConformerPool::new(&symmetry, 10.0, 0.1);
        assert!(pool.offer(bent(110.0, 2.0)));
        assert!(!pool.offer(bent(110.5, 3.0)));
        assert!(pool.offer(bent(110.2, 1.0)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.best_energy(), Some(1.0));
        assert_eq!(pool.offered(), 3);
    }

    #[test]
    fn energy_window_is_relative_to_the_best() {
        let mol = propane();
        let symmetry = SymmetryMappings::compute(&mol, 100);
        let mut pool = ConformerPool::new(&symmetry, 5.0, 0.1);
        assert!(pool.offer(bent(180.0, 4.0)));
        assert!(pool.offer(bent(120.0, 8.5)));
        assert!(!pool.offer(bent(90.0, 9.5)));
        assert!(pool.offer(bent(60.0, 0.0)));
        let kept = pool.finish(10);
        let energies: Vec<f64> = kept.iter().map(|c| c.energy).collect();
        assert_eq!(energies, vec![0.0, 4.0]);
    }

    #[test]
    fn retained_structures_are_pairwise_distinct_and_sorted() {
        let mol = propane();
        let symmetry = SymmetryMappings::compute(&mol, 100);
        let mut pool = ConformerPool::new(&symmetry, 100.0, 0.05);
        for (i, angle) in [100.0, 150.0, 100.3, 70.0, 149.8, 120.0].iter().enumerate() {
            pool.offer(bent(*angle, 10.0 - i as f64));
        }
        let kept = pool.finish(10);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(symmetry.rmsd(&a.coords, &b.coords) >= 0.05);
            }
        }
        assert!(kept.windows(2).all(|w| w[0].energy <= w[1].energy));
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn zero_threshold_disables_deduplication_and_cap_truncates() {
        let mol = propane();
        let symmetry = SymmetryMappings::identity(&mol);
        let mut pool = ConformerPool::new(&symmetry, 10.0, 0.0);
        for energy in [3.0, 1.0, 2.0] {
            assert!(pool.offer(bent(110.0, energy)));
        }
        assert!(!pool.offer(bent(110.0, f64::NAN)));
        let kept = pool.finish(2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].energy, 1.0);
        assert_eq!(kept[1].energy, 2.0);
    }
}
