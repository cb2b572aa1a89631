use crate::core::utils::geometry;
use nalgebra::Point3;
use std::cmp::Ordering;

/// One 3D coordinate assignment for a fixed molecular graph, plus its energy.
///
/// Coordinates are index-aligned with the atoms of the molecule (or fragment) that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Conformer {
    pub coords: Vec<Point3<f64>>,
    /// Force-field energy in kcal/mol; `f64::INFINITY` until evaluated.
    pub energy: f64,
}

impl Conformer {
    pub fn new(coords: Vec<Point3<f64>>, energy: f64) -> Self {
        Self { coords, energy }
    }

    pub fn unscored(coords: Vec<Point3<f64>>) -> Self {
        Self {
            coords,
            energy: f64::INFINITY,
        }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Dihedral angle `a-b-c-d` in degrees, in `(-180, 180]`.
    pub fn dihedral(&self, a: usize, b: usize, c: usize, d: usize) -> f64 {
        geometry::dihedral_degrees(
            &self.coords[a],
            &self.coords[b],
            &self.coords[c],
            &self.coords[d],
        )
    }

    pub fn distance(&self, a: usize, b: usize) -> f64 {
        (self.coords[a] - self.coords[b]).norm()
    }

    /// Energy ordering that places non-finite energies last.
    pub fn energy_cmp(&self, other: &Self) -> Ordering {
        self.energy
            .partial_cmp(&other.energy)
            .unwrap_or_else(|| self.energy.is_nan().cmp(&other.energy.is_nan()))
    }
}

/// Sorts conformers by ascending energy; the sort is stable so generation order breaks ties.
pub fn sort_by_energy(conformers: &mut [Conformer]) {
    conformers.sort_by(|a, b| a.energy_cmp(b));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_by_energy_is_stable_and_puts_nan_last() {
        let p = |x: f64| vec![Point3::new(x, 0.0, 0.0)];
        let mut list = vec![
            Conformer::new(p(0.0), 3.0),
            Conformer::new(p(1.0), f64::NAN),
            Conformer::new(p(2.0), 1.0),
            Conformer::new(p(3.0), 1.0),
        ];
        sort_by_energy(&mut list);
        let xs: Vec<f64> = list.iter().map(|c| c.coords[0].x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 0.0, 1.0]);
    }

    #[test]
    fn unscored_conformer_has_infinite_energy() {
        let conf = Conformer::unscored(vec![Point3::origin()]);
        assert!(conf.energy.is_infinite());
        assert_eq!(conf.len(), 1);
    }

    #[test]
    fn distance_and_dihedral_use_indexed_coordinates() {
        let conf = Conformer::new(
            vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 1.0),
            ],
            0.0,
        );
        assert!((conf.distance(0, 1) - 1.0).abs() < 1e-12);
        assert!((conf.dihedral(0, 1, 2, 3).abs() - 90.0).abs() < 1e-9);
    }
}
