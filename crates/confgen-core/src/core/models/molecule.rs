use super::atom::{Atom, Chirality};
use super::topology::{Bond, BondOrder};
use nalgebra::Point3;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoleculeError {
    #[error("Atom index {index} is out of range for a molecule with {count} atoms")]
    AtomIndexOutOfRange { index: usize, count: usize },
    #[error("Atom {0} cannot be bonded to itself")]
    SelfBond(usize),
    #[error("Expected {expected} coordinates but {found} were supplied")]
    CoordinateCount { expected: usize, found: usize },
}

/// An atom/bond graph with optional 3D coordinates.
///
/// Adjacency is kept in sync with the bond list: every entry `(neighbor, bond_index)`
/// in `adjacency[i]` refers to a bond that contains atom `i`. Atoms and bonds are never
/// removed, so indices stay valid for the lifetime of the molecule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Molecule {
    /// Record title (first line of an SDF record).
    pub name: String,
    /// Arbitrary key/value data fields carried through I/O.
    pub properties: BTreeMap<String, String>,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    adjacency: Vec<Vec<(usize, usize)>>,
}

impl Molecule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_atom(&mut self, atom: Atom) -> usize {
        self.atoms.push(atom);
        self.adjacency.push(Vec::new());
        self.atoms.len() - 1
    }

    /// Adds a bond between two existing atoms and returns its index.
    ///
    /// Adding a bond that already exists is a no-op that returns the existing index; the
    /// stored order is left untouched.
    pub fn add_bond(
        &mut self,
        atom1: usize,
        atom2: usize,
        order: BondOrder,
    ) -> Result<usize, MoleculeError> {
        let count = self.atoms.len();
        for index in [atom1, atom2] {
            if index >= count {
                return Err(MoleculeError::AtomIndexOutOfRange { index, count });
            }
        }
        if atom1 == atom2 {
            return Err(MoleculeError::SelfBond(atom1));
        }
        if let Some(existing) = self.bond_between(atom1, atom2) {
            return Ok(existing);
        }
        let bond_index = self.bonds.len();
        self.bonds.push(Bond::new(atom1, atom2, order));
        self.adjacency[atom1].push((atom2, bond_index));
        self.adjacency[atom2].push((atom1, bond_index));
        Ok(bond_index)
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn atom(&self, index: usize) -> &Atom {
        &self.atoms[index]
    }

    pub fn atom_mut(&mut self, index: usize) -> &mut Atom {
        &mut self.atoms[index]
    }

    pub fn bond(&self, index: usize) -> &Bond {
        &self.bonds[index]
    }

    /// `(neighbor, bond_index)` pairs of an atom, in bond insertion order.
    pub fn bonds_of(&self, atom: usize) -> &[(usize, usize)] {
        &self.adjacency[atom]
    }

    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[atom].iter().map(|&(n, _)| n)
    }

    /// Neighbors in ascending index order, the order chirality tags refer to.
    pub fn sorted_neighbors(&self, atom: usize) -> Vec<usize> {
        let mut neighbors: Vec<usize> = self.neighbors(atom).collect();
        neighbors.sort_unstable();
        neighbors
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.adjacency[atom].len()
    }

    /// Number of non-hydrogen neighbors.
    pub fn heavy_degree(&self, atom: usize) -> usize {
        self.neighbors(atom)
            .filter(|&n| !self.atoms[n].is_hydrogen())
            .count()
    }

    /// Explicit hydrogen neighbors plus implicit hydrogens.
    pub fn hydrogen_count(&self, atom: usize) -> usize {
        self.neighbors(atom)
            .filter(|&n| self.atoms[n].is_hydrogen())
            .count()
            + self.atoms[atom].implicit_hydrogens as usize
    }

    pub fn bond_between(&self, atom1: usize, atom2: usize) -> Option<usize> {
        self.adjacency
            .get(atom1)?
            .iter()
            .find(|&&(n, _)| n == atom2)
            .map(|&(_, b)| b)
    }

    pub fn heavy_atoms(&self) -> Vec<usize> {
        (0..self.atoms.len())
            .filter(|&i| !self.atoms[i].is_hydrogen())
            .collect()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    pub fn set_positions(&mut self, coords: &[Point3<f64>]) -> Result<(), MoleculeError> {
        if coords.len() != self.atoms.len() {
            return Err(MoleculeError::CoordinateCount {
                expected: self.atoms.len(),
                found: coords.len(),
            });
        }
        for (atom, p) in self.atoms.iter_mut().zip(coords) {
            atom.position = *p;
        }
        Ok(())
    }

    /// Whether the stored coordinates span three dimensions (not all zero, not planar).
    pub fn has_3d_coordinates(&self) -> bool {
        if self.atoms.len() < 2 {
            return false;
        }
        let nonzero = self.atoms.iter().any(|a| a.position.coords.norm() > 1e-4);
        let z_spread = self.atoms.iter().any(|a| a.position.z.abs() > 1e-4);
        nonzero && (z_spread || self.atoms.len() <= 3)
    }

    /// Signed volume of the first three sorted neighbors around `center` in `coords`.
    ///
    /// Returns `None` for atoms with fewer than three neighbors.
    pub fn signed_volume(&self, coords: &[Point3<f64>], center: usize) -> Option<f64> {
        let neighbors = self.sorted_neighbors(center);
        if neighbors.len() < 3 {
            return None;
        }
        let c = coords[center];
        let a = coords[neighbors[0]] - c;
        let b = coords[neighbors[1]] - c;
        let d = coords[neighbors[2]] - c;
        Some(a.dot(&b.cross(&d)))
    }

    /// Configuration of `center` as realized by `coords`.
    pub fn chirality_in(&self, coords: &[Point3<f64>], center: usize) -> Chirality {
        self.signed_volume(coords, center)
            .map(Chirality::from_signed_volume)
            .unwrap_or(Chirality::Unspecified)
    }

    /// Connected components as sorted atom index lists, ordered by their smallest atom.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.atoms.len()];
        let mut components = Vec::new();
        for start in 0..self.atoms.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let mut component = Vec::new();
            while let Some(atom) = stack.pop() {
                component.push(atom);
                for n in self.neighbors(atom) {
                    if !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
            component.sort_unstable();
            components.push(component);
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::Element;

    fn atom(element: Element, x: f64, y: f64, z: f64) -> Atom {
        Atom::new(element, Point3::new(x, y, z))
    }

    fn ethanol() -> Molecule {
        let mut mol = Molecule::new("ethanol");
        let c1 = mol.add_atom(atom(Element::C, 0.0, 0.0, 0.0));
        let c2 = mol.add_atom(atom(Element::C, 1.5, 0.0, 0.0));
        let o = mol.add_atom(atom(Element::O, 2.0, 1.4, 0.0));
        let h = mol.add_atom(atom(Element::H, 2.9, 1.4, 0.3));
        mol.add_bond(c1, c2, BondOrder::Single).unwrap();
        mol.add_bond(c2, o, BondOrder::Single).unwrap();
        mol.add_bond(o, h, BondOrder::Single).unwrap();
        mol.atom_mut(c1).implicit_hydrogens = 3;
        mol.atom_mut(c2).implicit_hydrogens = 2;
        mol
    }

    #[test]
    fn add_bond_is_idempotent() {
        let mut mol = ethanol();
        let first = mol.bond_between(0, 1).unwrap();
        let again = mol.add_bond(1, 0, BondOrder::Double).unwrap();
        assert_eq!(first, again);
        assert_eq!(mol.bond_count(), 3);
        assert_eq!(mol.bond(first).order, BondOrder::Single);
    }

    #[test]
    fn add_bond_rejects_invalid_indices() {
        let mut mol = ethanol();
        assert_eq!(
            mol.add_bond(0, 10, BondOrder::Single),
            Err(MoleculeError::AtomIndexOutOfRange {
                index: 10,
                count: 4
            })
        );
        assert_eq!(
            mol.add_bond(2, 2, BondOrder::Single),
            Err(MoleculeError::SelfBond(2))
        );
    }

    #[test]
    fn degrees_and_hydrogen_counts_include_implicit_and_explicit() {
        let mol = ethanol();
        assert_eq!(mol.degree(2), 2);
        assert_eq!(mol.heavy_degree(2), 1);
        assert_eq!(mol.hydrogen_count(2), 1);
        assert_eq!(mol.hydrogen_count(0), 3);
        assert_eq!(mol.heavy_atoms(), vec![0, 1, 2]);
    }

    #[test]
    fn set_positions_checks_length() {
        let mut mol = ethanol();
        let result = mol.set_positions(&[Point3::origin()]);
        assert_eq!(
            result,
            Err(MoleculeError::CoordinateCount {
                expected: 4,
                found: 1
            })
        );
    }

    #[test]
    fn chirality_in_follows_signed_volume_of_sorted_neighbors() {
        let mut mol = Molecule::new("center");
        let c = mol.add_atom(atom(Element::C, 0.0, 0.0, 0.0));
        let f = mol.add_atom(atom(Element::F, 1.0, 0.0, 0.0));
        let cl = mol.add_atom(atom(Element::Cl, 0.0, 1.0, 0.0));
        let br = mol.add_atom(atom(Element::Br, 0.0, 0.0, 1.0));
        for n in [f, cl, br] {
            mol.add_bond(c, n, BondOrder::Single).unwrap();
        }
        let coords = mol.positions();
        assert_eq!(mol.chirality_in(&coords, c), Chirality::CounterClockwise);

        let mirrored: Vec<_> = coords.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        assert_eq!(mol.chirality_in(&mirrored, c), Chirality::Clockwise);
        assert_eq!(mol.chirality_in(&coords, f), Chirality::Unspecified);
    }

    #[test]
    fn components_are_split_by_connectivity() {
        let mut mol = ethanol();
        let na = mol.add_atom(atom(Element::Na, 5.0, 5.0, 5.0));
        let components = mol.components();
        assert_eq!(components, vec![vec![0, 1, 2, 3], vec![na]]);
    }

    #[test]
    fn planar_coordinates_are_not_3d() {
        let mol = ethanol();
        assert!(mol.has_3d_coordinates());
        let mut flat = Molecule::new("flat");
        for x in 0..4 {
            flat.add_atom(atom(Element::C, x as f64, 1.0, 0.0));
        }
        assert!(!flat.has_3d_coordinates());
    }
}
