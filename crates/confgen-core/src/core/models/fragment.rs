use super::atom::{Atom, Chirality};
use super::molecule::{Molecule, MoleculeError};
use crate::core::utils::is_odd_permutation;
use nalgebra::Point3;
use std::collections::HashMap;

/// Structural class of a fragment, which selects its generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// One or more fused/bridged small rings.
    RingSystem,
    /// A ring system containing at least one ring at or above the macrocycle size.
    Macrocycle,
    /// An acyclic piece between link bonds.
    Chain,
}

/// A parent bond that was cut to isolate the fragment.
///
/// The atom on the far side of the cut is kept in the fragment as a *cap*, so the
/// fragment's geometry records where its neighbor across the link bond sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutBond {
    /// Local index of the core atom on this side of the cut.
    pub core: usize,
    /// Local index of the cap atom standing in for the far side.
    pub cap: usize,
    /// Index of the cut bond in the parent molecule.
    pub parent_bond: usize,
}

/// An induced subgraph of a parent molecule, extracted as a standalone molecule.
///
/// Local atom order is: core atoms in ascending parent index, then one cap atom per cut
/// bond in the order the cuts were supplied. `parent_atoms[local]` maps every local atom
/// (caps included) back to the parent.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub molecule: Molecule,
    pub parent_atoms: Vec<usize>,
    pub core_len: usize,
    pub cuts: Vec<CutBond>,
    pub kind: FragmentKind,
}

impl Fragment {
    /// Extracts the fragment spanned by `core_atoms` from `parent`.
    ///
    /// Every bond in `cut_bonds` must have exactly one end inside the core; bonds with
    /// both or neither end inside are ignored. Chirality tags of core atoms are re-derived
    /// for the local numbering; cap atoms never carry a tag.
    pub fn extract(
        parent: &Molecule,
        core_atoms: &[usize],
        cut_bonds: &[usize],
        kind: FragmentKind,
    ) -> Result<Self, MoleculeError> {
        let mut core: Vec<usize> = core_atoms.to_vec();
        core.sort_unstable();
        core.dedup();
        for &index in &core {
            if index >= parent.atom_count() {
                return Err(MoleculeError::AtomIndexOutOfRange {
                    index,
                    count: parent.atom_count(),
                });
            }
        }

        let mut local_of: HashMap<usize, usize> = HashMap::with_capacity(core.len() + 4);
        let mut molecule = Molecule::new(format!("{}:fragment", parent.name));
        let mut parent_atoms = Vec::with_capacity(core.len() + cut_bonds.len());
        for &p in &core {
            local_of.insert(p, molecule.add_atom(parent.atom(p).clone()));
            parent_atoms.push(p);
        }
        let core_len = core.len();

        let mut cap_pairs = Vec::new();
        for &bond_index in cut_bonds {
            let bond = parent.bond(bond_index);
            let (inside, outside) = match (
                local_of.contains_key(&bond.atom1),
                local_of.contains_key(&bond.atom2),
            ) {
                (true, false) => (bond.atom1, bond.atom2),
                (false, true) => (bond.atom2, bond.atom1),
                _ => continue,
            };
            if local_of.contains_key(&outside) {
                continue;
            }
            let source = parent.atom(outside);
            let cap_atom = Atom {
                chirality: Chirality::Unspecified,
                implicit_hydrogens: 0,
                ..source.clone()
            };
            let cap = molecule.add_atom(cap_atom);
            local_of.insert(outside, cap);
            parent_atoms.push(outside);
            cap_pairs.push((inside, outside, bond_index));
        }

        for bond in parent.bonds() {
            if let (Some(&a), Some(&b)) = (local_of.get(&bond.atom1), local_of.get(&bond.atom2))
            {
                if a < core_len || b < core_len {
                    molecule.add_bond(a, b, bond.order)?;
                }
            }
        }

        let cuts = cap_pairs
            .into_iter()
            .map(|(inside, outside, parent_bond)| CutBond {
                core: local_of[&inside],
                cap: local_of[&outside],
                parent_bond,
            })
            .collect();

        for local in 0..core_len {
            let parent_index = parent_atoms[local];
            let tag = parent.atom(parent_index).chirality;
            if !tag.is_specified() {
                continue;
            }
            let mapped: Vec<usize> = parent
                .sorted_neighbors(parent_index)
                .into_iter()
                .filter_map(|n| local_of.get(&n).copied())
                .collect();
            molecule.atom_mut(local).chirality = tag.permuted(is_odd_permutation(&mapped));
        }

        Ok(Self {
            molecule,
            parent_atoms,
            core_len,
            cuts,
            kind,
        })
    }

    pub fn atom_count(&self) -> usize {
        self.parent_atoms.len()
    }

    /// Parent indices of the core atoms.
    pub fn core_atoms(&self) -> &[usize] {
        &self.parent_atoms[..self.core_len]
    }

    pub fn is_cap(&self, local: usize) -> bool {
        local >= self.core_len
    }

    /// Local index of a parent atom (core or cap).
    pub fn local_index(&self, parent_atom: usize) -> Option<usize> {
        self.parent_atoms.iter().position(|&p| p == parent_atom)
    }

    /// Picks this fragment's atoms out of a whole-molecule coordinate array.
    pub fn coords_from_parent(&self, coords: &[Point3<f64>]) -> Vec<Point3<f64>> {
        self.parent_atoms.iter().map(|&p| coords[p]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::Element;
    use crate::core::models::topology::BondOrder;

    fn at(element: Element, x: f64, y: f64, z: f64) -> Atom {
        Atom::new(element, Point3::new(x, y, z))
    }

    /// F-C(Cl)(Br)-C-C with the stereocenter at index 1; bond 1-4 is cut.
    fn chain() -> Molecule {
        let mut mol = Molecule::new("chain");
        mol.add_atom(at(Element::F, -1.0, 0.0, 0.0)); // 0
        mol.add_atom(at(Element::C, 0.0, 0.0, 0.0)); // 1
        mol.add_atom(at(Element::Cl, 0.0, 1.0, 0.0)); // 2
        mol.add_atom(at(Element::Br, 0.0, 0.0, 1.0)); // 3
        mol.add_atom(at(Element::C, 1.0, -0.5, -0.5)); // 4
        mol.add_atom(at(Element::C, 2.0, -0.5, -0.5)); // 5
        mol.add_bond(0, 1, BondOrder::Single).unwrap();
        mol.add_bond(1, 2, BondOrder::Single).unwrap();
        mol.add_bond(1, 3, BondOrder::Single).unwrap();
        mol.add_bond(1, 4, BondOrder::Single).unwrap(); // bond 3
        mol.add_bond(4, 5, BondOrder::Single).unwrap();
        mol
    }

    #[test]
    fn extract_adds_caps_and_remaps_indices() {
        let parent = chain();
        let fragment = Fragment::extract(&parent, &[3, 0, 1, 2], &[3], FragmentKind::Chain)
            .unwrap();

        assert_eq!(fragment.core_len, 4);
        assert_eq!(fragment.parent_atoms, vec![0, 1, 2, 3, 4]);
        assert_eq!(fragment.molecule.bond_count(), 4);
        assert_eq!(
            fragment.cuts,
            vec![CutBond {
                core: 1,
                cap: 4,
                parent_bond: 3
            }]
        );
        assert!(fragment.is_cap(4));
        assert_eq!(fragment.local_index(4), Some(4));
        assert_eq!(fragment.local_index(5), None);
    }

    #[test]
    fn extract_keeps_geometric_configuration_of_centers() {
        let parent = chain();

        // Cut so that the cap lands at a lower local index than some core neighbors.
        let mut reordered = Molecule::new("reordered");
        for i in [4, 5, 0, 1, 2, 3] {
            reordered.add_atom(parent.atom(i).clone());
        }
        // new indices: 4->0, 5->1, 0->2, 1->3, 2->4, 3->5
        reordered.add_bond(2, 3, BondOrder::Single).unwrap();
        reordered.add_bond(3, 4, BondOrder::Single).unwrap();
        reordered.add_bond(3, 5, BondOrder::Single).unwrap();
        let cut = reordered.add_bond(3, 0, BondOrder::Single).unwrap();
        reordered.add_bond(0, 1, BondOrder::Single).unwrap();
        let tag = reordered.chirality_in(&reordered.positions(), 3);
        assert!(tag.is_specified());
        reordered.atom_mut(3).chirality = tag;

        let fragment =
            Fragment::extract(&reordered, &[2, 3, 4, 5], &[cut], FragmentKind::Chain).unwrap();
        let local_coords = fragment.molecule.positions();
        let center = fragment.local_index(3).unwrap();
        assert_eq!(
            fragment.molecule.chirality_in(&local_coords, center),
            fragment.molecule.atom(center).chirality
        );
    }

    #[test]
    fn coords_from_parent_follows_local_order() {
        let parent = chain();
        let fragment =
            Fragment::extract(&parent, &[4, 5], &[3], FragmentKind::Chain).unwrap();
        let coords = parent.positions();
        let local = fragment.coords_from_parent(&coords);
        assert_eq!(local, vec![coords[4], coords[5], coords[1]]);
    }
}
