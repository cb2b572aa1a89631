use super::canon::atom_classes;
use crate::core::models::molecule::Molecule;
use crate::core::utils::geometry::kabsch_rmsd;
use nalgebra::Point3;
use std::collections::VecDeque;

/// Search nodes allowed per requested mapping before enumeration gives up.
const NODES_PER_MAPPING: usize = 1000;

/// Topological automorphisms of the atoms used for conformer comparison.
///
/// The comparison subset is the heavy atoms when there are at least three of them and
/// every atom otherwise. Each mapping lists, for every subset atom, the atom it maps to;
/// the identity is always first.
#[derive(Debug, Clone)]
pub struct SymmetryMappings {
    atoms: Vec<usize>,
    mappings: Vec<Vec<usize>>,
    truncated: bool,
}

impl SymmetryMappings {
    /// Enumerates up to `max_mappings` automorphisms; `is_truncated` reports whether
    /// the budget ran out before the enumeration finished.
    pub fn compute(mol: &Molecule, max_mappings: usize) -> Self {
        let atoms = comparison_atoms(mol);
        let max_mappings = max_mappings.max(1);
        let classes = atom_classes(mol);
        let order = search_order(mol, &atoms);

        let mut state = Enumeration {
            mol,
            classes: &classes,
            order: &order,
            mapped: vec![None; mol.atom_count()],
            used: vec![false; mol.atom_count()],
            found: Vec::new(),
            limit: max_mappings,
            nodes: 0,
            node_limit: max_mappings.saturating_mul(NODES_PER_MAPPING),
            truncated: false,
        };
        state.extend(0);

        let mut mappings: Vec<Vec<usize>> = state
            .found
            .into_iter()
            .map(|full| atoms.iter().map(|&a| full[a]).collect())
            .collect();
        let identity: Vec<usize> = atoms.clone();
        if let Some(pos) = mappings.iter().position(|m| *m == identity) {
            mappings.swap(0, pos);
        } else {
            mappings.insert(0, identity);
            mappings.truncate(max_mappings);
        }

        Self {
            atoms,
            mappings,
            truncated: state.truncated,
        }
    }

    /// Only the identity mapping, for callers that skip symmetry handling.
    pub fn identity(mol: &Molecule) -> Self {
        let atoms = comparison_atoms(mol);
        Self {
            mappings: vec![atoms.clone()],
            atoms,
            truncated: false,
        }
    }

    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Minimum superposition RMSD between two conformers over all mappings.
    pub fn rmsd(&self, a: &[Point3<f64>], b: &[Point3<f64>]) -> f64 {
        let reference: Vec<Point3<f64>> = self.atoms.iter().map(|&i| a[i]).collect();
        self.mappings
            .iter()
            .filter_map(|mapping| {
                let mapped: Vec<Point3<f64>> = mapping.iter().map(|&j| b[j]).collect();
                kabsch_rmsd(&mapped, &reference)
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Whether some mapping brings the two conformers within `threshold` RMSD.
    pub fn within(&self, a: &[Point3<f64>], b: &[Point3<f64>], threshold: f64) -> bool {
        let reference: Vec<Point3<f64>> = self.atoms.iter().map(|&i| a[i]).collect();
        self.mappings.iter().any(|mapping| {
            let mapped: Vec<Point3<f64>> = mapping.iter().map(|&j| b[j]).collect();
            kabsch_rmsd(&mapped, &reference).is_some_and(|rmsd| rmsd < threshold)
        })
    }
}

fn comparison_atoms(mol: &Molecule) -> Vec<usize> {
    let heavy = mol.heavy_atoms();
    if heavy.len() >= 3 {
        heavy
    } else {
        (0..mol.atom_count()).collect()
    }
}

/// Breadth-first order over the subset so each atom after the first in its component
/// has an already-placed neighbor to check against.
fn search_order(mol: &Molecule, atoms: &[usize]) -> Vec<usize> {
    let mut in_subset = vec![false; mol.atom_count()];
    for &a in atoms {
        in_subset[a] = true;
    }
    let mut seen = vec![false; mol.atom_count()];
    let mut order = Vec::with_capacity(atoms.len());
    for &start in atoms {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(atom) = queue.pop_front() {
            order.push(atom);
            for n in mol.neighbors(atom) {
                if in_subset[n] && !seen[n] {
                    seen[n] = true;
                    queue.push_back(n);
                }
            }
        }
    }
    order
}

struct Enumeration<'a> {
    mol: &'a Molecule,
    classes: &'a [u32],
    order: &'a [usize],
    mapped: Vec<Option<usize>>,
    used: Vec<bool>,
    found: Vec<Vec<usize>>,
    limit: usize,
    nodes: usize,
    node_limit: usize,
    truncated: bool,
}

impl Enumeration<'_> {
    /// Returns `true` once enumeration must stop.
    fn extend(&mut self, depth: usize) -> bool {
        if depth == self.order.len() {
            if self.found.len() == self.limit {
                self.truncated = true;
                return true;
            }
            let full: Vec<usize> = (0..self.mol.atom_count())
                .map(|a| self.mapped[a].unwrap_or(a))
                .collect();
            self.found.push(full);
            return false;
        }
        self.nodes += 1;
        if self.nodes > self.node_limit {
            self.truncated = true;
            return true;
        }

        let atom = self.order[depth];
        for candidate in self.order.iter().copied() {
            if self.used[candidate] || self.classes[candidate] != self.classes[atom] {
                continue;
            }
            if !self.consistent(atom, candidate) {
                continue;
            }
            self.mapped[atom] = Some(candidate);
            self.used[candidate] = true;
            let stop = self.extend(depth + 1);
            self.mapped[atom] = None;
            self.used[candidate] = false;
            if stop {
                return true;
            }
        }
        false
    }

    fn consistent(&self, atom: usize, candidate: usize) -> bool {
        self.mol.bonds_of(atom).iter().all(|&(n, bond)| {
            let Some(image) = self.mapped[n] else {
                return true;
            };
            self.mol
                .bond_between(candidate, image)
                .is_some_and(|b| self.mol.bond(b).order == self.mol.bond(bond).order)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::models::topology::BondOrder;

    fn ring(size: usize) -> Molecule {
        let mut mol = Molecule::new("ring");
        for i in 0..size {
            let angle = i as f64 * std::f64::consts::TAU / size as f64;
            let idx = mol.add_atom(Atom::new(
                Element::C,
                Point3::new(1.4 * angle.cos(), 1.4 * angle.sin(), 0.0),
            ));
            mol.atom_mut(idx).implicit_hydrogens = 2;
        }
        for i in 0..size {
            mol.add_bond(i, (i + 1) % size, BondOrder::Single).unwrap();
        }
        mol
    }

    #[test]
    fn ring_automorphisms_form_the_dihedral_group() {
        let mol = ring(6);
        let sym = SymmetryMappings::compute(&mol, 100);
        assert_eq!(sym.len(), 12);
        assert!(!sym.is_truncated());
        assert_eq!(sym.mappings[0], (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn budget_truncates_enumeration() {
        let mol = ring(6);
        let sym = SymmetryMappings::compute(&mol, 5);
        assert_eq!(sym.len(), 5);
        assert!(sym.is_truncated());
    }

    #[test]
    fn rotated_labels_compare_as_identical() {
        let mol = ring(6);
        let sym = SymmetryMappings::compute(&mol, 100);
        let a = mol.positions();
        // Same shape, atoms relabeled by one position around the ring.
        let b: Vec<_> = (0..6).map(|i| a[(i + 1) % 6]).collect();
        assert!(sym.rmsd(&a, &b) < 1e-6);
        assert!(SymmetryMappings::identity(&mol).rmsd(&a, &b) > 0.1);
        assert!(sym.within(&a, &b, 0.1));
    }

    #[test]
    fn small_molecules_compare_all_atoms() {
        let mut mol = Molecule::new("water");
        let o = mol.add_atom(Atom::new(Element::O, Point3::origin()));
        let h1 = mol.add_atom(Atom::new(Element::H, Point3::new(0.96, 0.0, 0.0)));
        let h2 = mol.add_atom(Atom::new(Element::H, Point3::new(-0.24, 0.93, 0.0)));
        mol.add_bond(o, h1, BondOrder::Single).unwrap();
        mol.add_bond(o, h2, BondOrder::Single).unwrap();
        let sym = SymmetryMappings::compute(&mol, 10);
        assert_eq!(sym.atoms(), &[0, 1, 2]);
        assert_eq!(sym.len(), 2);
    }
}
