use crate::core::models::molecule::Molecule;
use std::collections::VecDeque;

/// Ring membership facts for one molecule.
#[derive(Debug, Clone, Default)]
pub struct RingInfo {
    ring_bond: Vec<bool>,
    ring_atom: Vec<bool>,
    smallest_ring: Vec<Option<usize>>,
    systems: Vec<Vec<usize>>,
    system_of: Vec<Option<usize>>,
}

impl RingInfo {
    /// Perceives ring bonds as the non-bridge bonds of the graph, then groups ring atoms
    /// into ring systems (components connected through ring bonds).
    pub fn perceive(mol: &Molecule) -> Self {
        let ring_bond = non_bridge_bonds(mol);
        let mut ring_atom = vec![false; mol.atom_count()];
        for (index, bond) in mol.bonds().iter().enumerate() {
            if ring_bond[index] {
                ring_atom[bond.atom1] = true;
                ring_atom[bond.atom2] = true;
            }
        }

        let smallest_ring = (0..mol.bond_count())
            .map(|b| {
                if ring_bond[b] {
                    smallest_cycle_through(mol, b)
                } else {
                    None
                }
            })
            .collect();

        let mut system_of = vec![None; mol.atom_count()];
        let mut systems = Vec::new();
        for start in 0..mol.atom_count() {
            if !ring_atom[start] || system_of[start].is_some() {
                continue;
            }
            let id = systems.len();
            let mut members = Vec::new();
            let mut stack = vec![start];
            system_of[start] = Some(id);
            while let Some(atom) = stack.pop() {
                members.push(atom);
                for &(n, b) in mol.bonds_of(atom) {
                    if ring_bond[b] && system_of[n].is_none() {
                        system_of[n] = Some(id);
                        stack.push(n);
                    }
                }
            }
            members.sort_unstable();
            systems.push(members);
        }

        Self {
            ring_bond,
            ring_atom,
            smallest_ring,
            systems,
            system_of,
        }
    }

    pub fn is_ring_bond(&self, bond: usize) -> bool {
        self.ring_bond[bond]
    }

    pub fn is_ring_atom(&self, atom: usize) -> bool {
        self.ring_atom[atom]
    }

    /// Size of the smallest ring containing the bond, if it is a ring bond.
    pub fn smallest_ring_size(&self, bond: usize) -> Option<usize> {
        self.smallest_ring[bond]
    }

    /// Atom lists of all ring systems, each sorted ascending.
    pub fn systems(&self) -> &[Vec<usize>] {
        &self.systems
    }

    pub fn system_of(&self, atom: usize) -> Option<usize> {
        self.system_of[atom]
    }

    pub fn ring_bond_count(&self) -> usize {
        self.ring_bond.iter().filter(|&&r| r).count()
    }

    /// Whether a ring system contains a ring of at least `min_size` atoms.
    ///
    /// A bond whose smallest ring reaches the threshold belongs to such a ring, so the
    /// check looks at the largest smallest-ring size among the system's bonds.
    pub fn is_macrocyclic(&self, mol: &Molecule, system: usize, min_size: usize) -> bool {
        self.systems[system].iter().any(|&atom| {
            mol.bonds_of(atom).iter().any(|&(_, b)| {
                self.smallest_ring[b].is_some_and(|size| size >= min_size)
            })
        })
    }

    pub fn has_macrocycle(&self, mol: &Molecule, min_size: usize) -> bool {
        (0..self.systems.len()).any(|s| self.is_macrocyclic(mol, s, min_size))
    }
}

/// Tarjan bridge finding; returns `true` for every bond that is not a bridge.
fn non_bridge_bonds(mol: &Molecule) -> Vec<bool> {
    let n = mol.atom_count();
    let mut disc = vec![usize::MAX; n];
    let mut low = vec![0usize; n];
    let mut is_bridge = vec![false; mol.bond_count()];
    let mut timer = 0usize;

    for root in 0..n {
        if disc[root] != usize::MAX {
            continue;
        }
        // (atom, parent bond, next adjacency position)
        let mut stack: Vec<(usize, Option<usize>, usize)> = vec![(root, None, 0)];
        disc[root] = timer;
        low[root] = timer;
        timer += 1;

        while let Some(top) = stack.last_mut() {
            let (atom, parent_bond) = (top.0, top.1);
            let adjacency = mol.bonds_of(atom);
            if top.2 < adjacency.len() {
                let (next, bond) = adjacency[top.2];
                top.2 += 1;
                if Some(bond) == parent_bond {
                    continue;
                }
                if disc[next] == usize::MAX {
                    disc[next] = timer;
                    low[next] = timer;
                    timer += 1;
                    stack.push((next, Some(bond), 0));
                } else {
                    low[atom] = low[atom].min(disc[next]);
                }
            } else {
                stack.pop();
                if let (Some(bond), Some(&(parent, _, _))) = (parent_bond, stack.last()) {
                    low[parent] = low[parent].min(low[atom]);
                    if low[atom] > disc[parent] {
                        is_bridge[bond] = true;
                    }
                }
            }
        }
    }
    is_bridge.into_iter().map(|b| !b).collect()
}

/// Length of the shortest cycle through `bond`: BFS between its ends without using it.
fn smallest_cycle_through(mol: &Molecule, bond: usize) -> Option<usize> {
    let b = mol.bond(bond);
    let mut dist = vec![usize::MAX; mol.atom_count()];
    let mut queue = VecDeque::new();
    dist[b.atom1] = 0;
    queue.push_back(b.atom1);
    while let Some(atom) = queue.pop_front() {
        for &(n, other) in mol.bonds_of(atom) {
            if other == bond || dist[n] != usize::MAX {
                continue;
            }
            dist[n] = dist[atom] + 1;
            if n == b.atom2 {
                return Some(dist[n] + 1);
            }
            queue.push_back(n);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::models::topology::BondOrder;
    use nalgebra::Point3;

    fn ring_molecule(sizes_and_tail: (&[usize], usize)) -> Molecule {
        let (rings, tail) = sizes_and_tail;
        let mut mol = Molecule::new("rings");
        let mut previous_ring_start: Option<usize> = None;
        for &size in rings {
            let start = mol.atom_count();
            for _ in 0..size {
                mol.add_atom(Atom::new(Element::C, Point3::origin()));
            }
            for i in 0..size {
                mol.add_bond(start + i, start + (i + 1) % size, BondOrder::Single)
                    .unwrap();
            }
            if let Some(prev) = previous_ring_start {
                mol.add_bond(prev, start, BondOrder::Single).unwrap();
            }
            previous_ring_start = Some(start);
        }
        let mut last = previous_ring_start.unwrap_or(0);
        for _ in 0..tail {
            let next = mol.add_atom(Atom::new(Element::C, Point3::origin()));
            if mol.atom_count() > 1 {
                mol.add_bond(last, next, BondOrder::Single).unwrap();
            }
            last = next;
        }
        mol
    }

    #[test]
    fn ring_bonds_exclude_linkers_and_tails() {
        let mol = ring_molecule((&[6, 5], 2));
        let info = RingInfo::perceive(&mol);
        assert_eq!(info.ring_bond_count(), 11);
        let linker = mol.bond_between(0, 6).unwrap();
        assert!(!info.is_ring_bond(linker));
        assert_eq!(info.systems().len(), 2);
        assert!(info.is_ring_atom(3));
        assert!(!info.is_ring_atom(12));
    }

    #[test]
    fn smallest_ring_size_is_reported_per_bond() {
        let mol = ring_molecule((&[6, 5], 0));
        let info = RingInfo::perceive(&mol);
        let in_six = mol.bond_between(0, 1).unwrap();
        let in_five = mol.bond_between(6, 7).unwrap();
        assert_eq!(info.smallest_ring_size(in_six), Some(6));
        assert_eq!(info.smallest_ring_size(in_five), Some(5));
    }

    #[test]
    fn fused_rings_form_a_single_system() {
        // naphthalene skeleton: two six-rings sharing bond 0-5
        let mut mol = ring_molecule((&[6], 0));
        let extra: Vec<usize> = (0..4)
            .map(|_| mol.add_atom(Atom::new(Element::C, Point3::origin())))
            .collect();
        mol.add_bond(0, extra[0], BondOrder::Single).unwrap();
        mol.add_bond(extra[0], extra[1], BondOrder::Single).unwrap();
        mol.add_bond(extra[1], extra[2], BondOrder::Single).unwrap();
        mol.add_bond(extra[2], extra[3], BondOrder::Single).unwrap();
        mol.add_bond(extra[3], 5, BondOrder::Single).unwrap();

        let info = RingInfo::perceive(&mol);
        assert_eq!(info.systems().len(), 1);
        assert_eq!(info.systems()[0].len(), 10);
        let shared = mol.bond_between(0, 5).unwrap();
        assert_eq!(info.smallest_ring_size(shared), Some(6));
    }

    #[test]
    fn macrocycle_detection_uses_ring_size_threshold() {
        let small = ring_molecule((&[6], 0));
        let large = ring_molecule((&[14], 0));
        let small_info = RingInfo::perceive(&small);
        let large_info = RingInfo::perceive(&large);
        assert!(!small_info.has_macrocycle(&small, 10));
        assert!(large_info.has_macrocycle(&large, 10));
        assert!(!large_info.has_macrocycle(&large, 15));
    }
}
