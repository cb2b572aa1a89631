use super::error::EngineError;
use crate::core::chem::perception::Perception;
use crate::core::models::fragment::{Fragment, FragmentKind};
use crate::core::models::molecule::Molecule;
use slotmap::{SlotMap, new_key_type};
use std::collections::VecDeque;

new_key_type! {
    pub struct FragmentNodeId;
}

/// The link bond joining a node to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEdge {
    pub bond: usize,
    /// Molecule index of the bond end inside the parent node.
    pub parent_atom: usize,
    /// Molecule index of the bond end inside this node.
    pub child_atom: usize,
}

#[derive(Debug, Clone)]
pub struct FragmentNode {
    pub fragment: Fragment,
    pub parent: Option<FragmentNodeId>,
    pub link: Option<LinkEdge>,
    pub children: Vec<FragmentNodeId>,
}

/// Decomposition of one molecule into fragments joined by rotatable link bonds.
///
/// Link bonds are acyclic, so the fragments and links always form a tree. The root is
/// the fragment with the most heavy atoms.
#[derive(Debug)]
pub struct FragmentTree {
    nodes: SlotMap<FragmentNodeId, FragmentNode>,
    root: FragmentNodeId,
    order: Vec<FragmentNodeId>,
}

impl FragmentTree {
    /// Cuts `mol` at every rotatable bond and extracts the pieces as capped fragments.
    ///
    /// # Arguments
    ///
    /// * `mol` - A connected molecule; its chirality tags flow into the fragments.
    /// * `perception` - Rotatable bonds and ring facts of `mol`.
    /// * `macrocycle_size` - Smallest ring size that makes a ring system a macrocycle.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if a fragment cannot be extracted, which
    /// indicates an inconsistent molecule graph.
    pub fn build(
        mol: &Molecule,
        perception: &Perception,
        macrocycle_size: usize,
    ) -> Result<Self, EngineError> {
        if mol.atom_count() == 0 {
            return Err(EngineError::Generation("molecule has no atoms".into()));
        }
        let link_bonds = perception.rotatable_bonds();
        let mut is_link = vec![false; mol.bond_count()];
        for &b in &link_bonds {
            is_link[b] = true;
        }

        // === Pieces: components after removing the link bonds ===
        let mut piece_of = vec![usize::MAX; mol.atom_count()];
        let mut pieces: Vec<Vec<usize>> = Vec::new();
        for start in 0..mol.atom_count() {
            if piece_of[start] != usize::MAX {
                continue;
            }
            let id = pieces.len();
            piece_of[start] = id;
            let mut members = vec![start];
            let mut stack = vec![start];
            while let Some(atom) = stack.pop() {
                for &(next, bond) in mol.bonds_of(atom) {
                    if !is_link[bond] && piece_of[next] == usize::MAX {
                        piece_of[next] = id;
                        members.push(next);
                        stack.push(next);
                    }
                }
            }
            members.sort_unstable();
            pieces.push(members);
        }

        // === Fragments ===
        let mut nodes: SlotMap<FragmentNodeId, FragmentNode> = SlotMap::with_key();
        let mut ids = Vec::with_capacity(pieces.len());
        for atoms in &pieces {
            let cuts: Vec<usize> = link_bonds
                .iter()
                .copied()
                .filter(|&b| {
                    let bond = mol.bond(b);
                    atoms.binary_search(&bond.atom1).is_ok() != atoms.binary_search(&bond.atom2).is_ok()
                })
                .collect();
            let kind = classify(mol, perception, atoms, macrocycle_size);
            let fragment = Fragment::extract(mol, atoms, &cuts, kind)
                .map_err(|e| EngineError::Internal(format!("fragment extraction failed: {e}")))?;
            ids.push(nodes.insert(FragmentNode {
                fragment,
                parent: None,
                link: None,
                children: Vec::new(),
            }));
        }

        let root_piece = (0..pieces.len())
            .max_by_key(|&p| {
                let heavy = pieces[p]
                    .iter()
                    .filter(|&&a| !mol.atom(a).is_hydrogen())
                    .count();
                (heavy, std::cmp::Reverse(pieces[p][0]))
            })
            .ok_or_else(|| EngineError::Internal("molecule decomposed into no fragments".into()))?;

        // === Tree edges, breadth first from the root ===
        let mut visited = vec![false; pieces.len()];
        visited[root_piece] = true;
        let mut order = vec![ids[root_piece]];
        let mut queue = VecDeque::from([root_piece]);
        while let Some(piece) = queue.pop_front() {
            let cuts: Vec<(usize, usize, usize)> = nodes[ids[piece]]
                .fragment
                .cuts
                .iter()
                .map(|cut| {
                    let fragment = &nodes[ids[piece]].fragment;
                    (
                        cut.parent_bond,
                        fragment.parent_atoms[cut.core],
                        fragment.parent_atoms[cut.cap],
                    )
                })
                .collect();
            for (bond, inside, outside) in cuts {
                let child = piece_of[outside];
                if visited[child] {
                    continue;
                }
                visited[child] = true;
                let child_id = ids[child];
                let node = &mut nodes[child_id];
                node.parent = Some(ids[piece]);
                node.link = Some(LinkEdge {
                    bond,
                    parent_atom: inside,
                    child_atom: outside,
                });
                nodes[ids[piece]].children.push(child_id);
                order.push(child_id);
                queue.push_back(child);
            }
        }
        if order.len() != pieces.len() {
            return Err(EngineError::Generation(format!(
                "molecule is disconnected ({} of {} fragments reachable)",
                order.len(),
                pieces.len()
            )));
        }

        Ok(Self {
            nodes,
            root: ids[root_piece],
            order,
        })
    }

    pub fn root(&self) -> FragmentNodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: FragmentNodeId) -> Option<&FragmentNode> {
        self.nodes.get(id)
    }

    /// Node ids with every parent before its children, root first.
    pub fn order(&self) -> &[FragmentNodeId] {
        &self.order
    }

    /// Nodes in placement order.
    pub fn iter(&self) -> impl Iterator<Item = (FragmentNodeId, &FragmentNode)> {
        self.order.iter().map(|&id| (id, &self.nodes[id]))
    }

    /// Link edges in placement order (one per non-root node).
    pub fn links(&self) -> Vec<LinkEdge> {
        self.iter().filter_map(|(_, node)| node.link).collect()
    }
}

fn classify(
    mol: &Molecule,
    perception: &Perception,
    atoms: &[usize],
    macrocycle_size: usize,
) -> FragmentKind {
    let mut systems: Vec<usize> = atoms
        .iter()
        .filter_map(|&a| perception.rings.system_of(a))
        .collect();
    if systems.is_empty() {
        return FragmentKind::Chain;
    }
    systems.sort_unstable();
    systems.dedup();
    if systems
        .iter()
        .any(|&s| perception.rings.is_macrocyclic(mol, s, macrocycle_size))
    {
        FragmentKind::Macrocycle
    } else {
        FragmentKind::RingSystem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::models::topology::BondOrder;
    use nalgebra::Point3;

    fn add(mol: &mut Molecule, element: Element) -> usize {
        mol.add_atom(Atom::new(element, Point3::origin()))
    }

    /// Cyclohexyl-CH2-CH2-OH: ring atoms 0-5, chain 6-8.
    fn cyclohexylethanol() -> Molecule {
        let mut mol = Molecule::new("cyclohexylethanol");
        for _ in 0..6 {
            add(&mut mol, Element::C);
        }
        for i in 0..6 {
            mol.add_bond(i, (i + 1) % 6, BondOrder::Single).unwrap();
        }
        let c6 = add(&mut mol, Element::C);
        let c7 = add(&mut mol, Element::C);
        let o8 = add(&mut mol, Element::O);
        mol.add_bond(0, c6, BondOrder::Single).unwrap();
        mol.add_bond(c6, c7, BondOrder::Single).unwrap();
        mol.add_bond(c7, o8, BondOrder::Single).unwrap();
        mol
    }

    #[test]
    fn decomposition_places_parents_first() {
        let mol = cyclohexylethanol();
        let perception = Perception::new(&mol);
        let tree = FragmentTree::build(&mol, &perception, 10).unwrap();
        // Rotatable: 0-6 and 6-7; 7-8 ends in a terminal oxygen.
        assert_eq!(tree.len(), 3);
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.fragment.kind, FragmentKind::RingSystem);
        assert_eq!(root.fragment.core_atoms(), &[0, 1, 2, 3, 4, 5]);
        assert!(root.link.is_none());

        let links = tree.links();
        assert_eq!(links.len(), 2);
        assert_eq!((links[0].parent_atom, links[0].child_atom), (0, 6));
        assert_eq!((links[1].parent_atom, links[1].child_atom), (6, 7));

        let last = tree.node(tree.order()[2]).unwrap();
        assert_eq!(last.fragment.kind, FragmentKind::Chain);
        assert_eq!(last.fragment.core_atoms(), &[7, 8]);
        assert_eq!(last.fragment.cuts.len(), 1);
    }

    #[test]
    fn rigid_molecule_is_a_single_node() {
        let mut mol = Molecule::new("ethanol");
        let c0 = add(&mut mol, Element::C);
        let c1 = add(&mut mol, Element::C);
        let o = add(&mut mol, Element::O);
        mol.add_bond(c0, c1, BondOrder::Single).unwrap();
        mol.add_bond(c1, o, BondOrder::Single).unwrap();
        let perception = Perception::new(&mol);
        let tree = FragmentTree::build(&mol, &perception, 10).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.links().is_empty());
        assert!(tree.node(tree.root()).unwrap().fragment.cuts.is_empty());
    }

    #[test]
    fn large_ring_is_a_macrocycle_fragment() {
        let mut mol = Molecule::new("cyclododecane");
        for _ in 0..12 {
            add(&mut mol, Element::C);
        }
        for i in 0..12 {
            mol.add_bond(i, (i + 1) % 12, BondOrder::Single).unwrap();
        }
        let perception = Perception::new(&mol);
        let tree = FragmentTree::build(&mol, &perception, 10).unwrap();
        assert_eq!(
            tree.node(tree.root()).unwrap().fragment.kind,
            FragmentKind::Macrocycle
        );
    }

    #[test]
    fn disconnected_molecule_is_rejected() {
        let mut mol = cyclohexylethanol();
        add(&mut mol, Element::C);
        let perception = Perception::new(&mol);
        assert!(matches!(
            FragmentTree::build(&mol, &perception, 10),
            Err(EngineError::Generation(_))
        ));
    }
}
