//! Canonical atom ranking and the 64-bit fragment fingerprint.
//!
//! Ranking runs on the hydrogen-suppressed graph. Atoms start from local invariants and
//! are refined by their neighborhoods until the partition stops splitting; remaining ties
//! are broken by individualizing each member of the first tied cell in turn and keeping
//! the lexicographically smallest encoding. The encoding is the fragment's *topology
//! blob*; two graphs with equal blobs are isomorphic under their canonical orders.

use crate::core::models::atom::Chirality;
use crate::core::models::fragment::Fragment;
use crate::core::models::molecule::Molecule;
use crate::core::utils::is_odd_permutation;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Number of fully individualized labelings examined before the search stops branching.
///
/// Branches that repeat an explored one under a known automorphism are skipped, so
/// symmetric fragments rarely get close. Past the budget the key may depend on input
/// numbering, which only costs a duplicate library entry.
const LEAF_BUDGET: usize = 512;
/// Automorphisms kept for pruning.
const MAX_AUTOMORPHISMS: usize = 256;

const FLAG_AROMATIC: u8 = 1;
const FLAG_CAP: u8 = 2;
const FLAG_STEREO: u8 = 4;
const FLAG_STEREO_CCW: u8 = 8;

/// Result of canonicalizing a molecule or fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalForm {
    pub fingerprint: u64,
    /// Canonical encoding of the graph; used to detect fingerprint collisions.
    pub topology: Vec<u8>,
    /// Canonical position to local atom index. Hydrogens follow heavy atoms, grouped
    /// by the canonical rank of the atom they are attached to.
    pub order: Vec<usize>,
}

impl CanonicalForm {
    /// Local atom index to canonical position.
    pub fn positions(&self) -> Vec<usize> {
        let mut inverse = vec![0; self.order.len()];
        for (position, &local) in self.order.iter().enumerate() {
            inverse[local] = position;
        }
        inverse
    }
}

/// Canonical key of a fragment; cap atoms are flagged so attachment points take part
/// in the key.
pub fn fragment_key(fragment: &Fragment) -> CanonicalForm {
    let caps: Vec<bool> = (0..fragment.atom_count())
        .map(|local| fragment.is_cap(local))
        .collect();
    canonicalize(&fragment.molecule, &caps)
}

/// First 8 bytes (little endian) of the SHA-256 digest of a topology blob.
pub fn fingerprint_of(topology: &[u8]) -> u64 {
    let digest = Sha256::digest(topology);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Canonicalizes `mol`; `caps[i]` marks atoms standing in for a cut neighbor.
pub fn canonicalize(mol: &Molecule, caps: &[bool]) -> CanonicalForm {
    let heavy = mol.heavy_atoms();
    let work: Vec<usize> = if heavy.is_empty() {
        (0..mol.atom_count()).collect()
    } else {
        heavy
    };
    let graph = WorkGraph::new(mol, &work, caps);

    let initial = dense_rank(&graph.invariants);
    let classes = refine(&graph, initial);
    let stereo_eligible = graph.stereo_eligible(mol, &classes);

    let mut search = Search::new(&graph, mol, &stereo_eligible);
    search.explore(classes);
    let (topology, ranks) = search.best.unwrap_or_default();

    let mut order: Vec<usize> = vec![0; work.len()];
    for (w, &rank) in ranks.iter().enumerate() {
        order[rank as usize] = work[w];
    }
    let mut rest: Vec<(u32, usize)> = (0..mol.atom_count())
        .filter(|&local| graph.work_index(local).is_none())
        .map(|local| {
            let parent_rank = mol
                .neighbors(local)
                .filter_map(|n| graph.work_index(n).map(|w| ranks[w]))
                .min()
                .unwrap_or(u32::MAX);
            (parent_rank, local)
        })
        .collect();
    rest.sort_unstable();
    order.extend(rest.into_iter().map(|(_, local)| local));

    CanonicalForm {
        fingerprint: fingerprint_of(&topology),
        topology,
        order,
    }
}

/// Refined equivalence classes over the full graph, hydrogens included.
///
/// Atoms in different classes are never topologically equivalent; atoms in the same
/// class usually are.
pub fn atom_classes(mol: &Molecule) -> Vec<u32> {
    let all: Vec<usize> = (0..mol.atom_count()).collect();
    let caps = vec![false; mol.atom_count()];
    let graph = WorkGraph::new(mol, &all, &caps);
    refine(&graph, dense_rank(&graph.invariants))
}

struct WorkGraph {
    /// Local index of each working atom.
    atoms: Vec<usize>,
    /// Working index by local index.
    lookup: Vec<Option<usize>>,
    adjacency: Vec<Vec<(usize, u8)>>,
    invariants: Vec<u64>,
    records: Vec<[u8; 4]>,
}

impl WorkGraph {
    fn new(mol: &Molecule, atoms: &[usize], caps: &[bool]) -> Self {
        let mut lookup = vec![None; mol.atom_count()];
        for (w, &local) in atoms.iter().enumerate() {
            lookup[local] = Some(w);
        }
        let adjacency: Vec<Vec<(usize, u8)>> = atoms
            .iter()
            .map(|&local| {
                mol.bonds_of(local)
                    .iter()
                    .filter_map(|&(n, b)| lookup[n].map(|w| (w, mol.bond(b).order.to_ctfile())))
                    .collect()
            })
            .collect();

        let mut invariants = Vec::with_capacity(atoms.len());
        let mut records = Vec::with_capacity(atoms.len());
        for (w, &local) in atoms.iter().enumerate() {
            let atom = mol.atom(local);
            let cap = caps.get(local).copied().unwrap_or(false);
            let hydrogens = if atoms.len() == mol.atom_count() {
                atom.implicit_hydrogens as usize
            } else {
                mol.hydrogen_count(local)
            }
            .min(u8::MAX as usize) as u8;
            let mut flags = 0u8;
            if atom.aromatic {
                flags |= FLAG_AROMATIC;
            }
            if cap {
                flags |= FLAG_CAP;
            }
            let number = atom.element.atomic_number();
            let charge = atom.formal_charge;
            invariants.push(
                (number as u64) << 40
                    | ((charge as i16 + 128) as u64) << 32
                    | (hydrogens as u64) << 24
                    | (adjacency[w].len().min(255) as u64) << 16
                    | (flags as u64) << 8,
            );
            records.push([number, charge as u8, hydrogens, flags]);
        }

        Self {
            atoms: atoms.to_vec(),
            lookup,
            adjacency,
            invariants,
            records,
        }
    }

    fn len(&self) -> usize {
        self.atoms.len()
    }

    fn work_index(&self, local: usize) -> Option<usize> {
        self.lookup.get(local).copied().flatten()
    }

    /// Centers whose tag is encoded: a specified tag, at most one hydrogen, and at
    /// least three heavy neighbors in pairwise distinct classes.
    fn stereo_eligible(&self, mol: &Molecule, classes: &[u32]) -> Vec<bool> {
        (0..self.len())
            .map(|w| {
                let local = self.atoms[w];
                if !mol.atom(local).chirality.is_specified() || mol.hydrogen_count(local) > 1 {
                    return false;
                }
                let mut neighbor_classes: Vec<u32> =
                    self.adjacency[w].iter().map(|&(n, _)| classes[n]).collect();
                let before = neighbor_classes.len();
                neighbor_classes.sort_unstable();
                neighbor_classes.dedup();
                before >= 3 && neighbor_classes.len() == before
            })
            .collect()
    }
}

fn dense_rank<K: Ord + Clone>(keys: &[K]) -> Vec<u32> {
    let mut indices: Vec<usize> = (0..keys.len()).collect();
    indices.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
    let mut ranks = vec![0u32; keys.len()];
    let mut current = 0u32;
    for (pos, &i) in indices.iter().enumerate() {
        if pos > 0 && keys[indices[pos - 1]] != keys[i] {
            current += 1;
        }
        ranks[i] = current;
    }
    ranks
}

fn class_count(ranks: &[u32]) -> usize {
    ranks.iter().max().map_or(0, |&m| m as usize + 1)
}

fn refine(graph: &WorkGraph, mut ranks: Vec<u32>) -> Vec<u32> {
    loop {
        let before = class_count(&ranks);
        let keys: Vec<(u32, Vec<(u32, u8)>)> = (0..graph.len())
            .map(|w| {
                let mut neighborhood: Vec<(u32, u8)> = graph.adjacency[w]
                    .iter()
                    .map(|&(n, order)| (ranks[n], order))
                    .collect();
                neighborhood.sort_unstable();
                (ranks[w], neighborhood)
            })
            .collect();
        let next = dense_rank(&keys);
        if class_count(&next) == before {
            return next;
        }
        ranks = next;
    }
}

struct Search<'a> {
    graph: &'a WorkGraph,
    mol: &'a Molecule,
    stereo_eligible: &'a [bool],
    leaves: usize,
    best: Option<(Vec<u8>, Vec<u32>)>,
    /// First labeling reached for each distinct encoding.
    seen: HashMap<Vec<u8>, Vec<u32>>,
    /// Working-atom permutations that preserve the encoding.
    automorphisms: Vec<Vec<usize>>,
    /// Member individualized at each level of the current branch.
    path: Vec<usize>,
    /// Members already explored at each level of the current branch.
    explored: Vec<Vec<usize>>,
    /// Shallowest level whose current branch repeats an explored sibling.
    abandon: Option<usize>,
}

impl<'a> Search<'a> {
    fn new(graph: &'a WorkGraph, mol: &'a Molecule, stereo_eligible: &'a [bool]) -> Self {
        Self {
            graph,
            mol,
            stereo_eligible,
            leaves: 0,
            best: None,
            seen: HashMap::new(),
            automorphisms: Vec::new(),
            path: Vec::new(),
            explored: Vec::new(),
            abandon: None,
        }
    }

    fn explore(&mut self, ranks: Vec<u32>) {
        let ranks = refine(self.graph, ranks);
        let Some(cell) = first_tied_cell(&ranks) else {
            self.leaves += 1;
            self.visit_leaf(ranks);
            return;
        };
        let members: Vec<usize> = (0..ranks.len()).filter(|&w| ranks[w] == cell).collect();
        let level = self.path.len();
        self.explored.push(Vec::new());
        for (k, &member) in members.iter().enumerate() {
            if k > 0 {
                if self.leaves >= LEAF_BUDGET {
                    break;
                }
                if self
                    .automorphisms
                    .iter()
                    .any(|gamma| self.repeats_explored(gamma, level, member))
                {
                    continue;
                }
            }
            let keys: Vec<(u32, bool)> = ranks
                .iter()
                .enumerate()
                .map(|(w, &r)| (r, w != member))
                .collect();
            self.path.push(member);
            self.explore(dense_rank(&keys));
            self.path.pop();
            self.explored[level].push(member);
            match self.abandon {
                Some(target) if target < level => break,
                Some(_) => self.abandon = None,
                None => {}
            }
        }
        self.explored.pop();
    }

    fn visit_leaf(&mut self, ranks: Vec<u32>) {
        let blob = self.encode(&ranks);
        if let Some(previous) = self.seen.get(&blob) {
            // Equal encodings: mapping equal ranks onto each other is an automorphism.
            let mut by_rank = vec![0usize; previous.len()];
            for (w, &r) in previous.iter().enumerate() {
                by_rank[r as usize] = w;
            }
            let gamma: Vec<usize> = ranks.iter().map(|&r| by_rank[r as usize]).collect();
            self.abandon = (0..self.path.len())
                .find(|&level| self.repeats_explored(&gamma, level, self.path[level]));
            if self.automorphisms.len() < MAX_AUTOMORPHISMS {
                self.automorphisms.push(gamma);
            }
            return;
        }
        if self.best.as_ref().is_none_or(|(best, _)| blob < *best) {
            self.best = Some((blob.clone(), ranks.clone()));
        }
        self.seen.insert(blob, ranks);
    }

    /// Whether `gamma` fixes the branch above `level` and maps an explored member of
    /// that level onto `member`, making the subtree below `member` a copy.
    fn repeats_explored(&self, gamma: &[usize], level: usize, member: usize) -> bool {
        self.path[..level].iter().all(|&p| gamma[p] == p)
            && self.explored[level]
                .iter()
                .any(|&e| e != member && (gamma[e] == member || gamma[member] == e))
    }

    fn encode(&self, ranks: &[u32]) -> Vec<u8> {
        let graph = self.graph;
        let n = graph.len();
        let mut by_rank = vec![0usize; n];
        for (w, &r) in ranks.iter().enumerate() {
            by_rank[r as usize] = w;
        }

        let mut blob = Vec::with_capacity(4 + n * 9);
        blob.extend_from_slice(&(n as u16).to_le_bytes());
        blob.extend_from_slice(&(self.mol.atom_count() as u16).to_le_bytes());

        for &w in &by_rank {
            let mut record = graph.records[w];
            if self.stereo_eligible[w] {
                let tag = self.canonical_tag(w, ranks);
                if tag.is_specified() {
                    record[3] |= FLAG_STEREO;
                    if tag == Chirality::CounterClockwise {
                        record[3] |= FLAG_STEREO_CCW;
                    }
                }
            }
            blob.extend_from_slice(&record);
        }

        let mut bonds: Vec<(u16, u16, u8)> = Vec::new();
        for w in 0..n {
            for &(other, order) in &graph.adjacency[w] {
                let (a, b) = (ranks[w] as u16, ranks[other] as u16);
                if a < b {
                    bonds.push((a, b, order));
                }
            }
        }
        bonds.sort_unstable();
        for (a, b, order) in bonds {
            blob.extend_from_slice(&a.to_le_bytes());
            blob.extend_from_slice(&b.to_le_bytes());
            blob.push(order);
        }
        blob
    }

    /// The tag re-expressed against neighbors in canonical order (hydrogens last).
    fn canonical_tag(&self, w: usize, ranks: &[u32]) -> Chirality {
        let local = self.graph.atoms[w];
        let tag = self.mol.atom(local).chirality;
        let heavy_count = self.graph.len();
        let sequence: Vec<usize> = self
            .mol
            .sorted_neighbors(local)
            .into_iter()
            .map(|n| match self.graph.work_index(n) {
                Some(nw) => ranks[nw] as usize,
                None => heavy_count + n,
            })
            .collect();
        tag.permuted(is_odd_permutation(&sequence))
    }
}

fn first_tied_cell(ranks: &[u32]) -> Option<u32> {
    let mut counts = vec![0usize; class_count(ranks)];
    for &r in ranks {
        counts[r as usize] += 1;
    }
    counts.iter().position(|&c| c > 1).map(|c| c as u32)
}
