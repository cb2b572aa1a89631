//! Systematic conformer construction from fragment conformers.
//!
//! A molecule is cut at its rotatable bonds into a [`FragmentTree`]. Each fragment
//! gets a conformer ensemble (input geometry, shared library, per-run cache or fresh
//! generation, in that order). Candidates are then built by picking one conformer
//! per fragment and one torsion per link bond, placing the root fragment as-is and
//! attaching every child onto its parent's cap atom, breadth first.
//!
//! Unspecified stereocenters are enumerated first: every variant is a copy of the
//! input with a full set of tags and is assembled on its own.

use super::cache::RunCache;
use super::config::GeneratorSettings;
use super::control::{Poll, RunControl};
use super::error::EngineError;
use super::fragment_gen::FragmentConformerGenerator;
use super::registry::LibraryRegistry;
use super::tree::{FragmentNodeId, FragmentTree};
use crate::core::chem::canon::fragment_key;
use crate::core::chem::perception::Perception;
use crate::core::chem::stereo::{
    ChiralityCheck, StereoKind, check_chirality, find_stereo_centers, tagged_atoms,
    unspecified_centers,
};
use crate::core::library::entry::FragmentEntry;
use crate::core::library::store::InsertOutcome;
use crate::core::models::atom::Chirality;
use crate::core::models::conformer::Conformer;
use crate::core::models::fragment::Fragment;
use crate::core::models::molecule::Molecule;
use crate::core::torsions::library::TorsionMatch;
use crate::core::utils::geometry::{dihedral_degrees, robust_rotation_to_align, rotate_about_axis};
use nalgebra::Point3;
use rand::Rng;
use rand::rngs::StdRng;
use slotmap::SecondaryMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Accepted deviation (Å) of an input bond length from the covalent radius sum when
/// input coordinates are reused as a fragment conformer.
const INPUT_BOND_TOLERANCE: f64 = 0.35;
/// Random draws per requested candidate before sampling gives up on new combinations.
const SAMPLING_ATTEMPTS: usize = 20;
/// Heavy atoms at least this many bonds apart take part in the clash test.
const CLASH_MIN_SEPARATION: usize = 4;

/// One assembled whole-molecule structure.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Index into [`Assembly::variants`].
    pub variant: usize,
    pub coords: Vec<Point3<f64>>,
}

/// Where fragment conformers came from during one assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub fragments: usize,
    pub input_reused: usize,
    pub library_hits: usize,
    pub cache_hits: usize,
    pub generated: usize,
    pub clashing: usize,
}

#[derive(Debug)]
pub struct Assembly {
    /// Stereo variants of the input; each carries a full set of tags.
    pub variants: Vec<Molecule>,
    pub candidates: Vec<Candidate>,
    pub stats: AssemblyStats,
    /// The molecule's time limit ran out before every variant was assembled.
    pub timed_out: bool,
}

/// Copies of `mol` covering the configurations of its unspecified stereocenters.
///
/// Centers that already carry a tag are kept. With `k` free centers at most
/// `min(2^k, max_stereo_variants)` variants are produced; variant `v` gives the
/// `i`-th free center the tag selected by bit `i` of `v`.
pub fn stereo_variants(
    mol: &Molecule,
    perception: &Perception,
    max_variants: usize,
    enumerate_nitrogens: bool,
) -> Vec<Molecule> {
    let free: Vec<usize> = unspecified_centers(mol, &find_stereo_centers(mol, perception))
        .into_iter()
        .filter(|c| enumerate_nitrogens || c.kind == StereoKind::Tetrahedral)
        .filter(|c| mol.degree(c.atom) >= 3)
        .map(|c| c.atom)
        .collect();
    let max_variants = max_variants.max(1);
    let count = u32::try_from(free.len())
        .ok()
        .and_then(|k| 1usize.checked_shl(k))
        .map_or(max_variants, |all| all.min(max_variants));

    (0..count)
        .map(|v| {
            let mut variant = mol.clone();
            for (i, &atom) in free.iter().enumerate() {
                let bit = u32::try_from(i)
                    .ok()
                    .and_then(|i| v.checked_shr(i))
                    .unwrap_or(0)
                    & 1;
                variant.atom_mut(atom).chirality = if bit == 0 {
                    Chirality::Clockwise
                } else {
                    Chirality::CounterClockwise
                };
            }
            variant
        })
        .collect()
}

/// Builds whole-molecule candidates by fragment assembly.
pub struct FragmentAssembler<'a> {
    settings: &'a GeneratorSettings,
    registry: &'a LibraryRegistry,
}

enum Flow {
    Completed,
    TimedOut,
}

struct NodeTorsion {
    node: FragmentNodeId,
    torsion: Option<TorsionMatch>,
    angles: Vec<f64>,
}

impl<'a> FragmentAssembler<'a> {
    pub fn new(settings: &'a GeneratorSettings, registry: &'a LibraryRegistry) -> Self {
        Self { settings, registry }
    }

    /// Assembles candidates for every stereo variant of `mol`.
    ///
    /// The candidate budget is split evenly between variants. Candidates with
    /// heavy-atom clashes are dropped unless every candidate clashes.
    ///
    /// # Errors
    ///
    /// * [`EngineError::Aborted`] as soon as the run is cancelled.
    /// * [`EngineError::Timeout`] if the time limit ran out before any candidate exists.
    /// * [`EngineError::FragmentLibraryNotSet`] if a library is required but absent.
    /// * Any fragment generation failure, unchanged.
    pub fn assemble(
        &self,
        mol: &Molecule,
        perception: &Perception,
        cache: &mut RunCache,
        control: &RunControl,
        rng: &mut StdRng,
    ) -> Result<Assembly, EngineError> {
        let assembly = &self.settings.assembly;
        let variants = stereo_variants(
            mol,
            perception,
            assembly.max_stereo_variants,
            assembly.enumerate_nitrogens,
        );
        let budget = (assembly.max_candidates / variants.len()).max(1);
        let far_pairs = separated_heavy_pairs(mol, CLASH_MIN_SEPARATION);

        let mut stats = AssemblyStats::default();
        let mut candidates = Vec::new();
        let mut timed_out = false;
        for (index, variant) in variants.iter().enumerate() {
            let before = candidates.len();
            match self.assemble_variant(
                index,
                variant,
                perception,
                budget,
                cache,
                control,
                rng,
                &mut stats,
                &mut candidates,
            ) {
                Ok(Flow::Completed) => {}
                Ok(Flow::TimedOut) | Err(EngineError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(e) => return Err(e),
            }
            trace!(variant = index, candidates = candidates.len() - before, "Variant assembled");
        }
        if candidates.is_empty() && timed_out {
            return Err(EngineError::Timeout);
        }

        let clear: Vec<bool> = candidates
            .iter()
            .map(|c| !has_clash(mol, &c.coords, &far_pairs, assembly.clash_factor))
            .collect();
        stats.clashing = clear.iter().filter(|&&ok| !ok).count();
        if stats.clashing < candidates.len() {
            let mut keep = clear.into_iter();
            candidates.retain(|_| keep.next().unwrap_or(false));
        }

        debug!(
            variants = variants.len(),
            candidates = candidates.len(),
            fragments = stats.fragments,
            library_hits = stats.library_hits,
            generated = stats.generated,
            clashing = stats.clashing,
            timed_out,
            "Fragment assembly finished"
        );
        Ok(Assembly {
            variants,
            candidates,
            stats,
            timed_out,
        })
    }

    /// Resolves the conformers of every fragment of every stereo variant without
    /// assembling anything; new fragments end up in the shared library.
    pub fn collect_fragments(
        &self,
        mol: &Molecule,
        perception: &Perception,
        cache: &mut RunCache,
        control: &RunControl,
        rng: &mut StdRng,
    ) -> Result<AssemblyStats, EngineError> {
        let mut stats = AssemblyStats::default();
        let variants = stereo_variants(
            mol,
            perception,
            self.settings.assembly.max_stereo_variants,
            self.settings.assembly.enumerate_nitrogens,
        );
        for variant in &variants {
            let tree = FragmentTree::build(
                variant,
                perception,
                self.settings.sampling.macrocycle_ring_size,
            )?;
            for (_, node) in tree.iter() {
                control.check()?;
                self.fragment_conformers(&node.fragment, variant, cache, control, rng, &mut stats)?;
            }
        }
        Ok(stats)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_variant(
        &self,
        index: usize,
        variant: &Molecule,
        perception: &Perception,
        budget: usize,
        cache: &mut RunCache,
        control: &RunControl,
        rng: &mut StdRng,
        stats: &mut AssemblyStats,
        candidates: &mut Vec<Candidate>,
    ) -> Result<Flow, EngineError> {
        let tree = FragmentTree::build(
            variant,
            perception,
            self.settings.sampling.macrocycle_ring_size,
        )?;

        // === Phase 1: Fragment conformers ===
        let mut ensembles: SecondaryMap<FragmentNodeId, Vec<Conformer>> = SecondaryMap::new();
        for (id, node) in tree.iter() {
            match control.poll() {
                Poll::Continue => {}
                Poll::Abort => return Err(EngineError::Aborted),
                Poll::Timeout => return Ok(Flow::TimedOut),
            }
            let conformers = self.fragment_conformers(&node.fragment, variant, cache, control, rng, stats)?;
            ensembles.insert(id, conformers);
        }

        // === Phase 2: Link torsions ===
        let torsions: Vec<NodeTorsion> = tree
            .iter()
            .filter_map(|(id, node)| node.link.map(|link| (id, link)))
            .map(|(id, link)| {
                let torsion = self.registry.torsions.match_bond(variant, perception, link.bond);
                let angles = torsion
                    .as_ref()
                    .map(|t| t.candidate_angles(self.settings.assembly.sample_torsion_tolerance))
                    .unwrap_or_default();
                NodeTorsion {
                    node: id,
                    torsion,
                    angles,
                }
            })
            .collect();

        // === Phase 3: Combinations ===
        let mut radices: Vec<usize> = tree.order().iter().map(|&id| ensembles[id].len()).collect();
        radices.extend(torsions.iter().map(|t| t.angles.len().max(1)));
        let combinations = choose_combinations(&radices, budget, rng);

        // === Phase 4: Placement ===
        let nodes = tree.order().len();
        for combination in combinations {
            match control.poll() {
                Poll::Continue => {}
                Poll::Abort => return Err(EngineError::Aborted),
                Poll::Timeout => return Ok(Flow::TimedOut),
            }
            let (picks, angle_picks) = combination.split_at(nodes);
            let coords = place(variant, &tree, &ensembles, picks, &torsions, angle_picks)?;
            candidates.push(Candidate {
                variant: index,
                coords,
            });
        }
        Ok(Flow::Completed)
    }

    /// Conformers of one fragment in its local atom order.
    fn fragment_conformers(
        &self,
        fragment: &Fragment,
        molecule: &Molecule,
        cache: &mut RunCache,
        control: &RunControl,
        rng: &mut StdRng,
        stats: &mut AssemblyStats,
    ) -> Result<Vec<Conformer>, EngineError> {
        stats.fragments += 1;
        if self.settings.assembly.use_input_coordinates && input_geometry_usable(fragment, molecule) {
            stats.input_reused += 1;
            return Ok(vec![Conformer::new(fragment.coords_from_parent(&molecule.positions()), 0.0)]);
        }

        let form = fragment_key(fragment);
        let fingerprint = form.fingerprint;
        let library = self.registry.fragments.as_ref();
        match library {
            Some(library) => {
                if let Some(entry) = library.lookup_verified(fingerprint, &form.topology) {
                    let conformers = entry.conformers_for(&form);
                    if !conformers.is_empty() {
                        if cache.mark_counted(fingerprint) {
                            library.record_occurrence(fingerprint);
                        }
                        stats.library_hits += 1;
                        return Ok(conformers);
                    }
                }
            }
            None if self.settings.fragments.require_library => {
                return Err(EngineError::FragmentLibraryNotSet);
            }
            None => {}
        }

        if let Some(entry) = cache.get(fingerprint, &form.topology) {
            let conformers = entry.conformers_for(&form);
            if !conformers.is_empty() {
                stats.cache_hits += 1;
                return Ok(conformers);
            }
        }

        let generator = FragmentConformerGenerator::new(
            &self.settings.fragments,
            &self.settings.refinement,
            self.registry.forcefield.as_ref(),
        );
        let conformers = generator.generate(fragment, fingerprint, control, rng)?;
        stats.generated += 1;
        let entry = FragmentEntry::from_conformers(&form, &conformers);
        if let Some(library) = library {
            let first_in_run = cache.mark_counted(fingerprint);
            if library.insert(fingerprint, entry.clone()) == InsertOutcome::AlreadyPresent
                && first_in_run
            {
                library.record_occurrence(fingerprint);
            }
        }
        cache.insert(fingerprint, Arc::new(entry));
        Ok(conformers)
    }
}

/// Whether the input geometry of a fragment has sane bond lengths and the tagged
/// configuration at every stereocenter.
fn input_geometry_usable(fragment: &Fragment, molecule: &Molecule) -> bool {
    if !molecule.has_3d_coordinates() {
        return false;
    }
    let local = &fragment.molecule;
    let coords = local.positions();
    let bonds_ok = local.bonds().iter().all(|bond| {
        let expected = local.atom(bond.atom1).element.covalent_radius()
            + local.atom(bond.atom2).element.covalent_radius();
        let actual = (coords[bond.atom1] - coords[bond.atom2]).norm();
        (actual - expected).abs() <= INPUT_BOND_TOLERANCE
    });
    bonds_ok && check_chirality(local, &coords, &tagged_atoms(local)) == ChiralityCheck::Consistent
}

/// Selects which conformer/torsion index combinations to build.
///
/// All combinations are returned when they fit in `budget`; otherwise the all-zero
/// combination (lowest-energy conformers, first angles) followed by distinct random
/// ones.
fn choose_combinations(radices: &[usize], budget: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let total = radices
        .iter()
        .try_fold(1usize, |acc, &r| acc.checked_mul(r.max(1)));
    if let Some(total) = total.filter(|&t| t <= budget) {
        return (0..total)
            .map(|mut index| {
                radices
                    .iter()
                    .map(|&r| {
                        let r = r.max(1);
                        let digit = index % r;
                        index /= r;
                        digit
                    })
                    .collect()
            })
            .collect();
    }

    let first = vec![0; radices.len()];
    let mut seen: HashSet<Vec<usize>> = HashSet::from([first.clone()]);
    let mut combinations = vec![first];
    let mut attempts = 0;
    while combinations.len() < budget && attempts < budget * SAMPLING_ATTEMPTS {
        attempts += 1;
        let combination: Vec<usize> = radices.iter().map(|&r| rng.gen_range(0..r.max(1))).collect();
        if seen.insert(combination.clone()) {
            combinations.push(combination);
        }
    }
    combinations
}

/// Places one candidate: the root conformer as-is, then every child aligned onto
/// its parent's cap and turned to the selected link torsion.
fn place(
    mol: &Molecule,
    tree: &FragmentTree,
    ensembles: &SecondaryMap<FragmentNodeId, Vec<Conformer>>,
    picks: &[usize],
    torsions: &[NodeTorsion],
    angle_picks: &[usize],
) -> Result<Vec<Point3<f64>>, EngineError> {
    let missing = |what: &str| EngineError::Internal(format!("assembly lost track of {what}"));
    let mut coords = vec![Point3::origin(); mol.atom_count()];
    let mut placed: SecondaryMap<FragmentNodeId, Vec<Point3<f64>>> = SecondaryMap::new();

    for (position, (id, node)) in tree.iter().enumerate() {
        let conformer = ensembles
            .get(id)
            .and_then(|e| e.get(picks[position]))
            .ok_or_else(|| missing("a fragment conformer"))?;
        let mut local = conformer.coords.clone();

        if let (Some(parent_id), Some(link)) = (node.parent, node.link) {
            let parent_node = tree.node(parent_id).ok_or_else(|| missing("a parent node"))?;
            let parent_coords = placed.get(parent_id).ok_or_else(|| missing("parent coordinates"))?;
            let parent = &parent_node.fragment;
            let child = &node.fragment;
            let (Some(p_core), Some(p_cap), Some(c_core), Some(c_cap)) = (
                parent.local_index(link.parent_atom),
                parent.local_index(link.child_atom),
                child.local_index(link.child_atom),
                child.local_index(link.parent_atom),
            ) else {
                return Err(missing("link atoms"));
            };

            // Put the child's link atom on the parent's cap, pointing back at the parent.
            let anchor = parent_coords[p_cap];
            let from = local[c_cap] - local[c_core];
            let to = parent_coords[p_core] - anchor;
            let rotation = robust_rotation_to_align(&from, &to);
            let origin = local[c_core];
            for p in &mut local {
                *p = anchor + rotation * (*p - origin);
            }

            let slot = torsions.iter().position(|t| t.node == id);
            if let Some((torsion, target)) = slot.and_then(|i| {
                let t = &torsions[i];
                let m = t.torsion.as_ref()?;
                Some((m, *t.angles.get(angle_picks[i])?))
            }) {
                let [a, _, _, d] = torsion.atoms;
                let (parent_ref, child_ref) = if torsion.atoms[1] == link.parent_atom {
                    (a, d)
                } else {
                    (d, a)
                };
                let (Some(pr), Some(cr)) = (parent.local_index(parent_ref), child.local_index(child_ref))
                else {
                    return Err(missing("torsion reference atoms"));
                };
                let b = parent_coords[p_core];
                let c = local[c_core];
                let current = dihedral_degrees(&parent_coords[pr], &b, &c, &local[cr]);
                let all: Vec<usize> = (0..local.len()).collect();
                rotate_about_axis(&mut local, &all, &c, &(c - b), target - current);
            }
        }

        for (i, &atom) in node.fragment.core_atoms().iter().enumerate() {
            coords[atom] = local[i];
        }
        placed.insert(id, local);
    }
    Ok(coords)
}

/// Heavy-atom pairs at least `min_bonds` bonds apart.
fn separated_heavy_pairs(mol: &Molecule, min_bonds: usize) -> Vec<(usize, usize)> {
    let heavy = mol.heavy_atoms();
    let mut pairs = Vec::new();
    for &start in &heavy {
        let mut depth = vec![usize::MAX; mol.atom_count()];
        depth[start] = 0;
        let mut queue = VecDeque::from([start]);
        while let Some(atom) = queue.pop_front() {
            if depth[atom] + 1 >= min_bonds {
                continue;
            }
            for next in mol.neighbors(atom) {
                if depth[next] == usize::MAX {
                    depth[next] = depth[atom] + 1;
                    queue.push_back(next);
                }
            }
        }
        pairs.extend(
            heavy
                .iter()
                .filter(|&&other| other > start && depth[other] == usize::MAX)
                .map(|&other| (start, other)),
        );
    }
    pairs
}

fn has_clash(mol: &Molecule, coords: &[Point3<f64>], pairs: &[(usize, usize)], factor: f64) -> bool {
    pairs.iter().any(|&(i, j)| {
        let limit = factor * (mol.atom(i).element.vdw_radius() + mol.atom(j).element.vdw_radius());
        (coords[i] - coords[j]).norm() < limit
    })
}
