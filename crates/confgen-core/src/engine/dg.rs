//! Distance-geometry embedding.
//!
//! Bounds on every interatomic distance are derived from the graph (bond lengths,
//! bond angles, torsion ranges, van der Waals contacts) and tightened with the
//! triangle inequality. Each embedding samples a distance matrix inside the bounds,
//! converts it to a metric matrix and takes the three leading eigenvectors as
//! coordinates. The raw structure is then refined against the bounds plus chiral and
//! planar volume terms so tagged stereocenters come out with the right handedness.

use super::sampler::TrialGenerator;
use crate::core::chem::perception::Perception;
use crate::core::chem::stereo::{ChiralityCheck, check_chirality};
use crate::core::forcefield::minimizer::{MinimizeConfig, minimize};
use crate::core::forcefield::oracle::Objective;
use crate::core::models::atom::Chirality;
use crate::core::models::molecule::Molecule;
use crate::core::models::topology::BondOrder;
use nalgebra::{DMatrix, Point3, SymmetricEigen, Vector3};
use rand::Rng;
use rand::rngs::StdRng;
use std::collections::VecDeque;
use tracing::debug;

const BOND_MARGIN: f64 = 0.03;
const ANGLE_MARGIN: f64 = 0.08;
const TORSION_MARGIN: f64 = 0.08;
const VDW_SCALE: f64 = 0.7;
const UNBOUNDED: f64 = 1000.0;
/// Smallest signed volume (Å³) accepted for a tagged center during refinement.
const MIN_CHIRAL_VOLUME: f64 = 0.5;
const EIGEN_FLOOR: f64 = 1e-6;

/// Lower and upper distance bounds for every atom pair.
#[derive(Debug, Clone)]
pub struct DistanceBounds {
    lower: DMatrix<f64>,
    upper: DMatrix<f64>,
}

impl DistanceBounds {
    pub fn from_molecule(mol: &Molecule, perception: &Perception) -> Self {
        let n = mol.atom_count();
        let mut bounds = Self {
            lower: DMatrix::zeros(n, n),
            upper: DMatrix::from_element(n, n, UNBOUNDED),
        };
        for i in 0..n {
            bounds.upper[(i, i)] = 0.0;
        }

        for bond in mol.bonds() {
            let d = bond_length(mol, bond.atom1, bond.atom2);
            bounds.set(bond.atom1, bond.atom2, d - BOND_MARGIN, d + BOND_MARGIN);
        }

        let mut one_three = vec![vec![false; n]; n];
        for j in 0..n {
            let neighbors = mol.sorted_neighbors(j);
            for (x, &i) in neighbors.iter().enumerate() {
                for &k in &neighbors[x + 1..] {
                    if mol.bond_between(i, k).is_some() {
                        continue;
                    }
                    let theta = bond_angle(mol, perception, i, j, k).to_radians();
                    let (a, b) = (bond_length(mol, i, j), bond_length(mol, j, k));
                    let d = (a * a + b * b - 2.0 * a * b * theta.cos()).sqrt();
                    bounds.set(i, k, d - ANGLE_MARGIN, d + ANGLE_MARGIN);
                    one_three[i][k] = true;
                    one_three[k][i] = true;
                }
            }
        }

        for bond in mol.bonds() {
            let (j, k) = (bond.atom1, bond.atom2);
            for i in mol.sorted_neighbors(j) {
                for l in mol.sorted_neighbors(k) {
                    if i == k || l == j || i == l {
                        continue;
                    }
                    if mol.bond_between(i, l).is_some() || one_three[i][l] {
                        continue;
                    }
                    let geometry = TorsionGeometry {
                        d_ij: bond_length(mol, i, j),
                        d_jk: bond_length(mol, j, k),
                        d_kl: bond_length(mol, k, l),
                        theta_j: bond_angle(mol, perception, i, j, k).to_radians(),
                        theta_k: bond_angle(mol, perception, j, k, l).to_radians(),
                    };
                    let cis = geometry.distance(0.0);
                    let far = if shares_small_ring(mol, perception, [i, j, k, l]) {
                        let planar = perception.hybridization(j).is_planar()
                            && perception.hybridization(k).is_planar();
                        geometry.distance(if planar { 0.0 } else { 60f64.to_radians() })
                    } else {
                        geometry.distance(std::f64::consts::PI)
                    };
                    bounds.set(i, l, cis - TORSION_MARGIN, far + TORSION_MARGIN);
                }
            }
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if bounds.lower[(i, j)] == 0.0 {
                    let contact = mol.atom(i).element.vdw_radius() + mol.atom(j).element.vdw_radius();
                    bounds.lower[(i, j)] = VDW_SCALE * contact;
                    bounds.lower[(j, i)] = VDW_SCALE * contact;
                }
            }
        }

        if !bounds.smooth() {
            debug!(molecule = %mol.name, "Distance bounds were inconsistent after smoothing");
        }
        bounds
    }

    pub fn len(&self) -> usize {
        self.lower.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lower(&self, i: usize, j: usize) -> f64 {
        self.lower[(i, j)]
    }

    pub fn upper(&self, i: usize, j: usize) -> f64 {
        self.upper[(i, j)]
    }

    /// Narrows the bounds of a pair; a pair already constrained keeps the tighter range.
    fn set(&mut self, i: usize, j: usize, lower: f64, upper: f64) {
        let lower = lower.max(self.lower[(i, j)]).max(0.0);
        let upper = upper.min(self.upper[(i, j)]).max(lower);
        for (a, b) in [(i, j), (j, i)] {
            self.lower[(a, b)] = lower;
            self.upper[(a, b)] = upper;
        }
    }

    /// Floyd-style triangle smoothing. Returns `false` if some pair ended up with
    /// crossing bounds, which are then collapsed to their midpoint.
    fn smooth(&mut self) -> bool {
        let n = self.len();
        for k in 0..n {
            for i in 0..n {
                if i == k {
                    continue;
                }
                for j in (i + 1)..n {
                    if j == k {
                        continue;
                    }
                    let via = self.upper[(i, k)] + self.upper[(k, j)];
                    if via < self.upper[(i, j)] {
                        self.upper[(i, j)] = via;
                        self.upper[(j, i)] = via;
                    }
                    let low = (self.lower[(i, k)] - self.upper[(k, j)])
                        .max(self.lower[(j, k)] - self.upper[(k, i)]);
                    if low > self.lower[(i, j)] {
                        self.lower[(i, j)] = low;
                        self.lower[(j, i)] = low;
                    }
                }
            }
        }

        let mut consistent = true;
        for i in 0..n {
            for j in (i + 1)..n {
                if self.lower[(i, j)] > self.upper[(i, j)] {
                    consistent = false;
                    let mid = 0.5 * (self.lower[(i, j)] + self.upper[(i, j)]);
                    for (a, b) in [(i, j), (j, i)] {
                        self.lower[(a, b)] = mid;
                        self.upper[(a, b)] = mid;
                    }
                }
            }
        }
        consistent
    }
}

struct TorsionGeometry {
    d_ij: f64,
    d_jk: f64,
    d_kl: f64,
    theta_j: f64,
    theta_k: f64,
}

impl TorsionGeometry {
    /// Distance between the outer atoms of `i-j-k-l` at dihedral `phi` (radians).
    fn distance(&self, phi: f64) -> f64 {
        let i = Vector3::new(
            self.d_ij * self.theta_j.cos(),
            self.d_ij * self.theta_j.sin(),
            0.0,
        );
        let l = Vector3::new(
            self.d_jk - self.d_kl * self.theta_k.cos(),
            self.d_kl * self.theta_k.sin() * phi.cos(),
            self.d_kl * self.theta_k.sin() * phi.sin(),
        );
        (l - i).norm()
    }
}

fn bond_length(mol: &Molecule, i: usize, j: usize) -> f64 {
    let base = mol.atom(i).element.covalent_radius() + mol.atom(j).element.covalent_radius();
    let shortening = match mol.bond_between(i, j).map(|b| mol.bond(b).order) {
        Some(BondOrder::Double) => 0.10,
        Some(BondOrder::Triple) => 0.16,
        Some(BondOrder::Aromatic) => 0.04,
        _ => 0.0,
    };
    base - shortening
}

/// Ideal angle `i-j-k` in degrees; small rings override the hybridization angle.
fn bond_angle(mol: &Molecule, perception: &Perception, i: usize, j: usize, k: usize) -> f64 {
    let ring_size = |a: usize, b: usize| {
        mol.bond_between(a, b)
            .and_then(|bond| perception.rings.smallest_ring_size(bond))
    };
    match (ring_size(i, j), ring_size(j, k)) {
        (Some(3), Some(3)) => 60.0,
        (Some(4), Some(4)) => 90.0,
        (Some(5), Some(5)) => 108.0,
        _ => perception.hybridization(j).ideal_angle(),
    }
}

/// Whether `i-j-k-l` runs along one ring of at most six atoms.
fn shares_small_ring(mol: &Molecule, perception: &Perception, path: [usize; 4]) -> bool {
    let [i, j, k, l] = path;
    let Some(size) = mol
        .bond_between(j, k)
        .and_then(|b| perception.rings.smallest_ring_size(b))
    else {
        return false;
    };
    if size > 6 {
        return false;
    }
    let closing = size - 3;
    if closing == 0 {
        return false;
    }
    let mut depth = vec![usize::MAX; mol.atom_count()];
    depth[i] = 0;
    let mut queue = VecDeque::from([i]);
    while let Some(atom) = queue.pop_front() {
        if atom == l {
            return depth[atom] <= closing;
        }
        if depth[atom] >= closing {
            continue;
        }
        for &(next, bond) in mol.bonds_of(atom) {
            if next == j || next == k || depth[next] != usize::MAX {
                continue;
            }
            if !perception.rings.is_ring_bond(bond) {
                continue;
            }
            depth[next] = depth[atom] + 1;
            queue.push_back(next);
        }
    }
    false
}

/// A signed-volume target on a center and its first three sorted neighbors.
#[derive(Debug, Clone, Copy)]
struct VolumeConstraint {
    center: usize,
    neighbors: [usize; 3],
    /// `1` for counterclockwise, `-1` for clockwise, `0` for planar.
    sign: f64,
}

impl VolumeConstraint {
    fn volume(&self, coords: &[Point3<f64>]) -> (f64, [Vector3<f64>; 3]) {
        let c = coords[self.center];
        let a = coords[self.neighbors[0]] - c;
        let b = coords[self.neighbors[1]] - c;
        let d = coords[self.neighbors[2]] - c;
        (a.dot(&b.cross(&d)), [b.cross(&d), d.cross(&a), a.cross(&b)])
    }

    /// Penalty and its derivative with respect to the volume.
    fn penalty(&self, volume: f64) -> (f64, f64) {
        if self.sign == 0.0 {
            return (volume * volume, 2.0 * volume);
        }
        let shortfall = MIN_CHIRAL_VOLUME - self.sign * volume;
        if shortfall > 0.0 {
            (shortfall * shortfall, -2.0 * self.sign * shortfall)
        } else {
            (0.0, 0.0)
        }
    }
}

/// Tagged stereocenters whose handedness an embedding can realize: tetrahedral-like
/// atoms with at least three explicit neighbors.
pub fn enforceable_centers(mol: &Molecule, perception: &Perception) -> Vec<usize> {
    (0..mol.atom_count())
        .filter(|&atom| {
            mol.atom(atom).chirality.is_specified()
                && mol.degree(atom) >= 3
                && !perception.hybridization(atom).is_planar()
        })
        .collect()
}

struct BoundsObjective<'a> {
    bounds: &'a DistanceBounds,
    volumes: &'a [VolumeConstraint],
}

impl Objective for BoundsObjective<'_> {
    fn energy(&self, coords: &[Point3<f64>]) -> f64 {
        self.energy_and_gradient(coords).0
    }

    fn gradient(&self, coords: &[Point3<f64>]) -> Vec<Vector3<f64>> {
        self.energy_and_gradient(coords).1
    }

    fn energy_and_gradient(&self, coords: &[Point3<f64>]) -> (f64, Vec<Vector3<f64>>) {
        let n = coords.len();
        let mut energy = 0.0;
        let mut gradient = vec![Vector3::zeros(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let v = coords[i] - coords[j];
                let d = v.norm().max(1e-8);
                let (lower, upper) = (self.bounds.lower(i, j), self.bounds.upper(i, j));
                let slope = if d > upper {
                    energy += (d - upper).powi(2);
                    2.0 * (d - upper)
                } else if d < lower {
                    energy += (lower - d).powi(2);
                    -2.0 * (lower - d)
                } else {
                    continue;
                };
                let g = v * (slope / d);
                gradient[i] += g;
                gradient[j] -= g;
            }
        }
        for constraint in self.volumes {
            let (volume, partials) = constraint.volume(coords);
            let (penalty, slope) = constraint.penalty(volume);
            if slope == 0.0 {
                continue;
            }
            energy += penalty;
            for (x, &atom) in constraint.neighbors.iter().enumerate() {
                gradient[atom] += partials[x] * slope;
                gradient[constraint.center] -= partials[x] * slope;
            }
        }
        (energy, gradient)
    }
}

/// Embeds one molecule graph repeatedly from a fixed set of bounds.
#[derive(Debug, Clone)]
pub struct DistanceGeometry {
    bounds: DistanceBounds,
    volumes: Vec<VolumeConstraint>,
    refine: MinimizeConfig,
}

impl DistanceGeometry {
    pub fn new(mol: &Molecule, perception: &Perception) -> Self {
        let mut volumes: Vec<VolumeConstraint> = enforceable_centers(mol, perception)
            .into_iter()
            .filter_map(|center| {
                let sorted = mol.sorted_neighbors(center);
                let sign = match mol.atom(center).chirality {
                    Chirality::CounterClockwise => 1.0,
                    Chirality::Clockwise => -1.0,
                    Chirality::Unspecified => return None,
                };
                Some(VolumeConstraint {
                    center,
                    neighbors: [sorted[0], sorted[1], sorted[2]],
                    sign,
                })
            })
            .collect();
        volumes.extend((0..mol.atom_count()).filter_map(|center| {
            let sorted = mol.sorted_neighbors(center);
            (sorted.len() == 3 && perception.hybridization(center).is_planar()).then(|| {
                VolumeConstraint {
                    center,
                    neighbors: [sorted[0], sorted[1], sorted[2]],
                    sign: 0.0,
                }
            })
        }));
        Self {
            bounds: DistanceBounds::from_molecule(mol, perception),
            volumes,
            refine: MinimizeConfig {
                max_steps: 400,
                gradient_threshold: 1e-3,
                max_displacement: 0.3,
            },
        }
    }

    pub fn bounds(&self) -> &DistanceBounds {
        &self.bounds
    }

    /// One embedding refined against the bounds, or `None` if the metric matrix had no
    /// usable positive spectrum.
    pub fn embed(&self, rng: &mut StdRng) -> Option<Vec<Point3<f64>>> {
        let n = self.bounds.len();
        match n {
            0 => return None,
            1 => return Some(vec![Point3::origin()]),
            _ => {}
        }

        let mut distances = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in (i + 1)..n {
                let (lower, upper) = (self.bounds.lower(i, j), self.bounds.upper(i, j));
                let d = if upper > lower {
                    rng.gen_range(lower..upper)
                } else {
                    lower
                };
                distances[(i, j)] = d * d;
                distances[(j, i)] = d * d;
            }
        }

        let total: f64 = distances.iter().sum::<f64>() / 2.0;
        let nf = n as f64;
        let to_center: Vec<f64> = (0..n)
            .map(|i| distances.row(i).sum() / nf - total / (nf * nf))
            .collect();
        let metric = DMatrix::from_fn(n, n, |i, j| 0.5 * (to_center[i] + to_center[j] - distances[(i, j)]));

        let eigen = SymmetricEigen::new(metric);
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
        if eigen.eigenvalues[order[0]] <= EIGEN_FLOOR {
            return None;
        }

        let mut coords: Vec<Point3<f64>> = (0..n)
            .map(|i| {
                let mut p = [0.0; 3];
                for (axis, value) in p.iter_mut().enumerate() {
                    let Some(&column) = order.get(axis) else {
                        *value = rng.gen_range(-0.1..0.1);
                        continue;
                    };
                    let lambda = eigen.eigenvalues[column];
                    *value = if lambda > EIGEN_FLOOR {
                        lambda.sqrt() * eigen.eigenvectors[(i, column)]
                    } else {
                        rng.gen_range(-0.1..0.1)
                    };
                }
                Point3::new(p[0], p[1], p[2])
            })
            .collect();

        if self.mostly_inverted(&coords) {
            for p in &mut coords {
                p.x = -p.x;
            }
        }

        let objective = BoundsObjective {
            bounds: &self.bounds,
            volumes: &self.volumes,
        };
        minimize(&objective, &mut coords, &self.refine).ok()?;
        Some(coords)
    }

    fn mostly_inverted(&self, coords: &[Point3<f64>]) -> bool {
        let (mut matched, mut inverted) = (0, 0);
        for constraint in self.volumes.iter().filter(|c| c.sign != 0.0) {
            let (volume, _) = constraint.volume(coords);
            if volume * constraint.sign > 0.0 {
                matched += 1;
            } else {
                inverted += 1;
            }
        }
        inverted > matched
    }
}

/// Trial generator embedding a whole molecule (or fragment) by distance geometry.
///
/// Refined structures are accepted only when every enforceable tagged center has
/// the tagged handedness.
pub struct DgTrials<'a> {
    molecule: &'a Molecule,
    geometry: DistanceGeometry,
    centers: Vec<usize>,
}

impl<'a> DgTrials<'a> {
    pub fn new(molecule: &'a Molecule, perception: &Perception) -> Self {
        Self {
            molecule,
            geometry: DistanceGeometry::new(molecule, perception),
            centers: enforceable_centers(molecule, perception),
        }
    }
}

impl TrialGenerator for DgTrials<'_> {
    fn generate(&mut self, _trial: usize, rng: &mut StdRng) -> Option<Vec<Point3<f64>>> {
        let mut coords = self.geometry.embed(rng)?;
        match check_chirality(self.molecule, &coords, &self.centers) {
            ChiralityCheck::Consistent => Some(coords),
            ChiralityCheck::Inverted => {
                for p in &mut coords {
                    p.x = -p.x;
                }
                Some(coords)
            }
            ChiralityCheck::Mixed => None,
        }
    }

    fn accept(&self, coords: &[Point3<f64>]) -> bool {
        check_chirality(self.molecule, coords, &self.centers) == ChiralityCheck::Consistent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use rand::SeedableRng;

    fn add(mol: &mut Molecule, element: Element) -> usize {
        mol.add_atom(Atom::new(element, Point3::origin()))
    }

    fn chain(length: usize) -> Molecule {
        let mut mol = Molecule::new("chain");
        for i in 0..length {
            add(&mut mol, Element::C);
            if i > 0 {
                mol.add_bond(i - 1, i, BondOrder::Single).unwrap();
            }
        }
        mol
    }

    fn benzene() -> Molecule {
        let mut mol = Molecule::new("benzene");
        for _ in 0..6 {
            let c = add(&mut mol, Element::C);
            mol.atom_mut(c).aromatic = true;
            mol.atom_mut(c).implicit_hydrogens = 1;
        }
        for i in 0..6 {
            mol.add_bond(i, (i + 1) % 6, BondOrder::Aromatic).unwrap();
        }
        mol
    }

    /// C1 is a stereocenter carrying F, Cl, Br and a methyl.
    fn chiral(tag: Chirality) -> Molecule {
        let mut mol = Molecule::new("chiral");
        let c0 = add(&mut mol, Element::C);
        let c1 = add(&mut mol, Element::C);
        let f = add(&mut mol, Element::F);
        let cl = add(&mut mol, Element::Cl);
        let br = add(&mut mol, Element::Br);
        for (a, b) in [(c0, c1), (c1, f), (c1, cl), (c1, br)] {
            mol.add_bond(a, b, BondOrder::Single).unwrap();
        }
        mol.atom_mut(c1).chirality = tag;
        mol
    }

    #[test]
    fn bounds_follow_bond_and_angle_geometry() {
        let mol = chain(4);
        let perception = Perception::new(&mol);
        let bounds = DistanceBounds::from_molecule(&mol, &perception);
        let cc = 2.0 * Element::C.covalent_radius();
        assert!((bounds.lower(0, 1) - (cc - BOND_MARGIN)).abs() < 1e-9);
        assert!((bounds.upper(0, 1) - (cc + BOND_MARGIN)).abs() < 1e-9);
        let one_three = bounds.lower(0, 2);
        assert!(one_three > cc && one_three < 2.0 * cc);
        assert!(bounds.upper(0, 3) > bounds.lower(0, 3));
        assert!(bounds.upper(0, 3) <= bounds.upper(0, 1) + bounds.upper(1, 3) + 1e-9);
    }

    #[test]
    fn embedded_chain_respects_bond_lengths() {
        let mol = chain(5);
        let perception = Perception::new(&mol);
        let geometry = DistanceGeometry::new(&mol, &perception);
        let coords = geometry.embed(&mut StdRng::seed_from_u64(7)).unwrap();
        for bond in mol.bonds() {
            let d = (coords[bond.atom1] - coords[bond.atom2]).norm();
            assert!((d - 2.0 * Element::C.covalent_radius()).abs() < 0.15, "bond length {d}");
        }
    }

    #[test]
    fn aromatic_ring_keeps_ring_distances() {
        let mol = benzene();
        let perception = Perception::new(&mol);
        let geometry = DistanceGeometry::new(&mol, &perception);
        let bounds = geometry.bounds().clone();
        assert!(bounds.upper(0, 3) - bounds.lower(0, 3) < 0.5);
        let coords = geometry.embed(&mut StdRng::seed_from_u64(3)).unwrap();
        for i in 0..6 {
            let para = (coords[i] - coords[(i + 3) % 6]).norm();
            assert!(para > bounds.lower(i, (i + 3) % 6) - 0.1, "para distance {para}");
            assert!(para < bounds.upper(i, (i + 3) % 6) + 0.1, "para distance {para}");
        }
    }

    #[test]
    fn tagged_center_is_embedded_with_its_handedness() {
        for tag in [Chirality::Clockwise, Chirality::CounterClockwise] {
            let mol = chiral(tag);
            let perception = Perception::new(&mol);
            let mut trials = DgTrials::new(&mol, &perception);
            let mut rng = StdRng::seed_from_u64(11);
            let mut produced = 0;
            for trial in 0..5 {
                if let Some(coords) = trials.generate(trial, &mut rng) {
                    assert_eq!(mol.chirality_in(&coords, 1), tag);
                    assert!(trials.accept(&coords));
                    produced += 1;
                }
            }
            assert!(produced > 0);
        }
    }

    #[test]
    fn single_atom_embeds_at_origin() {
        let mut mol = Molecule::new("atom");
        add(&mut mol, Element::O);
        let perception = Perception::new(&mol);
        let coords = DistanceGeometry::new(&mol, &perception)
            .embed(&mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(coords, vec![Point3::origin()]);
    }
}
