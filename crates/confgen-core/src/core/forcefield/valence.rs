use super::oracle::{ForceField, ForceFieldError, ForceFieldFactory, ForceFieldKind, Objective};
use super::params::{ElementParams, ForceFieldParams};
use super::potentials;
use crate::core::chem::perception::{Hybridization, Perception};
use crate::core::models::molecule::Molecule;
use crate::core::models::topology::BondOrder;
use nalgebra::{Point3, Vector3};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct BondTerm {
    i: usize,
    j: usize,
    rest: f64,
    force: f64,
}

#[derive(Debug, Clone, Copy)]
struct AngleTerm {
    i: usize,
    center: usize,
    k: usize,
    cos_rest: f64,
    force: f64,
}

#[derive(Debug, Clone, Copy)]
struct TorsionTerm {
    atoms: [usize; 4],
    barrier: f64,
    periodicity: f64,
    sign: f64,
}

#[derive(Debug, Clone, Copy)]
struct PairTerm {
    i: usize,
    j: usize,
    r_min: f64,
    well_depth: f64,
}

#[derive(Debug, Clone, Default)]
struct Terms {
    atom_count: usize,
    bonds: Vec<BondTerm>,
    angles: Vec<AngleTerm>,
    torsions: Vec<TorsionTerm>,
    pairs: Vec<PairTerm>,
}

/// Energy decomposition of one evaluation, in kcal/mol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyComponents {
    pub bond_stretch: f64,
    pub angle_bend: f64,
    pub torsion: f64,
    pub van_der_waals: f64,
}

impl EnergyComponents {
    pub fn total(&self) -> f64 {
        self.bond_stretch + self.angle_bend + self.torsion + self.van_der_waals
    }
}

/// A compact valence force field parameterized per element and hybridization.
///
/// Bond rest lengths come from covalent radii scaled by bond order; angle rest values
/// from the center's hybridization (60° and 90° inside three- and four-membered rings);
/// torsion profiles from the hybridization of the central bond's atoms.
#[derive(Debug, Clone)]
pub struct ValenceForceField {
    params: Arc<ForceFieldParams>,
    kind: ForceFieldKind,
    strict: bool,
    terms: Terms,
}

impl ValenceForceField {
    pub fn new(params: Arc<ForceFieldParams>, kind: ForceFieldKind, strict: bool) -> Self {
        Self {
            params,
            kind,
            strict,
            terms: Terms::default(),
        }
    }

    pub fn components(&self, coords: &[Point3<f64>]) -> EnergyComponents {
        let mut components = EnergyComponents::default();
        self.evaluate(coords, None, &mut components);
        components
    }

    fn atom_params(&self, molecule: &Molecule) -> Result<Vec<ElementParams>, ForceFieldError> {
        molecule
            .atoms()
            .iter()
            .enumerate()
            .map(|(atom, a)| match self.params.element(a.element) {
                Some(p) => Ok(*p),
                None if self.strict => Err(ForceFieldError::MissingParameters {
                    element: a.element,
                    atom,
                }),
                None => Ok(ElementParams::generic(a.element)),
            })
            .collect()
    }

    fn evaluate(
        &self,
        coords: &[Point3<f64>],
        mut gradient: Option<&mut [Vector3<f64>]>,
        components: &mut EnergyComponents,
    ) {
        let terms = &self.terms;
        if coords.len() != terms.atom_count {
            components.bond_stretch = f64::INFINITY;
            return;
        }

        for t in &terms.bonds {
            let delta = coords[t.i] - coords[t.j];
            let r = delta.norm();
            components.bond_stretch += potentials::harmonic(r, t.rest, t.force);
            if let Some(g) = gradient.as_deref_mut() {
                if r > 1e-8 {
                    let f = delta * (potentials::harmonic_derivative(r, t.rest, t.force) / r);
                    g[t.i] += f;
                    g[t.j] -= f;
                }
            }
        }

        for t in &terms.angles {
            let a = coords[t.i] - coords[t.center];
            let b = coords[t.k] - coords[t.center];
            let (na, nb) = (a.norm(), b.norm());
            if na < 1e-8 || nb < 1e-8 {
                continue;
            }
            let cos = (a.dot(&b) / (na * nb)).clamp(-1.0, 1.0);
            components.angle_bend += potentials::harmonic(cos, t.cos_rest, t.force);
            if let Some(g) = gradient.as_deref_mut() {
                let de = potentials::harmonic_derivative(cos, t.cos_rest, t.force);
                let di = (b / (na * nb) - a * (cos / (na * na))) * de;
                let dk = (a / (na * nb) - b * (cos / (nb * nb))) * de;
                g[t.i] += di;
                g[t.k] += dk;
                g[t.center] -= di + dk;
            }
        }

        for t in &terms.torsions {
            let [i, j, k, l] = t.atoms;
            let Some((phi, dphi)) = dihedral_with_gradient(&coords[i], &coords[j], &coords[k], &coords[l])
            else {
                continue;
            };
            components.torsion += potentials::periodic_torsion(phi, t.barrier, t.periodicity, t.sign);
            if let Some(g) = gradient.as_deref_mut() {
                let de = potentials::periodic_torsion_derivative(phi, t.barrier, t.periodicity, t.sign);
                for (atom, d) in t.atoms.iter().zip(dphi.iter()) {
                    g[*atom] += d * de;
                }
            }
        }

        let cutoff = self.params.globals.nonbonded_cutoff;
        for t in &terms.pairs {
            let delta = coords[t.i] - coords[t.j];
            let r = delta.norm();
            if r > cutoff {
                continue;
            }
            components.van_der_waals += potentials::lennard_jones_12_6(r, t.r_min, t.well_depth);
            if let Some(g) = gradient.as_deref_mut() {
                if r > 1e-6 {
                    let f = delta
                        * (potentials::lennard_jones_12_6_derivative(r, t.r_min, t.well_depth) / r);
                    g[t.i] += f;
                    g[t.j] -= f;
                }
            }
        }
    }
}

impl Objective for ValenceForceField {
    fn energy(&self, coords: &[Point3<f64>]) -> f64 {
        self.components(coords).total()
    }

    fn gradient(&self, coords: &[Point3<f64>]) -> Vec<Vector3<f64>> {
        self.energy_and_gradient(coords).1
    }

    fn energy_and_gradient(&self, coords: &[Point3<f64>]) -> (f64, Vec<Vector3<f64>>) {
        let mut gradient = vec![Vector3::zeros(); coords.len()];
        let mut components = EnergyComponents::default();
        self.evaluate(coords, Some(&mut gradient), &mut components);
        (components.total(), gradient)
    }
}

impl ForceField for ValenceForceField {
    fn setup(&mut self, molecule: &Molecule) -> Result<(), ForceFieldError> {
        if molecule.is_empty() {
            return Err(ForceFieldError::EmptyStructure);
        }
        let atom_params = self.atom_params(molecule)?;
        let perception = Perception::new(molecule);
        let globals = self.params.globals;
        let mut terms = Terms {
            atom_count: molecule.atom_count(),
            ..Terms::default()
        };

        for bond in molecule.bonds() {
            let scale = match bond.order {
                BondOrder::Single => 1.0,
                BondOrder::Aromatic => 0.93,
                BondOrder::Double => 0.87,
                BondOrder::Triple => 0.78,
            };
            terms.bonds.push(BondTerm {
                i: bond.atom1,
                j: bond.atom2,
                rest: (atom_params[bond.atom1].covalent_radius
                    + atom_params[bond.atom2].covalent_radius)
                    * scale,
                force: globals.bond_force,
            });
        }

        for center in 0..molecule.atom_count() {
            let neighbors = molecule.sorted_neighbors(center);
            if neighbors.len() < 2 || neighbors.len() > 4 {
                continue;
            }
            let ideal = perception.hybridization(center).ideal_angle();
            for (x, &i) in neighbors.iter().enumerate() {
                for &k in &neighbors[x + 1..] {
                    let rest = if molecule.bond_between(i, k).is_some() {
                        60.0
                    } else if shares_other_neighbor(molecule, i, k, center) {
                        90.0
                    } else {
                        ideal
                    };
                    terms.angles.push(AngleTerm {
                        i,
                        center,
                        k,
                        cos_rest: rest.to_radians().cos(),
                        force: globals.angle_force,
                    });
                }
            }
        }

        for bond in molecule.bonds() {
            let (j, k) = (bond.atom1, bond.atom2);
            let (hj, hk) = (perception.hybridization(j), perception.hybridization(k));
            if hj == Hybridization::Sp || hk == Hybridization::Sp {
                continue;
            }
            let quads: Vec<[usize; 4]> = molecule
                .neighbors(j)
                .filter(|&i| i != k)
                .flat_map(|i| {
                    molecule
                        .neighbors(k)
                        .filter(move |&l| l != j && l != i)
                        .map(move |l| [i, j, k, l])
                })
                .collect();
            if quads.is_empty() {
                continue;
            }
            let (barrier, periodicity, sign) = torsion_profile(bond.order, hj, hk);
            let share = barrier / quads.len() as f64;
            for atoms in quads {
                terms.torsions.push(TorsionTerm {
                    atoms,
                    barrier: share,
                    periodicity,
                    sign,
                });
            }
        }

        if self.kind == ForceFieldKind::Full {
            for i in 0..molecule.atom_count() {
                let distances = bond_distances(molecule, i, 3);
                for j in i + 1..molecule.atom_count() {
                    let scale = match distances[j] {
                        Some(d) if d < 3 => continue,
                        Some(3) => globals.one_four_scale,
                        _ => 1.0,
                    };
                    let (pi, pj) = (atom_params[i], atom_params[j]);
                    terms.pairs.push(PairTerm {
                        i,
                        j,
                        r_min: pi.vdw_radius + pj.vdw_radius,
                        well_depth: (pi.well_depth * pj.well_depth).sqrt() * scale,
                    });
                }
            }
        }

        self.terms = terms;
        Ok(())
    }
}

/// Produces [`ValenceForceField`] instances sharing one parameter set.
#[derive(Debug, Clone)]
pub struct ValenceFactory {
    pub params: Arc<ForceFieldParams>,
    pub kind: ForceFieldKind,
    pub strict: bool,
}

impl ForceFieldFactory for ValenceFactory {
    fn create(&self) -> Box<dyn ForceField> {
        Box::new(ValenceForceField::new(
            Arc::clone(&self.params),
            self.kind,
            self.strict,
        ))
    }
}

/// `(barrier, periodicity, sign)` for rotation about a bond.
fn torsion_profile(order: BondOrder, a: Hybridization, b: Hybridization) -> (f64, f64, f64) {
    match (order, a.is_planar(), b.is_planar()) {
        (BondOrder::Double, _, _) => (45.0, 2.0, -1.0),
        (BondOrder::Aromatic, _, _) => (25.0, 2.0, -1.0),
        (_, true, true) => (5.0, 2.0, -1.0),
        (_, true, false) | (_, false, true) => (1.0, 6.0, 1.0),
        _ => (2.0, 3.0, 1.0),
    }
}

fn shares_other_neighbor(molecule: &Molecule, i: usize, k: usize, center: usize) -> bool {
    molecule
        .neighbors(i)
        .any(|n| n != center && molecule.bond_between(n, k).is_some())
}

/// Bond-count distances from `start`, explored up to `max_depth`; `None` beyond.
fn bond_distances(molecule: &Molecule, start: usize, max_depth: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; molecule.atom_count()];
    dist[start] = Some(0);
    let mut queue = VecDeque::from([start]);
    while let Some(atom) = queue.pop_front() {
        let Some(d) = dist[atom] else { continue };
        if d == max_depth {
            continue;
        }
        for n in molecule.neighbors(atom) {
            if dist[n].is_none() {
                dist[n] = Some(d + 1);
                queue.push_back(n);
            }
        }
    }
    dist
}

/// Dihedral angle in radians with its gradient with respect to the four atoms.
///
/// Returns `None` when either bond triple is collinear.
fn dihedral_with_gradient(
    r1: &Point3<f64>,
    r2: &Point3<f64>,
    r3: &Point3<f64>,
    r4: &Point3<f64>,
) -> Option<(f64, [Vector3<f64>; 4])> {
    let f = r1 - r2;
    let g = r2 - r3;
    let h = r4 - r3;
    let a = f.cross(&g);
    let b = h.cross(&g);
    let (a2, b2) = (a.norm_squared(), b.norm_squared());
    let gn = g.norm();
    if a2 < 1e-10 || b2 < 1e-10 || gn < 1e-8 {
        return None;
    }
    let phi = (b.cross(&a).dot(&g) / gn).atan2(a.dot(&b));
    let fg = f.dot(&g);
    let hg = h.dot(&g);
    let d1 = a * (-gn / a2);
    let d4 = b * (gn / b2);
    let d2 = a * (gn / a2) + a * (fg / (a2 * gn)) - b * (hg / (b2 * gn));
    let d3 = b * (-gn / b2) - a * (fg / (a2 * gn)) + b * (hg / (b2 * gn));
    Some((phi, [d1, d2, d3, d4]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::utils::geometry::dihedral_degrees;

    fn pentanol_like() -> Molecule {
        let mut mol = Molecule::new("chain");
        let positions = [
            (Element::C, 0.0, 0.0, 0.0),
            (Element::C, 1.52, 0.1, 0.0),
            (Element::C, 2.05, 1.48, 0.2),
            (Element::C, 3.55, 1.5, 0.6),
            (Element::O, 4.1, 2.8, 0.4),
            (Element::H, 5.0, 2.7, 0.9),
        ];
        for &(element, x, y, z) in &positions {
            mol.add_atom(Atom::new(element, Point3::new(x, y, z)));
        }
        for i in 0..5 {
            mol.add_bond(i, i + 1, BondOrder::Single).unwrap();
        }
        mol
    }

    fn field(kind: ForceFieldKind, strict: bool) -> ValenceForceField {
        ValenceForceField::new(Arc::new(ForceFieldParams::builtin()), kind, strict)
    }

    #[test]
    fn analytic_gradient_matches_numerical_gradient() {
        let mol = pentanol_like();
        let mut ff = field(ForceFieldKind::Full, true);
        ff.setup(&mol).unwrap();
        let coords = mol.positions();
        let (_, analytic) = ff.energy_and_gradient(&coords);
        let h = 1e-5;
        for atom in 0..coords.len() {
            for axis in 0..3 {
                let mut plus = coords.clone();
                let mut minus = coords.clone();
                plus[atom][axis] += h;
                minus[atom][axis] -= h;
                let numerical = (ff.energy(&plus) - ff.energy(&minus)) / (2.0 * h);
                let diff = (numerical - analytic[atom][axis]).abs();
                assert!(
                    diff < 1e-3 * (1.0 + numerical.abs()),
                    "atom {atom} axis {axis}: numerical {numerical} analytic {}",
                    analytic[atom][axis]
                );
            }
        }
    }

    #[test]
    fn dihedral_from_gradient_helper_matches_geometry() {
        let mol = pentanol_like();
        let c = mol.positions();
        let (phi, _) = dihedral_with_gradient(&c[0], &c[1], &c[2], &c[3]).unwrap();
        let expected = dihedral_degrees(&c[0], &c[1], &c[2], &c[3]);
        assert!((phi.to_degrees() - expected).abs() < 1e-9);
    }

    #[test]
    fn strict_setup_rejects_elements_without_parameters() {
        let mut mol = pentanol_like();
        mol.atom_mut(5).element = Element::Na;
        let mut strict = field(ForceFieldKind::Full, true);
        assert_eq!(
            strict.setup(&mol),
            Err(ForceFieldError::MissingParameters {
                element: Element::Na,
                atom: 5
            })
        );
        let mut lenient = field(ForceFieldKind::Full, false);
        assert!(lenient.setup(&mol).is_ok());
        assert!(lenient.energy(&mol.positions()).is_finite());
    }

    #[test]
    fn bonded_kind_has_no_van_der_waals_energy() {
        let mol = pentanol_like();
        let mut bonded = field(ForceFieldKind::Bonded, true);
        bonded.setup(&mol).unwrap();
        let components = bonded.components(&mol.positions());
        assert_eq!(components.van_der_waals, 0.0);
        assert!(components.bond_stretch > 0.0);
    }

    #[test]
    fn staggered_butane_is_lower_than_eclipsed() {
        let mut mol = Molecule::new("butane");
        for _ in 0..4 {
            mol.add_atom(Atom::new(Element::C, Point3::origin()));
        }
        for i in 0..3 {
            mol.add_bond(i, i + 1, BondOrder::Single).unwrap();
        }
        let mut ff = field(ForceFieldKind::Bonded, true);
        ff.setup(&mol).unwrap();
        let place = |phi_deg: f64| {
            let phi = phi_deg.to_radians();
            let (sin_t, cos_t) = 109.47_f64.to_radians().sin_cos();
            vec![
                Point3::new(1.52 * sin_t, 1.52 * cos_t, 0.0),
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(0.0, 1.52, 0.0),
                Point3::new(
                    1.52 * sin_t * phi.cos(),
                    1.52 - 1.52 * cos_t,
                    1.52 * sin_t * phi.sin(),
                ),
            ]
        };
        let anti = ff.energy(&place(180.0));
        let eclipsed = ff.energy(&place(0.0));
        assert!(anti < eclipsed);
    }

    #[test]
    fn empty_structure_cannot_be_set_up() {
        let mut ff = field(ForceFieldKind::Full, true);
        assert_eq!(
            ff.setup(&Molecule::new("empty")),
            Err(ForceFieldError::EmptyStructure)
        );
    }
}
