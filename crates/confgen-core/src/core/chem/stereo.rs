use super::canon::atom_classes;
use super::perception::{Hybridization, Perception};
use crate::core::models::atom::Chirality;
use crate::core::models::element::Element;
use crate::core::models::molecule::Molecule;
use nalgebra::Point3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StereoKind {
    /// Four distinct substituents (an implicit hydrogen counts as one).
    Tetrahedral,
    /// A pyramidal amine nitrogen whose three substituents are distinct; its lone
    /// pair acts as the fourth.
    InvertibleNitrogen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StereoCenter {
    pub atom: usize,
    pub kind: StereoKind,
}

/// Outcome of comparing realized chirality with the tags of a molecule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChiralityCheck {
    /// Every tagged center matches.
    Consistent,
    /// Every tagged center is inverted; the mirror image would match.
    Inverted,
    /// Some centers match and others do not, or a center is flat.
    Mixed,
}

/// Finds all atoms whose configuration distinguishes stereoisomers.
pub fn find_stereo_centers(mol: &Molecule, perception: &Perception) -> Vec<StereoCenter> {
    let classes = atom_classes(mol);
    let distinct_neighbors = |atom: usize| {
        let mut seen: Vec<u32> = mol.neighbors(atom).map(|n| classes[n]).collect();
        let count = seen.len();
        seen.sort_unstable();
        seen.dedup();
        seen.len() == count
    };

    (0..mol.atom_count())
        .filter_map(|atom| {
            let a = mol.atom(atom);
            if perception.hybridization(atom) != Hybridization::Sp3 {
                return None;
            }
            let substituents = mol.degree(atom) + a.implicit_hydrogens as usize;
            let tetrahedral_element = matches!(a.element, Element::C | Element::Si | Element::P)
                || (a.element == Element::N && a.formal_charge == 1);
            if tetrahedral_element
                && substituents == 4
                && mol.hydrogen_count(atom) <= 1
                && distinct_neighbors(atom)
            {
                return Some(StereoCenter {
                    atom,
                    kind: StereoKind::Tetrahedral,
                });
            }
            let invertible = a.element == Element::N
                && a.formal_charge == 0
                && mol.degree(atom) == 3
                && a.implicit_hydrogens == 0
                && mol.hydrogen_count(atom) == 0
                && mol
                    .neighbors(atom)
                    .all(|n| !perception.hybridization(n).is_planar())
                && distinct_neighbors(atom);
            invertible.then_some(StereoCenter {
                atom,
                kind: StereoKind::InvertibleNitrogen,
            })
        })
        .collect()
}

/// Centers from `centers` whose tag is not yet specified.
pub fn unspecified_centers(mol: &Molecule, centers: &[StereoCenter]) -> Vec<StereoCenter> {
    centers
        .iter()
        .copied()
        .filter(|c| !mol.atom(c.atom).chirality.is_specified())
        .collect()
}

/// Tags unspecified centers from the molecule's own coordinates. Returns how many
/// tags were assigned; molecules without 3D coordinates are left alone.
pub fn assign_from_coordinates(mol: &mut Molecule, centers: &[StereoCenter]) -> usize {
    if !mol.has_3d_coordinates() {
        return 0;
    }
    let coords = mol.positions();
    let mut assigned = 0;
    for center in centers {
        if mol.atom(center.atom).chirality.is_specified() {
            continue;
        }
        let tag = mol.chirality_in(&coords, center.atom);
        if tag.is_specified() {
            mol.atom_mut(center.atom).chirality = tag;
            assigned += 1;
        }
    }
    assigned
}

/// Compares the configuration realized by `coords` at each tagged atom of `atoms`.
pub fn check_chirality(mol: &Molecule, coords: &[Point3<f64>], atoms: &[usize]) -> ChiralityCheck {
    let mut matched = 0usize;
    let mut inverted = 0usize;
    let mut flat = 0usize;
    for &atom in atoms {
        let tag = mol.atom(atom).chirality;
        if !tag.is_specified() {
            continue;
        }
        match mol.chirality_in(coords, atom) {
            Chirality::Unspecified => flat += 1,
            realized if realized == tag => matched += 1,
            _ => inverted += 1,
        }
    }
    if flat > 0 || (matched > 0 && inverted > 0) {
        ChiralityCheck::Mixed
    } else if inverted > 0 {
        ChiralityCheck::Inverted
    } else {
        ChiralityCheck::Consistent
    }
}

/// All tagged atoms of a molecule.
pub fn tagged_atoms(mol: &Molecule) -> Vec<usize> {
    (0..mol.atom_count())
        .filter(|&i| mol.atom(i).chirality.is_specified())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::atom::Atom;
    use crate::core::models::topology::BondOrder;

    fn at(mol: &mut Molecule, element: Element, x: f64, y: f64, z: f64) -> usize {
        mol.add_atom(Atom::new(element, Point3::new(x, y, z)))
    }

    /// CHFCl-CH3 with tetrahedral geometry around the first carbon.
    fn chiral() -> Molecule {
        let mut mol = Molecule::new("chiral");
        let c = at(&mut mol, Element::C, 0.0, 0.0, 0.0);
        let f = at(&mut mol, Element::F, 1.0, 1.0, 1.0);
        let cl = at(&mut mol, Element::Cl, -1.0, -1.0, 1.0);
        let me = at(&mut mol, Element::C, 1.0, -1.0, -1.0);
        for n in [f, cl, me] {
            mol.add_bond(c, n, BondOrder::Single).unwrap();
        }
        mol.atom_mut(c).implicit_hydrogens = 1;
        mol.atom_mut(me).implicit_hydrogens = 3;
        mol
    }

    #[test]
    fn finds_tetrahedral_center_with_implicit_hydrogen() {
        let mol = chiral();
        let centers = find_stereo_centers(&mol, &Perception::new(&mol));
        assert_eq!(
            centers,
            vec![StereoCenter {
                atom: 0,
                kind: StereoKind::Tetrahedral
            }]
        );
    }

    #[test]
    fn two_equal_substituents_are_not_a_center() {
        let mut mol = chiral();
        mol.atom_mut(2).element = Element::F;
        let centers = find_stereo_centers(&mol, &Perception::new(&mol));
        assert!(centers.is_empty());
    }

    #[test]
    fn tertiary_amine_with_distinct_groups_is_invertible() {
        let mut mol = Molecule::new("amine");
        let n = at(&mut mol, Element::N, 0.0, 0.0, 0.0);
        let methyl = at(&mut mol, Element::C, 1.0, 0.0, 0.0);
        let ethyl = at(&mut mol, Element::C, 0.0, 1.0, 0.0);
        let ethyl2 = at(&mut mol, Element::C, 0.0, 2.0, 0.0);
        let propyl = at(&mut mol, Element::C, 0.0, 0.0, 1.0);
        let propyl2 = at(&mut mol, Element::C, 0.0, 0.0, 2.0);
        let propyl3 = at(&mut mol, Element::C, 0.0, 0.0, 3.0);
        mol.add_bond(n, methyl, BondOrder::Single).unwrap();
        mol.add_bond(n, ethyl, BondOrder::Single).unwrap();
        mol.add_bond(ethyl, ethyl2, BondOrder::Single).unwrap();
        mol.add_bond(n, propyl, BondOrder::Single).unwrap();
        mol.add_bond(propyl, propyl2, BondOrder::Single).unwrap();
        mol.add_bond(propyl2, propyl3, BondOrder::Single).unwrap();
        let centers = find_stereo_centers(&mol, &Perception::new(&mol));
        assert_eq!(
            centers,
            vec![StereoCenter {
                atom: n,
                kind: StereoKind::InvertibleNitrogen
            }]
        );
    }

    #[test]
    fn assign_from_coordinates_tags_only_unspecified_centers() {
        let mut mol = chiral();
        let centers = find_stereo_centers(&mol, &Perception::new(&mol));
        assert_eq!(unspecified_centers(&mol, &centers).len(), 1);
        assert_eq!(assign_from_coordinates(&mut mol, &centers), 1);
        assert!(mol.atom(0).chirality.is_specified());
        assert!(unspecified_centers(&mol, &centers).is_empty());
        assert_eq!(assign_from_coordinates(&mut mol, &centers), 0);
    }

    #[test]
    fn check_chirality_detects_mirror_images() {
        let mut mol = chiral();
        let centers = find_stereo_centers(&mol, &Perception::new(&mol));
        assign_from_coordinates(&mut mol, &centers);
        let coords = mol.positions();
        let tagged = tagged_atoms(&mol);
        assert_eq!(check_chirality(&mol, &coords, &tagged), ChiralityCheck::Consistent);

        let mirror: Vec<_> = coords.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();
        assert_eq!(check_chirality(&mol, &mirror, &tagged), ChiralityCheck::Inverted);

        let flat: Vec<_> = coords.iter().map(|p| Point3::new(p.x, p.y, 0.0)).collect();
        assert_eq!(check_chirality(&mol, &flat, &tagged), ChiralityCheck::Mixed);
    }
}
