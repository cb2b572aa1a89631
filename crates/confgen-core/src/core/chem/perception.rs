use super::rings::RingInfo;
use crate::core::models::element::Element;
use crate::core::models::molecule::Molecule;
use crate::core::models::topology::BondOrder;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hybridization {
    Sp,
    Sp2,
    Sp3,
    Aromatic,
}

impl Hybridization {
    /// Whether the atom is part of a planar pi system.
    pub fn is_planar(self) -> bool {
        matches!(self, Self::Sp2 | Self::Aromatic)
    }

    /// Ideal bond angle around an atom of this hybridization, in degrees.
    pub fn ideal_angle(self) -> f64 {
        match self {
            Self::Sp => 180.0,
            Self::Sp2 | Self::Aromatic => 120.0,
            Self::Sp3 => 109.47,
        }
    }

    /// Short code used by torsion rule patterns.
    pub fn code(self) -> &'static str {
        match self {
            Self::Sp => "1",
            Self::Sp2 => "2",
            Self::Sp3 => "3",
            Self::Aromatic => "ar",
        }
    }
}

impl fmt::Display for Hybridization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Derived per-atom and per-bond facts shared by every generation stage.
#[derive(Debug, Clone)]
pub struct Perception {
    pub rings: RingInfo,
    hybridization: Vec<Hybridization>,
    rotatable: Vec<bool>,
}

impl Perception {
    pub fn new(mol: &Molecule) -> Self {
        let rings = RingInfo::perceive(mol);
        let hybridization = assign_hybridization(mol);
        let rotatable = (0..mol.bond_count())
            .map(|b| is_link_bond(mol, &rings, &hybridization, b))
            .collect();
        Self {
            rings,
            hybridization,
            rotatable,
        }
    }

    pub fn hybridization(&self, atom: usize) -> Hybridization {
        self.hybridization[atom]
    }

    /// Whether the bond is a rotatable link bond: single, acyclic, between two atoms
    /// that each carry another heavy neighbor, with no linear end.
    pub fn is_rotatable(&self, bond: usize) -> bool {
        self.rotatable[bond]
    }

    pub fn rotatable_bonds(&self) -> Vec<usize> {
        (0..self.rotatable.len())
            .filter(|&b| self.rotatable[b])
            .collect()
    }

    /// Single, non-aromatic bonds inside rings of at least `macrocycle_size` atoms
    /// whose ends are not linear; these are the rotors a ring conformation search
    /// has to explore.
    pub fn ring_rotor_count(&self, mol: &Molecule, macrocycle_size: usize) -> usize {
        mol.bonds()
            .iter()
            .enumerate()
            .filter(|(b, bond)| {
                bond.order == BondOrder::Single
                    && self
                        .rings
                        .smallest_ring_size(*b)
                        .is_some_and(|size| size >= macrocycle_size)
                    && self.hybridization[bond.atom1] != Hybridization::Sp
                    && self.hybridization[bond.atom2] != Hybridization::Sp
            })
            .count()
    }
}

fn assign_hybridization(mol: &Molecule) -> Vec<Hybridization> {
    let mut result: Vec<Hybridization> = (0..mol.atom_count())
        .map(|atom| {
            if mol.atom(atom).aromatic {
                return Hybridization::Aromatic;
            }
            let mut doubles = 0;
            let mut triples = 0;
            let mut aromatic_bonds = 0;
            for &(_, b) in mol.bonds_of(atom) {
                match mol.bond(b).order {
                    BondOrder::Double => doubles += 1,
                    BondOrder::Triple => triples += 1,
                    BondOrder::Aromatic => aromatic_bonds += 1,
                    BondOrder::Single => {}
                }
            }
            if aromatic_bonds > 0 {
                Hybridization::Aromatic
            } else if triples > 0 || (doubles >= 2 && mol.degree(atom) <= 2) {
                Hybridization::Sp
            } else if doubles > 0 {
                Hybridization::Sp2
            } else {
                Hybridization::Sp3
            }
        })
        .collect();

    // Lone-pair donors next to a pi system are planar (amides, anilines, enamines).
    let conjugated: Vec<usize> = (0..mol.atom_count())
        .filter(|&atom| {
            let a = mol.atom(atom);
            a.element == Element::N
                && a.formal_charge == 0
                && result[atom] == Hybridization::Sp3
                && mol.degree(atom) + a.implicit_hydrogens as usize <= 3
                && mol
                    .neighbors(atom)
                    .any(|n| result[n].is_planar() && !mol.atom(n).is_hydrogen())
        })
        .collect();
    for atom in conjugated {
        result[atom] = Hybridization::Sp2;
    }
    result
}

fn is_link_bond(
    mol: &Molecule,
    rings: &RingInfo,
    hybridization: &[Hybridization],
    bond: usize,
) -> bool {
    let b = mol.bond(bond);
    b.order == BondOrder::Single
        && !rings.is_ring_bond(bond)
        && mol.heavy_degree(b.atom1) >= 2
        && mol.heavy_degree(b.atom2) >= 2
        && hybridization[b.atom1] != Hybridization::Sp
        && hybridization[b.atom2] != Hybridization::Sp
}
