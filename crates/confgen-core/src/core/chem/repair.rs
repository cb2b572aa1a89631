use super::rings::RingInfo;
use crate::core::models::element::Element;
use crate::core::models::molecule::Molecule;

/// What a repair pass recomputed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub components: usize,
    pub ring_bonds: usize,
    /// Atoms whose implicit hydrogen count changed.
    pub hydrogens_adjusted: usize,
}

/// Implicit hydrogens an atom needs to reach its default valence, given its charge and
/// explicit bonds. `None` for elements without a default valence (metals).
pub fn expected_implicit_hydrogens(mol: &Molecule, atom: usize) -> Option<u8> {
    let a = mol.atom(atom);
    let valence = a.element.default_valence()? as i32;
    let charge = a.formal_charge as i32;
    let target = match a.element {
        Element::C | Element::Si => valence - charge.abs(),
        Element::B => valence - charge,
        _ => valence + charge,
    };
    let explicit: f64 = mol
        .bonds_of(atom)
        .iter()
        .map(|&(_, b)| mol.bond(b).order.valence_contribution())
        .sum();
    let missing = target - explicit.round() as i32;
    Some(missing.clamp(0, u8::MAX as i32) as u8)
}

/// Recomputes implicit hydrogens, connected components and ring bonds from the
/// current graph, recording the results as data fields on the molecule.
///
/// Used on molecules that failed generation before they are written out, so the
/// failure stream carries a consistent structure.
pub fn repair(mol: &mut Molecule) -> RepairSummary {
    let mut adjusted = 0;
    for atom in 0..mol.atom_count() {
        if mol.atom(atom).is_hydrogen() {
            continue;
        }
        if let Some(expected) = expected_implicit_hydrogens(mol, atom) {
            if mol.atom(atom).implicit_hydrogens != expected {
                mol.atom_mut(atom).implicit_hydrogens = expected;
                adjusted += 1;
            }
        }
    }

    let summary = RepairSummary {
        components: mol.components().len(),
        ring_bonds: RingInfo::perceive(mol).ring_bond_count(),
        hydrogens_adjusted: adjusted,
    };
    mol.properties
        .insert("confgen.components".into(), summary.components.to_string());
    mol.properties
        .insert("confgen.ring_bonds".into(), summary.ring_bonds.to_string());
    summary
}
