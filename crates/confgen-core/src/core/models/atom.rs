use super::element::Element;
use nalgebra::Point3;
use std::str::FromStr;

/// Tetrahedral configuration tag of an atom.
///
/// The tag is defined relative to the atom's neighbors taken in ascending index order:
/// viewing the center with the highest-indexed neighbor (or an implicit hydrogen, or the
/// lone pair of a tricoordinate nitrogen) pointing away from the viewer, the remaining
/// neighbors appear either clockwise or counterclockwise. This matches the MDL atom
/// parity convention (1 = clockwise, 2 = counterclockwise).
///
/// Because the tag depends on index order, any operation that renumbers atoms must
/// re-derive it (see [`Chirality::permuted`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Chirality {
    /// No configuration is recorded; the center is free to be enumerated.
    #[default]
    Unspecified,
    /// Remaining neighbors appear clockwise.
    Clockwise,
    /// Remaining neighbors appear counterclockwise.
    CounterClockwise,
}

impl Chirality {
    /// Derives the tag from the signed volume spanned by the first three neighbors
    /// (in ascending index order) around the center.
    ///
    /// A volume whose magnitude is below `1e-3` is treated as planar and yields
    /// [`Chirality::Unspecified`].
    pub fn from_signed_volume(volume: f64) -> Self {
        if volume > 1e-3 {
            Self::CounterClockwise
        } else if volume < -1e-3 {
            Self::Clockwise
        } else {
            Self::Unspecified
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            Self::Clockwise => Self::CounterClockwise,
            Self::CounterClockwise => Self::Clockwise,
            Self::Unspecified => Self::Unspecified,
        }
    }

    /// Returns the tag after the neighbor order has been permuted with the given parity.
    pub fn permuted(self, odd_permutation: bool) -> Self {
        if odd_permutation {
            self.inverted()
        } else {
            self
        }
    }

    pub fn is_specified(self) -> bool {
        self != Self::Unspecified
    }

    /// Converts from the MDL atom parity field.
    pub fn from_mdl_parity(parity: u8) -> Self {
        match parity {
            1 => Self::Clockwise,
            2 => Self::CounterClockwise,
            _ => Self::Unspecified,
        }
    }

    pub fn to_mdl_parity(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Clockwise => 1,
            Self::CounterClockwise => 2,
        }
    }
}

impl FromStr for Chirality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cw" | "clockwise" => Ok(Self::Clockwise),
            "ccw" | "counterclockwise" | "counter-clockwise" => Ok(Self::CounterClockwise),
            "" | "none" | "unspecified" => Ok(Self::Unspecified),
            _ => Err(()),
        }
    }
}

/// Represents an atom of a small molecule.
///
/// Coordinates live on the atom so that a freshly read molecule carries its input
/// geometry; generated conformers are stored separately as [`super::conformer::Conformer`]
/// values and never written back into the atoms implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    /// The chemical element.
    pub element: Element,
    /// Formal charge in elementary charge units.
    pub formal_charge: i8,
    /// Number of hydrogens attached to this atom that are not present as explicit atoms.
    pub implicit_hydrogens: u8,
    /// Whether the atom belongs to an aromatic system.
    pub aromatic: bool,
    /// Tetrahedral configuration tag.
    pub chirality: Chirality,
    /// The 3D coordinates of the atom in Angstroms.
    pub position: Point3<f64>,
}

impl Atom {
    /// Creates a neutral, non-aromatic atom with no recorded configuration.
    pub fn new(element: Element, position: Point3<f64>) -> Self {
        Self {
            element,
            formal_charge: 0,
            implicit_hydrogens: 0,
            aromatic: false,
            chirality: Chirality::Unspecified,
            position,
        }
    }

    pub fn is_hydrogen(&self) -> bool {
        self.element.is_hydrogen()
    }
}
