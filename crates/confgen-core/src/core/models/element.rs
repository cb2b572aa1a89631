use phf::{Map, phf_map};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Chemical elements understood by the toolkit.
///
/// The set covers the organic subset plus the counter-ions and metals that commonly
/// appear in small-molecule collections. Elements outside this set are rejected at
/// read time rather than carried around as opaque symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    H,
    Li,
    B,
    C,
    N,
    O,
    F,
    Na,
    Mg,
    Si,
    P,
    S,
    Cl,
    K,
    Ca,
    Fe,
    Zn,
    Se,
    Br,
    I,
}

static SYMBOL_TABLE: Map<&'static str, Element> = phf_map! {
    "H" => Element::H,
    "D" => Element::H,
    "Li" => Element::Li,
    "B" => Element::B,
    "C" => Element::C,
    "N" => Element::N,
    "O" => Element::O,
    "F" => Element::F,
    "Na" => Element::Na,
    "Mg" => Element::Mg,
    "Si" => Element::Si,
    "P" => Element::P,
    "S" => Element::S,
    "Cl" => Element::Cl,
    "K" => Element::K,
    "Ca" => Element::Ca,
    "Fe" => Element::Fe,
    "Zn" => Element::Zn,
    "Se" => Element::Se,
    "Br" => Element::Br,
    "I" => Element::I,
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown element symbol '{0}'")]
pub struct ParseElementError(pub String);

impl Element {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::H => "H",
            Self::Li => "Li",
            Self::B => "B",
            Self::C => "C",
            Self::N => "N",
            Self::O => "O",
            Self::F => "F",
            Self::Na => "Na",
            Self::Mg => "Mg",
            Self::Si => "Si",
            Self::P => "P",
            Self::S => "S",
            Self::Cl => "Cl",
            Self::K => "K",
            Self::Ca => "Ca",
            Self::Fe => "Fe",
            Self::Zn => "Zn",
            Self::Se => "Se",
            Self::Br => "Br",
            Self::I => "I",
        }
    }

    pub fn atomic_number(self) -> u8 {
        match self {
            Self::H => 1,
            Self::Li => 3,
            Self::B => 5,
            Self::C => 6,
            Self::N => 7,
            Self::O => 8,
            Self::F => 9,
            Self::Na => 11,
            Self::Mg => 12,
            Self::Si => 14,
            Self::P => 15,
            Self::S => 16,
            Self::Cl => 17,
            Self::K => 19,
            Self::Ca => 20,
            Self::Fe => 26,
            Self::Zn => 30,
            Self::Se => 34,
            Self::Br => 35,
            Self::I => 53,
        }
    }

    /// Single-bond covalent radius in Angstroms.
    pub fn covalent_radius(self) -> f64 {
        match self {
            Self::H => 0.31,
            Self::Li => 1.28,
            Self::B => 0.84,
            Self::C => 0.76,
            Self::N => 0.71,
            Self::O => 0.66,
            Self::F => 0.57,
            Self::Na => 1.66,
            Self::Mg => 1.41,
            Self::Si => 1.11,
            Self::P => 1.07,
            Self::S => 1.05,
            Self::Cl => 1.02,
            Self::K => 2.03,
            Self::Ca => 1.76,
            Self::Fe => 1.32,
            Self::Zn => 1.22,
            Self::Se => 1.20,
            Self::Br => 1.20,
            Self::I => 1.39,
        }
    }

    /// Bondi van der Waals radius in Angstroms.
    pub fn vdw_radius(self) -> f64 {
        match self {
            Self::H => 1.20,
            Self::Li => 1.82,
            Self::B => 1.92,
            Self::C => 1.70,
            Self::N => 1.55,
            Self::O => 1.52,
            Self::F => 1.47,
            Self::Na => 2.27,
            Self::Mg => 1.73,
            Self::Si => 2.10,
            Self::P => 1.80,
            Self::S => 1.80,
            Self::Cl => 1.75,
            Self::K => 2.75,
            Self::Ca => 2.31,
            Self::Fe => 2.00,
            Self::Zn => 1.39,
            Self::Se => 1.90,
            Self::Br => 1.85,
            Self::I => 1.98,
        }
    }

    /// Default neutral valence, or `None` for elements without a meaningful one (metals).
    pub fn default_valence(self) -> Option<u8> {
        match self {
            Self::H | Self::F | Self::Cl | Self::Br | Self::I => Some(1),
            Self::O | Self::S | Self::Se => Some(2),
            Self::B | Self::N | Self::P => Some(3),
            Self::C | Self::Si => Some(4),
            _ => None,
        }
    }

    pub fn is_hydrogen(self) -> bool {
        self == Self::H
    }
}

impl FromStr for Element {
    type Err = ParseElementError;

    /// Parses an element symbol, accepting any capitalization (`"cl"`, `"CL"`, `"Cl"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let normalized: String = match chars.next() {
            Some(first) => first
                .to_uppercase()
                .chain(chars.flat_map(|c| c.to_lowercase()))
                .collect(),
            None => return Err(ParseElementError(s.to_string())),
        };
        SYMBOL_TABLE
            .get(normalized.as_str())
            .copied()
            .ok_or_else(|| ParseElementError(s.to_string()))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_accepts_any_capitalization() {
        assert_eq!("C".parse::<Element>(), Ok(Element::C));
        assert_eq!("cl".parse::<Element>(), Ok(Element::Cl));
        assert_eq!("BR".parse::<Element>(), Ok(Element::Br));
        assert_eq!(" n ".parse::<Element>(), Ok(Element::N));
    }

    #[test]
    fn deuterium_is_read_as_hydrogen() {
        assert_eq!("D".parse::<Element>(), Ok(Element::H));
    }

    #[test]
    fn from_str_rejects_unknown_symbols() {
        assert!("Xx".parse::<Element>().is_err());
        assert!("".parse::<Element>().is_err());
    }

    #[test]
    fn symbol_round_trips_through_parser() {
        for element in [Element::H, Element::C, Element::Si, Element::Se, Element::I] {
            assert_eq!(element.symbol().parse::<Element>(), Ok(element));
        }
    }

    #[test]
    fn metals_have_no_default_valence() {
        assert_eq!(Element::C.default_valence(), Some(4));
        assert_eq!(Element::Na.default_valence(), None);
        assert_eq!(Element::Zn.default_valence(), None);
    }
}
