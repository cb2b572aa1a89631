use crate::core::chem::perception::{Hybridization, Perception};
use crate::core::models::element::Element;
use crate::core::models::molecule::Molecule;
use crate::core::models::topology::BondOrder;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern must contain exactly two atoms joined by '-'")]
    AtomCount,
    #[error("Unknown element '{0}'")]
    Element(String),
    #[error("Unknown hybridization '{0}' (expected 1, 2, 3 or ar)")]
    Hybridization(String),
    #[error("Unbalanced parentheses")]
    Parentheses,
}

/// A neighbor an atom must carry besides its bond partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSpec {
    pub element: Element,
    /// Required order of the bond to the neighbor; `None` accepts any order.
    pub order: Option<BondOrder>,
}

/// One end of a bond pattern: `El[.hyb][(nbr,...)]`, where `El` may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtomSpec {
    pub element: Option<Element>,
    pub hybridization: Option<Hybridization>,
    pub neighbors: Vec<NeighborSpec>,
}

impl AtomSpec {
    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if self.element.is_some() {
            score += 2;
        }
        if self.hybridization.is_some() {
            score += 1;
        }
        score + 2 * self.neighbors.len() as u32
    }

    /// Tests `atom` (bonded to `partner`) against this atom pattern.
    ///
    /// On success returns the neighbor that satisfied the first neighbor requirement,
    /// if there was one.
    pub fn matches(
        &self,
        mol: &Molecule,
        perception: &Perception,
        atom: usize,
        partner: usize,
    ) -> Option<Option<usize>> {
        if self.element.is_some_and(|e| mol.atom(atom).element != e) {
            return None;
        }
        if self
            .hybridization
            .is_some_and(|h| perception.hybridization(atom) != h)
        {
            return None;
        }
        let mut used: Vec<usize> = Vec::with_capacity(self.neighbors.len());
        for requirement in &self.neighbors {
            let found = mol.bonds_of(atom).iter().find(|&&(n, b)| {
                n != partner
                    && !used.contains(&n)
                    && mol.atom(n).element == requirement.element
                    && requirement.order.is_none_or(|o| mol.bond(b).order == o)
            })?;
            used.push(found.0);
        }
        Some(used.first().copied())
    }
}

impl FromStr for AtomSpec {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, neighbor_list) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..]
                    .strip_suffix(')')
                    .ok_or(PatternError::Parentheses)?;
                (&s[..open], Some(inner))
            }
            None if s.contains(')') => return Err(PatternError::Parentheses),
            None => (s, None),
        };

        let (element_str, hyb_str) = match head.split_once('.') {
            Some((e, h)) => (e, Some(h)),
            None => (head, None),
        };
        let element = match element_str {
            "*" => None,
            symbol => Some(
                symbol
                    .parse::<Element>()
                    .map_err(|_| PatternError::Element(symbol.to_string()))?,
            ),
        };
        let hybridization = hyb_str.map(parse_hybridization).transpose()?;

        let mut neighbors = Vec::new();
        if let Some(list) = neighbor_list {
            for item in list.split(',').map(str::trim).filter(|i| !i.is_empty()) {
                let (order, symbol) = match item.chars().next() {
                    Some('=') => (Some(BondOrder::Double), &item[1..]),
                    Some('#') => (Some(BondOrder::Triple), &item[1..]),
                    _ => (None, item),
                };
                let element = symbol
                    .parse::<Element>()
                    .map_err(|_| PatternError::Element(symbol.to_string()))?;
                neighbors.push(NeighborSpec { element, order });
            }
        }

        Ok(Self {
            element,
            hybridization,
            neighbors,
        })
    }
}

fn parse_hybridization(code: &str) -> Result<Hybridization, PatternError> {
    match code {
        "1" => Ok(Hybridization::Sp),
        "2" => Ok(Hybridization::Sp2),
        "3" => Ok(Hybridization::Sp3),
        "ar" => Ok(Hybridization::Aromatic),
        other => Err(PatternError::Hybridization(other.to_string())),
    }
}

/// A two-atom bond pattern such as `C.ar-C.2(=O)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondPattern {
    pub first: AtomSpec,
    pub second: AtomSpec,
}

/// A matched pattern: the bond's ends in pattern order and the constrained neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub first: usize,
    pub second: usize,
    pub first_reference: Option<usize>,
    pub second_reference: Option<usize>,
}

impl BondPattern {
    pub fn specificity(&self) -> u32 {
        self.first.specificity() + self.second.specificity()
    }

    /// Matches the bond in either direction, preferring the stored direction.
    pub fn matches(
        &self,
        mol: &Molecule,
        perception: &Perception,
        bond: usize,
    ) -> Option<PatternMatch> {
        let b = mol.bond(bond);
        [(b.atom1, b.atom2), (b.atom2, b.atom1)]
            .into_iter()
            .find_map(|(x, y)| {
                let first_reference = self.first.matches(mol, perception, x, y)?;
                let second_reference = self.second.matches(mol, perception, y, x)?;
                Some(PatternMatch {
                    first: x,
                    second: y,
                    first_reference,
                    second_reference,
                })
            })
    }
}

impl FromStr for BondPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut depth = 0i32;
        let mut split = None;
        for (i, c) in s.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                '-' if depth == 0 => {
                    if split.is_some() {
                        return Err(PatternError::AtomCount);
                    }
                    split = Some(i);
                }
                _ => {}
            }
            if depth < 0 {
                return Err(PatternError::Parentheses);
            }
        }
        if depth != 0 {
            return Err(PatternError::Parentheses);
        }
        let at = split.ok_or(PatternError::AtomCount)?;
        Ok(Self {
            first: s[..at].parse()?,
            second: s[at + 1..].parse()?,
        })
    }
}
