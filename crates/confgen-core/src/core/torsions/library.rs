use super::pattern::{BondPattern, PatternError, PatternMatch};
use crate::core::chem::perception::Perception;
use crate::core::models::molecule::Molecule;
use serde::Deserialize;
use std::cmp::Reverse;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

const BUILTIN_RULES: &str = include_str!("builtin.toml");

/// Step of the fallback grid used when no rule matches a bond.
pub const DEFAULT_GRID_STEP: f64 = 30.0;
/// Tolerance attached to fallback grid angles.
pub const DEFAULT_TOLERANCE: f64 = 15.0;

/// How specific a rule category is; specific rules always win over generic ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    Generic,
    Specific,
}

/// Whether a user library extends or replaces the libraries loaded before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Composition {
    #[default]
    Additional,
    Replacement,
}

impl FromStr for Composition {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "additional" | "add" => Ok(Self::Additional),
            "replacement" | "replace" => Ok(Self::Replacement),
            other => Err(format!(
                "unknown library composition '{other}' (expected additional or replacement)"
            )),
        }
    }
}

/// Errors raised while loading a torsion rule library.
#[derive(Debug, Error)]
pub enum TorsionLoadError {
    /// The library file could not be read.
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    /// The library file is not valid TOML or does not match the library schema.
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    /// A rule's pattern could not be parsed.
    #[error("Invalid pattern '{pattern}' in '{path}': {source}")]
    Pattern {
        path: String,
        pattern: String,
        source: PatternError,
    },
    /// A rule lists no angles.
    #[error("Rule '{pattern}' in '{path}' has no angles")]
    NoAngles { path: String, pattern: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLibrary {
    name: String,
    #[serde(default)]
    categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCategory {
    name: String,
    level: RuleLevel,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    pattern: String,
    angles: Vec<f64>,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

/// A single torsion rule, immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct TorsionRule {
    /// Name of the category the rule was declared in.
    pub category: String,
    pub level: RuleLevel,
    /// The pattern as written in the library.
    pub source: String,
    pub pattern: BondPattern,
    /// Preferred dihedral angles in degrees, normalized to `[0, 360)`.
    pub angles: Vec<f64>,
    /// Half-width of the preferred range around each angle, in degrees.
    pub tolerance: f64,
}

/// One loaded library: a name and its rules in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct TorsionRuleSet {
    pub name: String,
    pub rules: Vec<TorsionRule>,
}

impl TorsionRuleSet {
    /// Parses a library from TOML text.
    ///
    /// # Arguments
    ///
    /// * `content` - The TOML document.
    /// * `origin` - A label for error messages, usually the file path.
    ///
    /// # Errors
    ///
    /// Returns `TorsionLoadError::Toml` for schema violations,
    /// `TorsionLoadError::Pattern` for unparsable patterns and
    /// `TorsionLoadError::NoAngles` for rules without angles.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, TorsionLoadError> {
        let raw: RawLibrary = toml::from_str(content).map_err(|e| TorsionLoadError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        let mut rules = Vec::new();
        for category in raw.categories {
            for rule in category.rules {
                let pattern =
                    rule.pattern
                        .parse::<BondPattern>()
                        .map_err(|e| TorsionLoadError::Pattern {
                            path: origin.to_string(),
                            pattern: rule.pattern.clone(),
                            source: e,
                        })?;
                if rule.angles.is_empty() {
                    return Err(TorsionLoadError::NoAngles {
                        path: origin.to_string(),
                        pattern: rule.pattern,
                    });
                }
                rules.push(TorsionRule {
                    category: category.name.clone(),
                    level: category.level,
                    source: rule.pattern,
                    pattern,
                    angles: rule.angles.into_iter().map(normalize_angle).collect(),
                    tolerance: rule.tolerance.abs(),
                });
            }
        }
        Ok(Self {
            name: raw.name,
            rules,
        })
    }

    /// Loads a library from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `TorsionLoadError::Io` if the file cannot be read, otherwise the errors
    /// of [`TorsionRuleSet::from_toml_str`].
    pub fn load(path: &Path) -> Result<Self, TorsionLoadError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| TorsionLoadError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path_str)
    }

    /// The compiled-in rule set.
    pub fn builtin() -> Result<Self, TorsionLoadError> {
        Self::from_toml_str(BUILTIN_RULES, "<builtin>")
    }
}

/// The rule a bond matched, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOrigin {
    pub library: String,
    pub category: String,
    pub pattern: String,
}

/// Angles to try for one rotatable bond, as dihedrals over `atoms`.
#[derive(Debug, Clone, PartialEq)]
pub struct TorsionMatch {
    /// `[a, b, c, d]` where `b-c` is the bond and `a`, `d` are the reference neighbors.
    pub atoms: [usize; 4],
    pub angles: Vec<f64>,
    pub tolerance: f64,
    /// `None` when the fallback grid was used.
    pub rule: Option<RuleOrigin>,
}

impl TorsionMatch {
    pub fn is_fallback(&self) -> bool {
        self.rule.is_none()
    }

    /// The rule's angles, plus both tolerance boundaries of each when
    /// `sample_tolerance` is set; normalized to `[0, 360)` without duplicates.
    pub fn candidate_angles(&self, sample_tolerance: bool) -> Vec<f64> {
        let mut result: Vec<f64> = Vec::with_capacity(self.angles.len() * 3);
        let mut push = |angle: f64| {
            let angle = normalize_angle(angle);
            if !result.iter().any(|&a| (a - angle).abs() < 1e-6) {
                result.push(angle);
            }
        };
        for &angle in &self.angles {
            push(angle);
            if sample_tolerance && self.tolerance > 0.0 {
                push(angle - self.tolerance);
                push(angle + self.tolerance);
            }
        }
        result
    }
}

/// The composed set of torsion libraries consulted by the assembler.
///
/// Libraries are kept in registration order; later libraries outrank earlier ones when
/// two rules are otherwise equally good.
#[derive(Debug, Clone, Default)]
pub struct TorsionLibrary {
    sets: Vec<Arc<TorsionRuleSet>>,
}

impl TorsionLibrary {
    /// A library holding only the compiled-in rules.
    pub fn builtin() -> Result<Self, TorsionLoadError> {
        let mut library = Self::default();
        library.add(TorsionRuleSet::builtin()?, Composition::Additional);
        Ok(library)
    }

    /// Registers a rule set. `Replacement` drops every previously registered set.
    pub fn add(&mut self, set: TorsionRuleSet, composition: Composition) {
        if composition == Composition::Replacement {
            self.sets.clear();
        }
        self.sets.push(Arc::new(set));
    }

    pub fn library_names(&self) -> Vec<&str> {
        self.sets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.sets.iter().map(|s| s.rules.len()).sum()
    }

    /// The best rule for a bond, if any rule matches.
    ///
    /// Ranking: level, then pattern specificity, then the later library, then the
    /// earlier rule within a library.
    pub fn find_rule(
        &self,
        mol: &Molecule,
        perception: &Perception,
        bond: usize,
    ) -> Option<(&TorsionRuleSet, &TorsionRule, PatternMatch)> {
        self.sets
            .iter()
            .enumerate()
            .flat_map(|(set_index, set)| {
                set.rules
                    .iter()
                    .enumerate()
                    .map(move |(rule_index, rule)| (set_index, set, rule_index, rule))
            })
            .filter_map(|(set_index, set, rule_index, rule)| {
                let matched = rule.pattern.matches(mol, perception, bond)?;
                let rank = (
                    rule.level,
                    rule.pattern.specificity(),
                    set_index,
                    Reverse(rule_index),
                );
                Some((rank, set.as_ref(), rule, matched))
            })
            .max_by_key(|(rank, ..)| *rank)
            .map(|(_, set, rule, matched)| (set, rule, matched))
    }

    /// Torsion angles for a bond: the best rule's, or the fallback 30° grid.
    ///
    /// Returns `None` only when an end of the bond has no other neighbor, so no
    /// dihedral can be defined.
    pub fn match_bond(
        &self,
        mol: &Molecule,
        perception: &Perception,
        bond: usize,
    ) -> Option<TorsionMatch> {
        if let Some((set, rule, matched)) = self.find_rule(mol, perception, bond) {
            let a = reference_neighbor(mol, matched.first, matched.second, matched.first_reference)?;
            let d = reference_neighbor(mol, matched.second, matched.first, matched.second_reference)?;
            return Some(TorsionMatch {
                atoms: [a, matched.first, matched.second, d],
                angles: rule.angles.clone(),
                tolerance: rule.tolerance,
                rule: Some(RuleOrigin {
                    library: set.name.clone(),
                    category: rule.category.clone(),
                    pattern: rule.source.clone(),
                }),
            });
        }

        let b = mol.bond(bond);
        let a = reference_neighbor(mol, b.atom1, b.atom2, None)?;
        let d = reference_neighbor(mol, b.atom2, b.atom1, None)?;
        let steps = (360.0 / DEFAULT_GRID_STEP).round() as usize;
        Some(TorsionMatch {
            atoms: [a, b.atom1, b.atom2, d],
            angles: (0..steps).map(|i| i as f64 * DEFAULT_GRID_STEP).collect(),
            tolerance: DEFAULT_TOLERANCE,
            rule: None,
        })
    }
}

/// The neighbor of `atom` (other than `partner`) that anchors a dihedral: the
/// constrained neighbor if the rule named one, else the heaviest heavy neighbor
/// (lowest index on ties), else the lowest-index neighbor.
pub fn reference_neighbor(
    mol: &Molecule,
    atom: usize,
    partner: usize,
    constrained: Option<usize>,
) -> Option<usize> {
    if constrained.is_some() {
        return constrained;
    }
    let candidates: Vec<usize> = mol.sorted_neighbors(atom).into_iter().filter(|&n| n != partner).collect();
    candidates
        .iter()
        .copied()
        .filter(|&n| !mol.atom(n).is_hydrogen())
        .max_by_key(|&n| (mol.atom(n).element.atomic_number(), Reverse(n)))
        .or_else(|| candidates.first().copied())
}

fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    if (a - 360.0).abs() < 1e-9 { 0.0 } else { a }
}
