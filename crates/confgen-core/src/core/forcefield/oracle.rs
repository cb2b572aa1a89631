use crate::core::models::element::Element;
use crate::core::models::molecule::Molecule;
use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ForceFieldError {
    #[error("No force-field parameters for element {element} (atom {atom})")]
    MissingParameters { element: Element, atom: usize },
    #[error("Cannot set up a force field for an empty structure")]
    EmptyStructure,
    #[error("Minimization failed: {0}")]
    MinimizationFailed(String),
}

/// Which energy terms a force field evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForceFieldKind {
    /// Bonded terms plus Lennard-Jones between atoms three or more bonds apart.
    #[default]
    Full,
    /// Bond, angle and torsion terms only.
    Bonded,
}

impl FromStr for ForceFieldKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "bonded" => Ok(Self::Bonded),
            other => Err(format!("unknown force field '{other}' (expected full or bonded)")),
        }
    }
}

impl fmt::Display for ForceFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Bonded => "bonded",
        })
    }
}

/// A differentiable scalar function of a coordinate array.
pub trait Objective {
    fn energy(&self, coords: &[Point3<f64>]) -> f64;

    fn gradient(&self, coords: &[Point3<f64>]) -> Vec<Vector3<f64>>;

    fn energy_and_gradient(&self, coords: &[Point3<f64>]) -> (f64, Vec<Vector3<f64>>) {
        (self.energy(coords), self.gradient(coords))
    }
}

/// The force-field oracle consumed by every generator.
///
/// `setup` binds the force field to one molecular graph; `energy` and `gradient`
/// then accept coordinates index-aligned with that molecule's atoms.
pub trait ForceField: Objective + Send {
    fn setup(&mut self, molecule: &Molecule) -> Result<(), ForceFieldError>;
}

/// Creates fresh, unbound force fields; shared across workers.
pub trait ForceFieldFactory: Send + Sync {
    fn create(&self) -> Box<dyn ForceField>;
}
