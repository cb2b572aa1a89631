//! # Chemistry Perception
//!
//! Graph algorithms that derive chemical facts from a [`Molecule`](crate::core::models::molecule::Molecule):
//!
//! - [`rings`] - ring bonds, ring systems and smallest ring sizes
//! - [`perception`] - hybridization and rotatable (link) bond classification
//! - [`stereo`] - stereocenter and invertible-nitrogen detection, chirality from coordinates
//! - [`canon`] - canonical atom ranking and the 64-bit fragment fingerprint
//! - [`symmetry`] - topological automorphisms under an enumeration budget
//! - [`repair`] - best-effort structure repair for molecules written to a failure stream
//!
//! Everything here is pure: inputs are borrowed, results are returned as new values.

pub mod canon;
pub mod perception;
pub mod repair;
pub mod rings;
pub mod stereo;
pub mod symmetry;
