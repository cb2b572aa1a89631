//! # Force Field
//!
//! The energy oracle used to refine and rank conformers.
//!
//! Generators only depend on the [`ForceField`](oracle::ForceField) trait: `setup` on a
//! molecule, then `energy` and `gradient` on coordinate arrays. Anything that can answer
//! those three questions can drive sampling and refinement. The crate ships one
//! implementation, [`ValenceForceField`](valence::ValenceForceField), a compact valence
//! model (bond stretch, angle bend, torsion, Lennard-Jones) parameterized per element.
//!
//! - [`oracle`] - the trait boundary, factories and error type
//! - [`params`] - per-element parameter table with TOML overrides
//! - [`potentials`] - scalar potential functions and their derivatives
//! - [`valence`] - the built-in force field
//! - [`minimizer`] - conjugate-gradient minimization of any [`Objective`](oracle::Objective)

pub mod minimizer;
pub mod oracle;
pub mod params;
pub mod potentials;
pub mod valence;
