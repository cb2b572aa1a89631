//! # Core Module
//!
//! Stateless building blocks for conformer generation.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, bonds, molecules, fragments and conformers
//! - **Chemistry Perception** ([`chem`]) - Rings, hybridization, stereocenters, canonical keys, symmetry
//! - **Energy Evaluation** ([`forcefield`]) - The force-field oracle, a built-in valence force field
//!   and a gradient minimizer
//! - **Torsion Knowledge** ([`torsions`]) - Rule libraries of preferred dihedral angles
//! - **Fragment Library** ([`library`]) - The shared, persistent fragment conformer cache
//! - **File I/O** ([`io`]) - SDF reading and writing behind reader/writer traits
//! - **Utilities** ([`utils`]) - Geometry helpers shared by every layer

pub mod chem;
pub mod forcefield;
pub mod io;
pub mod library;
pub mod models;
pub mod torsions;
pub mod utils;
