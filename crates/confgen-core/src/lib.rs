//! # confgen Core Library
//!
//! A fragment-based generator of plausible low-energy 3D conformers for small molecules.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Molecule`, `Fragment`, `Conformer`),
//!   chemistry perception (rings, stereo, canonical ranking), the force-field oracle and its
//!   built-in implementation, torsion rules, the persistent fragment library, and file I/O.
//!
//! - **[`engine`]: The Logic Core.** Per-molecule machinery: settings, run control,
//!   trial sampling, the fragment conformer generator, distance geometry, the fragment
//!   assembler and the orchestrating `ConformerGenerator`.
//!
//! - **[`workflows`]: The Public API.** The batch driver that feeds molecules from a source
//!   through a pool of workers, each owning its own generator, into an output sink.

pub mod core;
pub mod engine;
pub mod workflows;
