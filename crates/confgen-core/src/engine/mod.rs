//! # Engine Module
//!
//! Stateful, per-molecule conformer generation.
//!
//! ## Overview
//!
//! A [`generator::ConformerGenerator`] takes one molecule through perception, a
//! sampling strategy, force-field refinement and pooling. Two strategies exist:
//! systematic fragment assembly, which reuses cached fragment conformers and joins
//! them under torsion rules, and stochastic distance-geometry embedding of the whole
//! molecule, used for macrocycles and highly flexible molecules.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Generator settings grouped by stage, with a validating builder
//! - **Error Handling** ([`error`]) - Engine errors and the closed set of result codes
//! - **Run Control** ([`control`]) - Shared abort flags, abort callbacks and per-molecule deadlines
//! - **Progress Monitoring** ([`progress`]) - Progress events for front ends
//! - **Shared Resources** ([`registry`]) - Fragment library, torsion library and force-field factory
//! - **Sampling** ([`sampler`], [`dg`], [`fragment_gen`]) - Trial loops, distance-geometry
//!   embedding and per-fragment conformer generation
//! - **Assembly** ([`tree`], [`assembler`], [`cache`]) - Fragment trees, reassembly and the
//!   per-molecule fragment cache
//! - **Pooling** ([`pool`]) - Energy window and symmetry-aware RMSD deduplication
//! - **Orchestration** ([`generator`]) - Mode selection and outcome precedence

pub mod assembler;
pub mod cache;
pub mod config;
pub mod control;
pub mod dg;
pub mod error;
pub mod fragment_gen;
pub mod generator;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod sampler;
pub mod tree;
