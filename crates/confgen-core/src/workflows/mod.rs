//! # Workflows Module
//!
//! Batch entry points built on the per-molecule engine.
//!
//! ## Overview
//!
//! A [`batch::BatchDriver`] pulls molecules from a source, hands each one to a worker
//! and writes the results to a sink. Every worker owns its own [`tasks::MoleculeTask`]
//! (and through it its own generator); the fragment library behind the tasks is shared.
//!
//! ## Architecture
//!
//! - **Batch Driver** ([`batch`]) - Worker pool, shared input cursor, output routing,
//!   cooperative cancellation and the per-molecule run report
//! - **Tasks** ([`tasks`]) - Conformer generation and fragment-library building as
//!   interchangeable per-molecule tasks

pub mod batch;
pub mod tasks;
