//! Provides molecule input/output for batch runs.
//!
//! The batch driver only sees the [`traits::MoleculeSource`] and
//! [`traits::MoleculeSink`] interfaces. [`sdf`] implements both for MDL SD files
//! (V2000 connection tables with data items).

pub mod sdf;
pub mod traits;
