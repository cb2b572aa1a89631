//! # Fragment Library
//!
//! A content-addressed cache of fragment conformer ensembles, shared by every worker of
//! a batch run.
//!
//! Entries are keyed by the 64-bit fingerprint of a fragment's canonical form (see
//! [`canon`](crate::core::chem::canon)). Each entry stores the canonical topology blob,
//! the conformers in canonical atom order and a usage counter. The library can be
//! persisted to a sequential binary stream and merged with other libraries.
//!
//! - [`entry`] - a single cached fragment
//! - [`store`] - the shared, lock-protected map
//! - [`format`] - the binary stream format

pub mod entry;
pub mod format;
pub mod store;
