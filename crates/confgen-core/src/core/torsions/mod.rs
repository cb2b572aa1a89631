//! # Torsion Rules
//!
//! Preferred dihedral angles for rotatable bonds, keyed by the local environment of the
//! bond.
//!
//! Rules live in TOML libraries. Each library holds categories, each category a level
//! (`specific` or `generic`) and a list of rules. A rule pairs a bond pattern such as
//! `C.2(=O)-N` with the angles the bond prefers. Matching picks the best rule over all
//! loaded libraries: specific before generic, then the most detailed pattern, then the
//! most recently added library, then the earliest rule. Bonds no rule covers fall back
//! to a 30° grid.
//!
//! - [`pattern`] - the bond pattern language
//! - [`library`] - rule libraries, composition and matching

pub mod library;
pub mod pattern;
