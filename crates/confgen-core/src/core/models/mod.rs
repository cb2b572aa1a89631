//! # Molecular Models
//!
//! Data structures describing a molecule graph and its 3D realizations.
//!
//! - [`element::Element`] - chemical elements with radii used by geometry and force fields
//! - [`atom::Atom`] - an atom with charge, aromaticity, hydrogen count and a chirality tag
//! - [`topology::Bond`] - a bond between two atom indices with its order
//! - [`molecule::Molecule`] - the atom/bond graph with adjacency lists
//! - [`conformer::Conformer`] - one coordinate assignment plus an energy
//! - [`fragment::Fragment`] - an induced subgraph cut out of a parent molecule, with an
//!   explicit index remap back to the parent
//!
//! Atoms and bonds are addressed by plain `usize` indices into their owning molecule.
//! A fragment is a standalone molecule of its own; the mapping to its parent is carried
//! alongside it and never implied.

pub mod atom;
pub mod conformer;
pub mod element;
pub mod fragment;
pub mod molecule;
pub mod topology;
