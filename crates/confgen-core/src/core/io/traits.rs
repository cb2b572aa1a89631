use super::sdf::SdfError;
use crate::core::models::conformer::Conformer;
use crate::core::models::molecule::Molecule;
use std::collections::VecDeque;

/// Which output stream a molecule is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Succeeded,
    Failed,
}

/// A sequential supplier of input molecules.
///
/// A source that returns an error for one record must still be able to continue
/// with the following record on the next call.
pub trait MoleculeSource: Send {
    /// Reads the next record, or `None` once the input is exhausted.
    fn next_molecule(&mut self) -> Option<Result<Molecule, SdfError>>;
}

/// A destination for generated conformer ensembles.
pub trait MoleculeSink: Send {
    /// Writes one molecule.
    ///
    /// # Arguments
    ///
    /// * `molecule` - The molecule graph, with its input coordinates and data fields.
    /// * `conformers` - Conformers to export, ordered by ascending energy. For the
    ///   failed stream this holds at most the best-known geometry.
    /// * `stream` - Whether the molecule succeeded or failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    fn write(
        &mut self,
        molecule: &Molecule,
        conformers: &[Conformer],
        stream: OutputStream,
    ) -> Result<(), SdfError>;

    fn flush(&mut self) -> Result<(), SdfError> {
        Ok(())
    }
}

/// Concatenates several sources into one record stream.
#[derive(Default)]
pub struct ChainedSource {
    sources: VecDeque<Box<dyn MoleculeSource>>,
}

impl ChainedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Box<dyn MoleculeSource>) {
        self.sources.push_back(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl MoleculeSource for ChainedSource {
    fn next_molecule(&mut self) -> Option<Result<Molecule, SdfError>> {
        while let Some(source) = self.sources.front_mut() {
            if let Some(record) = source.next_molecule() {
                return Some(record);
            }
            self.sources.pop_front();
        }
        None
    }
}

/// An in-memory source, mostly for embedding the engine in other programs.
#[derive(Debug, Default)]
pub struct MemorySource {
    molecules: VecDeque<Molecule>,
}

impl From<Vec<Molecule>> for MemorySource {
    fn from(molecules: Vec<Molecule>) -> Self {
        Self {
            molecules: molecules.into(),
        }
    }
}

impl MoleculeSource for MemorySource {
    fn next_molecule(&mut self) -> Option<Result<Molecule, SdfError>> {
        self.molecules.pop_front().map(Ok)
    }
}

/// A written molecule as captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub molecule: Molecule,
    pub conformers: Vec<Conformer>,
    pub stream: OutputStream,
}

/// Collects everything written to it.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<SinkRecord>,
}

impl MemorySink {
    pub fn succeeded(&self) -> impl Iterator<Item = &SinkRecord> {
        self.records
            .iter()
            .filter(|r| r.stream == OutputStream::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SinkRecord> {
        self.records
            .iter()
            .filter(|r| r.stream == OutputStream::Failed)
    }
}

impl MoleculeSink for MemorySink {
    fn write(
        &mut self,
        molecule: &Molecule,
        conformers: &[Conformer],
        stream: OutputStream,
    ) -> Result<(), SdfError> {
        self.records.push(SinkRecord {
            molecule: molecule.clone(),
            conformers: conformers.to_vec(),
            stream,
        });
        Ok(())
    }
}

/// Sends succeeded and failed molecules to separate sinks.
///
/// Failed molecules are dropped when no failure sink is configured.
pub struct StreamRouter {
    succeeded: Box<dyn MoleculeSink>,
    failed: Option<Box<dyn MoleculeSink>>,
}

impl StreamRouter {
    pub fn new(succeeded: Box<dyn MoleculeSink>, failed: Option<Box<dyn MoleculeSink>>) -> Self {
        Self { succeeded, failed }
    }
}

impl MoleculeSink for StreamRouter {
    fn write(
        &mut self,
        molecule: &Molecule,
        conformers: &[Conformer],
        stream: OutputStream,
    ) -> Result<(), SdfError> {
        match (stream, self.failed.as_mut()) {
            (OutputStream::Succeeded, _) => self.succeeded.write(molecule, conformers, stream),
            (OutputStream::Failed, Some(failed)) => failed.write(molecule, conformers, stream),
            (OutputStream::Failed, None) => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), SdfError> {
        self.succeeded.flush()?;
        if let Some(failed) = self.failed.as_mut() {
            failed.flush()?;
        }
        Ok(())
    }
}
