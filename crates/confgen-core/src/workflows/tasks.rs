use crate::core::models::conformer::Conformer;
use crate::core::models::molecule::Molecule;
use crate::engine::config::GeneratorSettings;
use crate::engine::control::AbortSignal;
use crate::engine::error::{EngineError, ReturnCode};
use crate::engine::generator::ConformerGenerator;
use crate::engine::registry::LibraryRegistry;

/// What a task did with one molecule.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub code: ReturnCode,
    pub conformers: Vec<Conformer>,
    pub error: Option<EngineError>,
}

impl TaskOutcome {
    pub fn failed(error: EngineError) -> Self {
        Self {
            code: error.code(),
            conformers: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success(self.conformers.len())
    }
}

/// Per-molecule work done by one batch worker. Each worker builds its own instance.
pub trait MoleculeTask {
    fn process(&mut self, molecule: &Molecule) -> TaskOutcome;

    /// Whether results are written to the output sink at all.
    fn writes_output(&self) -> bool {
        true
    }
}

/// Generates and exports conformers.
pub struct ConformerTask {
    generator: ConformerGenerator,
}

impl ConformerTask {
    pub fn new(generator: ConformerGenerator) -> Self {
        Self { generator }
    }

    /// A worker factory sharing `registry` and the driver's abort signal.
    pub fn factory(
        settings: GeneratorSettings,
        registry: LibraryRegistry,
    ) -> impl Fn(&AbortSignal) -> Self + Sync {
        move |signal| {
            Self::new(
                ConformerGenerator::new(settings.clone(), registry.clone())
                    .with_abort_signal(signal.clone()),
            )
        }
    }
}

impl MoleculeTask for ConformerTask {
    fn process(&mut self, molecule: &Molecule) -> TaskOutcome {
        let result = self.generator.generate(molecule);
        TaskOutcome {
            code: result.code,
            conformers: result.conformers,
            error: result.error,
        }
    }
}

/// Fragments molecules into the shared fragment library without assembling them.
pub struct LibraryTask {
    generator: ConformerGenerator,
}

impl LibraryTask {
    /// Input coordinates are never reused here, so every stored ensemble comes from
    /// fragment conformer generation.
    pub fn new(mut settings: GeneratorSettings, registry: LibraryRegistry) -> Self {
        settings.assembly.use_input_coordinates = false;
        Self {
            generator: ConformerGenerator::new(settings, registry),
        }
    }

    pub fn factory(
        settings: GeneratorSettings,
        registry: LibraryRegistry,
    ) -> impl Fn(&AbortSignal) -> Self + Sync {
        move |signal| {
            let task = Self::new(settings.clone(), registry.clone());
            Self {
                generator: task.generator.with_abort_signal(signal.clone()),
            }
        }
    }
}

impl MoleculeTask for LibraryTask {
    fn process(&mut self, molecule: &Molecule) -> TaskOutcome {
        match self.generator.collect_fragments(molecule) {
            Ok(_) => TaskOutcome {
                code: ReturnCode::Success,
                conformers: Vec::new(),
                error: None,
            },
            Err(e) => TaskOutcome::failed(e),
        }
    }

    fn writes_output(&self) -> bool {
        false
    }
}
