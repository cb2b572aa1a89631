use super::assembler::{AssemblyStats, FragmentAssembler};
use super::cache::RunCache;
use super::config::{GeneratorSettings, SamplingMode};
use super::control::{AbortCallback, AbortSignal, Poll, RunControl};
use super::dg::{DgTrials, enforceable_centers};
use super::error::{EngineError, ReturnCode};
use super::pool::ConformerPool;
use super::registry::LibraryRegistry;
use super::sampler::{StopReason, TrialBudget, run_trials};
use crate::core::chem::perception::Perception;
use crate::core::chem::stereo::{ChiralityCheck, assign_from_coordinates, check_chirality, find_stereo_centers};
use crate::core::chem::symmetry::SymmetryMappings;
use crate::core::forcefield::minimizer::minimize;
use crate::core::models::conformer::Conformer;
use crate::core::models::molecule::Molecule;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, instrument, warn};

/// Outcome of one molecule.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub code: ReturnCode,
    /// Ascending energy; empty for hard failures and aborts.
    pub conformers: Vec<Conformer>,
    /// The strategy that produced the conformers, once one was chosen.
    pub mode: Option<SamplingMode>,
    /// The error behind a non-success code.
    pub error: Option<EngineError>,
}

impl GenerationResult {
    fn failed(error: EngineError, mode: Option<SamplingMode>) -> Self {
        Self {
            code: error.code(),
            conformers: Vec::new(),
            mode,
            error: Some(error),
        }
    }

    /// Whether the molecule belongs in the succeeded output stream.
    pub fn is_success(&self) -> bool {
        self.code.is_success(self.conformers.len())
    }

    pub fn message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

/// Facts gathered while sampling one molecule.
#[derive(Debug, Default)]
struct Sampled {
    timed_out: bool,
    candidates: usize,
}

/// Per-worker conformer generator.
///
/// Owns its settings and a per-molecule fragment cache; the libraries behind the
/// registry are shared with every other generator of the process. One instance must
/// not be used from two threads at once; give each worker its own.
pub struct ConformerGenerator {
    settings: GeneratorSettings,
    registry: LibraryRegistry,
    signal: AbortSignal,
    callback: Option<AbortCallback>,
    cache: RunCache,
}

impl ConformerGenerator {
    pub fn new(settings: GeneratorSettings, registry: LibraryRegistry) -> Self {
        Self {
            settings,
            registry,
            signal: AbortSignal::new(),
            callback: None,
            cache: RunCache::new(),
        }
    }

    /// Shares a cancellation flag with other generators.
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Adds a hook polled at the same points as the abort flag.
    pub fn with_abort_callback(mut self, callback: AbortCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &LibraryRegistry {
        &self.registry
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// The strategy used for `mol`: the configured one, or under AUTO, stochastic
    /// embedding for macrocycles and molecules over either rotor limit.
    pub fn select_mode(&self, mol: &Molecule, perception: &Perception) -> SamplingMode {
        let sampling = &self.settings.sampling;
        match sampling.mode {
            SamplingMode::Auto => {
                let macrocyclic = perception.rings.has_macrocycle(mol, sampling.macrocycle_ring_size);
                let ring_rotors = perception.ring_rotor_count(mol, sampling.macrocycle_ring_size);
                let rotors = perception.rotatable_bonds().len();
                if macrocyclic || ring_rotors > sampling.max_ring_rotors || rotors > sampling.max_rotors {
                    SamplingMode::Stochastic
                } else {
                    SamplingMode::Systematic
                }
            }
            mode => mode,
        }
    }

    /// Generates conformers for one molecule. Never panics on bad input; every
    /// failure comes back as a result code.
    #[instrument(skip_all, name = "generate", fields(molecule = %molecule.name))]
    pub fn generate(&mut self, molecule: &Molecule) -> GenerationResult {
        let control = self.control();
        let mut rng = StdRng::seed_from_u64(self.settings.sampling.seed);
        self.cache.clear();

        let mut mode = None;
        let result = self.run(molecule, &control, &mut rng, &mut mode);
        self.cache.clear();
        match result {
            Ok(result) => {
                info!(
                    code = %result.code,
                    conformers = result.conformers.len(),
                    mode = ?result.mode,
                    "Molecule finished"
                );
                result
            }
            Err(e) => {
                if e.is_unexpected() {
                    warn!(error = %e, "Conformer generation hit an internal error");
                } else {
                    info!(code = %e.code(), error = %e, "Molecule failed");
                }
                GenerationResult::failed(e, mode)
            }
        }
    }

    /// Puts every fragment of `molecule` into the shared fragment library without
    /// building whole-molecule conformers.
    ///
    /// # Errors
    ///
    /// [`EngineError::FragmentLibraryNotSet`] when the registry has no fragment
    /// library, otherwise the same errors as fragment generation.
    #[instrument(skip_all, name = "collect_fragments", fields(molecule = %molecule.name))]
    pub fn collect_fragments(&mut self, molecule: &Molecule) -> Result<AssemblyStats, EngineError> {
        if self.registry.fragments.is_none() {
            return Err(EngineError::FragmentLibraryNotSet);
        }
        let control = self.control();
        let mut rng = StdRng::seed_from_u64(self.settings.sampling.seed);
        control.check()?;
        let (prepared, perception) = self.prepare(molecule)?;

        self.cache.clear();
        let assembler = FragmentAssembler::new(&self.settings, &self.registry);
        let stats = assembler.collect_fragments(&prepared, &perception, &mut self.cache, &control, &mut rng);
        self.cache.clear();
        let stats = stats?;
        debug!(
            fragments = stats.fragments,
            generated = stats.generated,
            library_hits = stats.library_hits,
            "Fragments collected"
        );
        Ok(stats)
    }

    fn control(&self) -> RunControl {
        RunControl::new(self.signal.clone(), self.callback.clone(), self.settings.timeout)
    }

    /// Validates the graph, perceives it and applies stereo perception from 3D.
    fn prepare(&self, molecule: &Molecule) -> Result<(Molecule, Perception), EngineError> {
        if molecule.is_empty() {
            return Err(EngineError::Generation("molecule has no atoms".into()));
        }
        let components = molecule.components().len();
        if components > 1 {
            return Err(EngineError::Generation(format!(
                "molecule has {components} disconnected components"
            )));
        }
        let mut prepared = molecule.clone();
        let perception = Perception::new(&prepared);
        if self.settings.sampling.stereo_from_3d {
            let centers = find_stereo_centers(&prepared, &perception);
            let assigned = assign_from_coordinates(&mut prepared, &centers);
            debug!(assigned, "Stereo tags perceived from input coordinates");
        }
        Ok((prepared, perception))
    }

    fn run(
        &mut self,
        molecule: &Molecule,
        control: &RunControl,
        rng: &mut StdRng,
        mode: &mut Option<SamplingMode>,
    ) -> Result<GenerationResult, EngineError> {
        // === Phase 1: Preparation ===
        control.check()?;
        let (prepared, perception) = self.prepare(molecule)?;
        let selected = self.select_mode(&prepared, &perception);
        *mode = Some(selected);
        let symmetry = SymmetryMappings::compute(&prepared, self.settings.pool.max_symmetry_mappings);
        let mut pool = ConformerPool::new(
            &symmetry,
            self.settings.pool.energy_window,
            self.settings.pool.rmsd_threshold,
        );
        debug!(
            atoms = prepared.atom_count(),
            rotors = perception.rotatable_bonds().len(),
            mode = %selected,
            symmetry_mappings = symmetry.len(),
            "Molecule prepared"
        );

        // === Phase 2: Sampling and refinement ===
        let mut sampled = match selected {
            SamplingMode::Stochastic => self.stochastic(&prepared, &perception, &mut pool, control, rng)?,
            _ => self.systematic(&prepared, &perception, &mut pool, control, rng)?,
        };
        if selected != SamplingMode::Stochastic && pool.is_empty() && !sampled.timed_out {
            debug!(candidates = sampled.candidates, "Assembly left no conformer; falling back to stochastic sampling");
            *mode = Some(SamplingMode::Stochastic);
            sampled = self.stochastic(&prepared, &perception, &mut pool, control, rng)?;
        }

        // === Phase 3: Pooling ===
        if control.is_aborted() {
            return Err(EngineError::Aborted);
        }
        let conformers = pool.finish(self.settings.pool.max_conformers);
        let (code, error) = if conformers.is_empty() {
            if sampled.timed_out {
                (ReturnCode::Timeout, Some(EngineError::Timeout))
            } else {
                let e = EngineError::Generation("no conformer survived refinement and pooling".into());
                (e.code(), Some(e))
            }
        } else if sampled.timed_out {
            (ReturnCode::Timeout, None)
        } else if symmetry.is_truncated() {
            (ReturnCode::TooMuchSymmetry, None)
        } else {
            (ReturnCode::Success, None)
        };
        Ok(GenerationResult {
            code,
            conformers,
            mode: *mode,
            error,
        })
    }

    fn systematic(
        &mut self,
        mol: &Molecule,
        perception: &Perception,
        pool: &mut ConformerPool<'_>,
        control: &RunControl,
        rng: &mut StdRng,
    ) -> Result<Sampled, EngineError> {
        let assembler = FragmentAssembler::new(&self.settings, &self.registry);
        let assembly = assembler.assemble(mol, perception, &mut self.cache, control, rng)?;

        let mut forcefield = self.registry.forcefield.create();
        forcefield.setup(mol).map_err(EngineError::ForceFieldSetup)?;
        let centers: Vec<Vec<usize>> = assembly
            .variants
            .iter()
            .map(|variant| enforceable_centers(variant, perception))
            .collect();
        let refine = self.settings.refinement.minimize_config();

        let mut sampled = Sampled {
            timed_out: assembly.timed_out,
            candidates: assembly.candidates.len(),
        };
        let mut minimized = 0usize;
        let mut inverted = 0usize;
        let mut last_error = None;
        for candidate in assembly.candidates {
            match control.poll() {
                Poll::Continue => {}
                Poll::Abort => return Err(EngineError::Aborted),
                Poll::Timeout => {
                    sampled.timed_out = true;
                    break;
                }
            }
            let mut coords = candidate.coords;
            let result = match minimize(forcefield.as_ref(), &mut coords, &refine) {
                Ok(result) => result,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            minimized += 1;
            let variant = &assembly.variants[candidate.variant];
            if check_chirality(variant, &coords, &centers[candidate.variant]) != ChiralityCheck::Consistent {
                inverted += 1;
                continue;
            }
            pool.offer(Conformer::new(coords, result.final_energy));
        }
        debug!(
            candidates = sampled.candidates,
            minimized,
            stereo_rejected = inverted,
            retained = pool.len(),
            "Assembled candidates refined"
        );
        if minimized == 0 {
            if let Some(e) = last_error {
                return Err(EngineError::Minimization(e));
            }
        }
        Ok(sampled)
    }

    fn stochastic(
        &self,
        mol: &Molecule,
        perception: &Perception,
        pool: &mut ConformerPool<'_>,
        control: &RunControl,
        rng: &mut StdRng,
    ) -> Result<Sampled, EngineError> {
        let mut trials = DgTrials::new(mol, perception);
        let report = run_trials(
            &mut trials,
            mol,
            self.registry.forcefield.as_ref(),
            &self.settings.refinement.minimize_config(),
            TrialBudget {
                min_trials: self.settings.stochastic.min_trials,
                max_trials: self.settings.stochastic.max_trials,
            },
            pool,
            control,
            rng,
        )?;
        debug!(
            trials = report.trials,
            embedding_failures = report.embedding_failures,
            retained = report.retained,
            stop = ?report.stop,
            "Stochastic sampling finished"
        );
        if pool.is_empty() {
            match report.last_error.clone() {
                Some(e) if report.setup_always_failed() => return Err(EngineError::ForceFieldSetup(e)),
                Some(e) if report.minimization_always_failed() => return Err(EngineError::Minimization(e)),
                _ => {}
            }
        }
        Ok(Sampled {
            timed_out: report.stop == StopReason::TimedOut,
            candidates: report.trials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::oracle::{ForceField, ForceFieldError, ForceFieldFactory, Objective};
    use crate::core::models::atom::Atom;
    use crate::core::models::element::Element;
    use crate::core::models::topology::BondOrder;
    use nalgebra::{Point3, Vector3};
    use std::sync::Arc;
    use std::time::Duration;

    struct Unparameterized;

    impl Objective for Unparameterized {
        fn energy(&self, _coords: &[Point3<f64>]) -> f64 {
            0.0
        }
        fn gradient(&self, coords: &[Point3<f64>]) -> Vec<Vector3<f64>> {
            vec![Vector3::zeros(); coords.len()]
        }
    }

    impl ForceField for Unparameterized {
        fn setup(&mut self, _molecule: &Molecule) -> Result<(), ForceFieldError> {
            Err(ForceFieldError::MissingParameters {
                element: Element::C,
                atom: 0,
            })
        }
    }

    struct UnparameterizedFactory;

    impl ForceFieldFactory for UnparameterizedFactory {
        fn create(&self) -> Box<dyn ForceField> {
            Box::new(Unparameterized)
        }
    }

    fn add(mol: &mut Molecule, element: Element, hydrogens: u8) -> usize {
        let index = mol.add_atom(Atom::new(element, Point3::origin()));
        mol.atom_mut(index).implicit_hydrogens = hydrogens;
        index
    }

    fn chain(name: &str, hydrogens: &[u8]) -> Molecule {
        let mut mol = Molecule::new(name);
        let atoms: Vec<usize> = hydrogens
            .iter()
            .map(|&h| add(&mut mol, Element::C, h))
            .collect();
        for pair in atoms.windows(2) {
            mol.add_bond(pair[0], pair[1], BondOrder::Single).unwrap();
        }
        mol
    }

    fn butane() -> Molecule {
        chain("butane", &[3, 2, 2, 3])
    }

    fn ring(size: usize) -> Molecule {
        let mut mol = chain("ring", &vec![2; size]);
        mol.add_bond(size - 1, 0, BondOrder::Single).unwrap();
        mol
    }

    fn generator(settings: GeneratorSettings) -> ConformerGenerator {
        ConformerGenerator::new(settings, LibraryRegistry::builtin().unwrap())
    }

    fn assert_ordered_and_windowed(result: &GenerationResult, window: f64) {
        let best = result.conformers[0].energy;
        for pair in result.conformers.windows(2) {
            assert!(pair[0].energy <= pair[1].energy);
        }
        assert!(result.conformers.iter().all(|c| c.energy <= best + window));
    }

    #[test]
    fn auto_mode_routes_macrocycles_to_stochastic_sampling() {
        let g = generator(GeneratorSettings::default());
        let macrocycle = ring(12);
        assert_eq!(
            g.select_mode(&macrocycle, &Perception::new(&macrocycle)),
            SamplingMode::Stochastic
        );
        let mol = butane();
        assert_eq!(g.select_mode(&mol, &Perception::new(&mol)), SamplingMode::Systematic);

        let limited = generator(GeneratorSettings::builder().max_rotors(0).build().unwrap());
        assert_eq!(limited.select_mode(&mol, &Perception::new(&mol)), SamplingMode::Stochastic);

        let forced = generator(
            GeneratorSettings::builder()
                .mode(SamplingMode::Systematic)
                .build()
                .unwrap(),
        );
        assert_eq!(
            forced.select_mode(&macrocycle, &Perception::new(&macrocycle)),
            SamplingMode::Systematic
        );
    }

    #[test]
    fn systematic_generation_returns_sorted_conformers() {
        let settings = GeneratorSettings::default();
        let mut g = generator(settings.clone());
        let result = g.generate(&butane());
        assert_eq!(result.code, ReturnCode::Success, "{:?}", result.error);
        assert_eq!(result.mode, Some(SamplingMode::Systematic));
        assert!(!result.conformers.is_empty());
        assert!(result.conformers.len() <= settings.pool.max_conformers);
        assert_ordered_and_windowed(&result, settings.pool.energy_window);
        assert!(result.conformers.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn stochastic_generation_returns_sorted_conformers() {
        let settings = GeneratorSettings::builder()
            .mode(SamplingMode::Stochastic)
            .stochastic_trials(5, 20)
            .build()
            .unwrap();
        let mut g = generator(settings.clone());
        let result = g.generate(&butane());
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.mode, Some(SamplingMode::Stochastic));
        assert_ordered_and_windowed(&result, settings.pool.energy_window);
    }

    #[test]
    fn abort_before_start_yields_nothing() {
        let signal = AbortSignal::new();
        signal.raise();
        let mut g = generator(GeneratorSettings::default()).with_abort_signal(signal);
        let result = g.generate(&butane());
        assert_eq!(result.code, ReturnCode::Aborted);
        assert!(result.conformers.is_empty());
        assert!(g.registry().fragments.as_ref().unwrap().is_empty());
    }

    #[test]
    fn abort_callback_is_honored() {
        let mut g = generator(GeneratorSettings::default()).with_abort_callback(Arc::new(|| true));
        assert_eq!(g.generate(&butane()).code, ReturnCode::Aborted);
    }

    #[test]
    fn empty_and_disconnected_molecules_fail() {
        let mut g = generator(GeneratorSettings::default());
        let empty = g.generate(&Molecule::new("empty"));
        assert_eq!(empty.code, ReturnCode::ConfGenFailed);
        assert!(!empty.is_success());

        let mut salt = butane();
        add(&mut salt, Element::Cl, 0);
        let result = g.generate(&salt);
        assert_eq!(result.code, ReturnCode::ConfGenFailed);
        assert!(result.message().unwrap().contains("disconnected"));
    }

    #[test]
    fn setup_failure_is_reported_per_strategy() {
        let registry = LibraryRegistry::builtin()
            .unwrap()
            .with_forcefield(Arc::new(UnparameterizedFactory));
        let stochastic = GeneratorSettings::builder()
            .mode(SamplingMode::Stochastic)
            .stochastic_trials(3, 5)
            .build()
            .unwrap();
        let result = ConformerGenerator::new(stochastic, registry.clone()).generate(&butane());
        assert_eq!(result.code, ReturnCode::ForceFieldSetupFailed);

        let systematic = GeneratorSettings::builder()
            .mode(SamplingMode::Systematic)
            .build()
            .unwrap();
        let result = ConformerGenerator::new(systematic, registry).generate(&butane());
        assert_eq!(result.code, ReturnCode::FragmentConfGenFailed);
    }

    #[test]
    fn exhausted_symmetry_budget_is_reported() {
        let settings = GeneratorSettings::builder()
            .max_symmetry_mappings(1)
            .build()
            .unwrap();
        let result = generator(settings).generate(&butane());
        assert_eq!(result.code, ReturnCode::TooMuchSymmetry);
        assert!(result.is_success());
        assert!(!result.conformers.is_empty());
    }

    #[test]
    fn zero_timeout_ends_without_conformers() {
        let settings = GeneratorSettings::builder()
            .timeout(Some(Duration::ZERO))
            .build()
            .unwrap();
        let result = generator(settings).generate(&butane());
        assert_eq!(result.code, ReturnCode::Timeout);
        assert!(!result.is_success());
    }

    #[test]
    fn fragments_are_collected_into_the_library() {
        let mut g = generator(GeneratorSettings::default());
        let stats = g.collect_fragments(&butane()).unwrap();
        assert_eq!(stats.fragments, 2);
        assert_eq!(g.registry().fragments.as_ref().unwrap().len(), 1);

        let mut bare = ConformerGenerator::new(
            GeneratorSettings::default(),
            LibraryRegistry::builtin().unwrap().without_fragment_library(),
        );
        assert_eq!(
            bare.collect_fragments(&butane()).unwrap_err(),
            EngineError::FragmentLibraryNotSet
        );
    }
}
