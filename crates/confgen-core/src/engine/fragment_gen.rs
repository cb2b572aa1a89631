use super::config::{FragmentBuildSettings, RefinementSettings};
use super::control::RunControl;
use super::dg::DgTrials;
use super::error::EngineError;
use super::pool::ConformerPool;
use super::sampler::{StopReason, TrialBudget, run_trials};
use crate::core::chem::perception::Perception;
use crate::core::chem::symmetry::SymmetryMappings;
use crate::core::forcefield::oracle::ForceFieldFactory;
use crate::core::models::conformer::Conformer;
use crate::core::models::fragment::Fragment;
use rand::rngs::StdRng;
use tracing::debug;

/// Generates ranked low-energy conformers for one isolated fragment.
///
/// Trials are distance-geometry embeddings refined by the force field; the trial
/// budget, energy window, diversity threshold and output cap come from the settings
/// of the fragment's kind.
pub struct FragmentConformerGenerator<'a> {
    settings: &'a FragmentBuildSettings,
    refinement: &'a RefinementSettings,
    forcefield: &'a dyn ForceFieldFactory,
}

impl<'a> FragmentConformerGenerator<'a> {
    pub fn new(
        settings: &'a FragmentBuildSettings,
        refinement: &'a RefinementSettings,
        forcefield: &'a dyn ForceFieldFactory,
    ) -> Self {
        Self {
            settings,
            refinement,
            forcefield,
        }
    }

    /// Conformers of `fragment` in ascending energy, local atom order.
    ///
    /// # Errors
    ///
    /// * [`EngineError::Aborted`] if the run was cancelled.
    /// * [`EngineError::Timeout`] if the molecule's time limit ran out before any
    ///   structure was retained.
    /// * [`EngineError::FragmentGeneration`] if no trial produced a structure, including
    ///   the case where every force-field setup failed.
    pub fn generate(
        &self,
        fragment: &Fragment,
        fingerprint: u64,
        control: &RunControl,
        rng: &mut StdRng,
    ) -> Result<Vec<Conformer>, EngineError> {
        let trials = self.settings.for_kind(fragment.kind);
        let local_control = control.with_timeout(self.settings.timeout);
        let molecule = &fragment.molecule;
        let perception = Perception::new(molecule);
        let symmetry = SymmetryMappings::identity(molecule);
        let mut pool = ConformerPool::new(&symmetry, trials.energy_window, trials.min_rmsd);
        let mut generator = DgTrials::new(molecule, &perception);

        let report = run_trials(
            &mut generator,
            molecule,
            self.forcefield,
            &self.refinement.minimize_config(),
            TrialBudget {
                min_trials: trials.min_trials,
                max_trials: trials.max_trials,
            },
            &mut pool,
            &local_control,
            rng,
        )?;
        let conformers = pool.finish(trials.max_conformers);

        debug!(
            fingerprint = %format!("{fingerprint:016x}"),
            kind = ?fragment.kind,
            atoms = molecule.atom_count(),
            trials = report.trials,
            retained = conformers.len(),
            stop = ?report.stop,
            "Fragment conformers generated"
        );

        if !conformers.is_empty() {
            return Ok(conformers);
        }
        let reason = if report.stop == StopReason::TimedOut {
            if control.is_timed_out() {
                return Err(EngineError::Timeout);
            }
            "fragment time limit reached before any conformer was retained".to_string()
        } else if report.setup_always_failed() {
            match &report.last_error {
                Some(e) => format!("force-field setup failed in every trial: {e}"),
                None => "force-field setup failed in every trial".to_string(),
            }
        } else if report.minimization_always_failed() {
            match &report.last_error {
                Some(e) => format!("minimization failed in every trial: {e}"),
                None => "minimization failed in every trial".to_string(),
            }
        } else {
            format!("none of {} trials produced an acceptable structure", report.trials)
        };
        Err(EngineError::FragmentGeneration {
            fingerprint,
            reason,
        })
    }
}
