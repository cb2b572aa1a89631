use super::control::{Poll, RunControl};
use super::error::EngineError;
use super::pool::ConformerPool;
use crate::core::forcefield::minimizer::{MinimizeConfig, minimize};
use crate::core::forcefield::oracle::{ForceField, ForceFieldError, ForceFieldFactory};
use crate::core::models::conformer::Conformer;
use crate::core::models::molecule::Molecule;
use nalgebra::Point3;
use rand::rngs::StdRng;
use tracing::trace;

/// Produces raw trial structures for [`run_trials`].
pub trait TrialGenerator {
    /// Builds the starting coordinates of one trial, or `None` if embedding failed.
    fn generate(&mut self, trial: usize, rng: &mut StdRng) -> Option<Vec<Point3<f64>>>;

    /// Final check on a refined structure before it is offered to the pool.
    fn accept(&self, _coords: &[Point3<f64>]) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialBudget {
    pub min_trials: usize,
    pub max_trials: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// All `max_trials` were used.
    Exhausted,
    /// `min_trials` consecutive trials produced nothing new.
    Converged,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerReport {
    pub trials: usize,
    pub embedding_failures: usize,
    pub setup_failures: usize,
    pub minimization_failures: usize,
    pub rejected: usize,
    pub retained: usize,
    pub stop: StopReason,
    /// Last force-field error seen, for reporting when nothing was produced.
    pub last_error: Option<ForceFieldError>,
}

impl SamplerReport {
    /// Whether every trial that reached the force field failed its setup.
    pub fn setup_always_failed(&self) -> bool {
        self.setup_failures > 0 && self.setup_failures + self.embedding_failures == self.trials
    }

    /// Whether every trial that reached minimization failed there.
    pub fn minimization_always_failed(&self) -> bool {
        self.minimization_failures > 0
            && self.minimization_failures + self.setup_failures + self.embedding_failures
                == self.trials
    }
}

/// Embeds, refines and pools trial structures for one molecule graph.
///
/// The force field is created and bound lazily; a failed setup is retried on the next
/// trial. Control is polled before every trial: an abort discards the run, a timeout
/// ends it with whatever the pool holds.
#[allow(clippy::too_many_arguments)]
pub fn run_trials<G: TrialGenerator + ?Sized>(
    generator: &mut G,
    molecule: &Molecule,
    factory: &dyn ForceFieldFactory,
    refine: &MinimizeConfig,
    budget: TrialBudget,
    pool: &mut ConformerPool<'_>,
    control: &RunControl,
    rng: &mut StdRng,
) -> Result<SamplerReport, EngineError> {
    let mut report = SamplerReport {
        trials: 0,
        embedding_failures: 0,
        setup_failures: 0,
        minimization_failures: 0,
        rejected: 0,
        retained: 0,
        stop: StopReason::Exhausted,
        last_error: None,
    };
    let mut forcefield: Option<Box<dyn ForceField>> = None;
    let mut since_last_retained = 0usize;

    for trial in 0..budget.max_trials {
        match control.poll() {
            Poll::Continue => {}
            Poll::Abort => return Err(EngineError::Aborted),
            Poll::Timeout => {
                report.stop = StopReason::TimedOut;
                break;
            }
        }
        if trial >= budget.min_trials && since_last_retained >= budget.min_trials {
            report.stop = StopReason::Converged;
            break;
        }
        report.trials += 1;
        since_last_retained += 1;

        let Some(mut coords) = generator.generate(trial, rng) else {
            report.embedding_failures += 1;
            continue;
        };

        if forcefield.is_none() {
            let mut candidate = factory.create();
            match candidate.setup(molecule) {
                Ok(()) => forcefield = Some(candidate),
                Err(e) => {
                    trace!(trial, error = %e, "Force-field setup failed");
                    report.setup_failures += 1;
                    report.last_error = Some(e);
                    continue;
                }
            }
        }
        let Some(ff) = forcefield.as_deref() else {
            continue;
        };

        let result = match minimize(ff, &mut coords, refine) {
            Ok(result) => result,
            Err(e) => {
                trace!(trial, error = %e, "Trial minimization failed");
                report.minimization_failures += 1;
                report.last_error = Some(e);
                continue;
            }
        };
        if !generator.accept(&coords) {
            report.rejected += 1;
            continue;
        }
        if pool.offer(Conformer::new(coords, result.final_energy)) {
            report.retained += 1;
            since_last_retained = 0;
        } else {
            report.rejected += 1;
        }
    }
    Ok(report)
}
