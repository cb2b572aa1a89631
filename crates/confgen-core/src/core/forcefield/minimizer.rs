use super::oracle::{ForceFieldError, Objective};
use nalgebra::{Point3, Vector3};

/// Minimization configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeConfig {
    pub max_steps: usize,
    /// Convergence threshold on the RMS gradient per atom (kcal/mol/Å).
    pub gradient_threshold: f64,
    /// Largest displacement of any atom in one line-search step (Å).
    pub max_displacement: f64,
}

impl Default for MinimizeConfig {
    fn default() -> Self {
        Self {
            max_steps: 500,
            gradient_threshold: 0.05,
            max_displacement: 0.3,
        }
    }
}

/// Result of energy minimization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeResult {
    pub initial_energy: f64,
    pub final_energy: f64,
    pub n_steps: usize,
    pub converged: bool,
}

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 30;

/// Polak-Ribiere (PR+) conjugate gradient with Armijo backtracking, in place.
///
/// Stops when the RMS gradient drops below the threshold, when no downhill step can be
/// found, or after `max_steps` iterations. Non-finite energies are errors.
pub fn minimize<O: Objective + ?Sized>(
    objective: &O,
    coords: &mut [Point3<f64>],
    config: &MinimizeConfig,
) -> Result<MinimizeResult, ForceFieldError> {
    let n = coords.len();
    if n == 0 {
        return Err(ForceFieldError::EmptyStructure);
    }
    let (mut energy, mut gradient) = objective.energy_and_gradient(coords);
    if !energy.is_finite() {
        return Err(ForceFieldError::MinimizationFailed(format!(
            "initial energy is {energy}"
        )));
    }
    let initial_energy = energy;
    let mut direction: Vec<Vector3<f64>> = gradient.iter().map(|g| -g).collect();
    let mut converged = false;
    let mut n_steps = 0;
    let mut trial = coords.to_vec();

    for step in 0..config.max_steps {
        let grad_sq: f64 = gradient.iter().map(|g| g.norm_squared()).sum();
        if (grad_sq / n as f64).sqrt() < config.gradient_threshold {
            converged = true;
            break;
        }

        let mut slope: f64 = gradient.iter().zip(&direction).map(|(g, d)| g.dot(d)).sum();
        if slope >= 0.0 {
            direction = gradient.iter().map(|g| -g).collect();
            slope = -grad_sq;
        }
        let longest = direction.iter().map(|d| d.norm()).fold(0.0, f64::max);
        if longest < 1e-12 {
            converged = true;
            break;
        }

        let mut alpha = config.max_displacement / longest;
        let mut accepted = false;
        for _ in 0..MAX_BACKTRACKS {
            for ((t, c), d) in trial.iter_mut().zip(coords.iter()).zip(&direction) {
                *t = c + d * alpha;
            }
            let trial_energy = objective.energy(&trial);
            if trial_energy.is_finite() && trial_energy <= energy + ARMIJO_C1 * alpha * slope {
                accepted = true;
                break;
            }
            alpha *= 0.5;
        }
        if !accepted {
            break;
        }

        coords.copy_from_slice(&trial);
        let (new_energy, new_gradient) = objective.energy_and_gradient(coords);
        if !new_energy.is_finite() {
            return Err(ForceFieldError::MinimizationFailed(format!(
                "energy became {new_energy} at step {step}"
            )));
        }
        let numerator: f64 = new_gradient
            .iter()
            .zip(&gradient)
            .map(|(new, old)| new.dot(&(new - old)))
            .sum();
        let beta = if grad_sq > 1e-30 {
            (numerator / grad_sq).max(0.0)
        } else {
            0.0
        };
        for (d, g) in direction.iter_mut().zip(&new_gradient) {
            *d = -g + *d * beta;
        }
        energy = new_energy;
        gradient = new_gradient;
        n_steps = step + 1;
    }

    Ok(MinimizeResult {
        initial_energy,
        final_energy: energy,
        n_steps,
        converged,
    })
}
