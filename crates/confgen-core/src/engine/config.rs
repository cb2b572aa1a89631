use crate::core::forcefield::minimizer::MinimizeConfig;
use crate::core::forcefield::oracle::ForceFieldKind;
use crate::core::models::fragment::FragmentKind;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
    #[error("Minimum trial count {min} exceeds maximum {max} for {group} fragments")]
    TrialRange {
        group: &'static str,
        min: usize,
        max: usize,
    },
}

/// How whole-molecule structures are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingMode {
    /// Systematic unless the molecule is macrocyclic or has too many rotors.
    #[default]
    Auto,
    /// Fragment assembly under torsion rules.
    Systematic,
    /// Distance-geometry embedding of the whole molecule.
    Stochastic,
}

impl FromStr for SamplingMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "systematic" => Ok(Self::Systematic),
            "stochastic" => Ok(Self::Stochastic),
            other => Err(format!(
                "unknown sampling mode '{other}' (expected auto, systematic or stochastic)"
            )),
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Systematic => "systematic",
            Self::Stochastic => "stochastic",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingSettings {
    pub mode: SamplingMode,
    /// Rings of at least this size make a ring system a macrocycle.
    pub macrocycle_ring_size: usize,
    /// AUTO switches to stochastic sampling above this many ring rotors.
    pub max_ring_rotors: usize,
    /// AUTO switches to stochastic sampling above this many rotatable bonds.
    pub max_rotors: usize,
    /// Seed for every random choice; a fixed seed makes runs reproducible.
    pub seed: u64,
    /// Tag unspecified stereocenters from the input coordinates before sampling.
    pub stereo_from_3d: bool,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Auto,
            macrocycle_ring_size: 10,
            max_ring_rotors: 8,
            max_rotors: 40,
            seed: 42,
            stereo_from_3d: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Structures more than this far above the best (kcal/mol) are dropped.
    pub energy_window: f64,
    /// Minimum heavy-atom RMSD between kept structures (Å); 0 disables the check.
    pub rmsd_threshold: f64,
    pub max_conformers: usize,
    pub max_symmetry_mappings: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            energy_window: 10.0,
            rmsd_threshold: 0.5,
            max_conformers: 200,
            max_symmetry_mappings: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementSettings {
    pub max_iterations: usize,
    pub gradient_tolerance: f64,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            gradient_tolerance: 0.05,
        }
    }
}

impl RefinementSettings {
    pub fn minimize_config(&self) -> MinimizeConfig {
        MinimizeConfig {
            max_steps: self.max_iterations,
            gradient_threshold: self.gradient_tolerance,
            ..MinimizeConfig::default()
        }
    }
}

/// Trial budget and pooling for one fragment class.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSettings {
    pub min_trials: usize,
    pub max_trials: usize,
    pub energy_window: f64,
    pub min_rmsd: f64,
    /// Most conformers kept per fragment.
    pub max_conformers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentBuildSettings {
    pub ring: TrialSettings,
    pub chain: TrialSettings,
    pub macrocycle: TrialSettings,
    /// Time limit for generating one fragment.
    pub timeout: Option<Duration>,
    /// Fail with `FRAGMENT_LIBRARY_NOT_SET` instead of generating without a library.
    pub require_library: bool,
}

impl Default for FragmentBuildSettings {
    fn default() -> Self {
        Self {
            ring: TrialSettings {
                min_trials: 10,
                max_trials: 100,
                energy_window: 6.0,
                min_rmsd: 0.1,
                max_conformers: 20,
            },
            chain: TrialSettings {
                min_trials: 3,
                max_trials: 10,
                energy_window: 6.0,
                min_rmsd: 0.1,
                max_conformers: 5,
            },
            macrocycle: TrialSettings {
                min_trials: 30,
                max_trials: 500,
                energy_window: 10.0,
                min_rmsd: 0.3,
                max_conformers: 50,
            },
            timeout: None,
            require_library: false,
        }
    }
}

impl FragmentBuildSettings {
    pub fn for_kind(&self, kind: FragmentKind) -> &TrialSettings {
        match kind {
            FragmentKind::RingSystem => &self.ring,
            FragmentKind::Chain => &self.chain,
            FragmentKind::Macrocycle => &self.macrocycle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblySettings {
    /// Most assembled candidates refined per molecule, over all stereo variants.
    pub max_candidates: usize,
    pub max_stereo_variants: usize,
    /// Enumerate both pyramids of unconstrained amine nitrogens.
    pub enumerate_nitrogens: bool,
    /// Reuse input fragment geometry when its bond lengths look sane.
    pub use_input_coordinates: bool,
    /// Add the tolerance-boundary angles of each torsion rule.
    pub sample_torsion_tolerance: bool,
    /// Candidates with non-bonded heavy atoms closer than this fraction of their
    /// van der Waals contact distance are discarded before refinement.
    pub clash_factor: f64,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            max_candidates: 500,
            max_stereo_variants: 16,
            enumerate_nitrogens: true,
            use_input_coordinates: false,
            sample_torsion_tolerance: false,
            clash_factor: 0.5,
        }
    }
}

/// Whole-molecule distance-geometry trials.
#[derive(Debug, Clone, PartialEq)]
pub struct StochasticSettings {
    pub min_trials: usize,
    pub max_trials: usize,
}

impl Default for StochasticSettings {
    fn default() -> Self {
        Self {
            min_trials: 30,
            max_trials: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForceFieldSettings {
    pub kind: ForceFieldKind,
    /// Fail setup for elements without parameters instead of using generic ones.
    pub strict: bool,
    /// TOML file overriding the built-in element parameters.
    pub params_path: Option<PathBuf>,
}

/// Everything a [`ConformerGenerator`](super::generator::ConformerGenerator) needs to
/// know, copied into each worker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratorSettings {
    pub sampling: SamplingSettings,
    pub pool: PoolSettings,
    pub refinement: RefinementSettings,
    pub fragments: FragmentBuildSettings,
    pub assembly: AssemblySettings,
    pub stochastic: StochasticSettings,
    pub forcefield: ForceFieldSettings,
    /// Wall-clock limit per molecule.
    pub timeout: Option<Duration>,
}

impl GeneratorSettings {
    pub fn builder() -> GeneratorSettingsBuilder {
        GeneratorSettingsBuilder::new()
    }

    /// Checks ranges that would make generation meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("energy_window", self.pool.energy_window)?;
        non_negative("rmsd_threshold", self.pool.rmsd_threshold)?;
        at_least_one("max_conformers", self.pool.max_conformers)?;
        at_least_one("max_symmetry_mappings", self.pool.max_symmetry_mappings)?;
        at_least_one("max_iterations", self.refinement.max_iterations)?;
        positive("gradient_tolerance", self.refinement.gradient_tolerance)?;
        at_least_one("max_candidates", self.assembly.max_candidates)?;
        at_least_one("max_stereo_variants", self.assembly.max_stereo_variants)?;
        non_negative("clash_factor", self.assembly.clash_factor)?;
        if self.sampling.macrocycle_ring_size < 3 {
            return Err(ConfigError::InvalidValue {
                name: "macrocycle_ring_size",
                reason: "must be at least 3".into(),
            });
        }
        for (group, trials) in [
            ("ring", &self.fragments.ring),
            ("chain", &self.fragments.chain),
            ("macrocycle", &self.fragments.macrocycle),
        ] {
            check_trials(group, trials.min_trials, trials.max_trials)?;
            positive("fragment energy_window", trials.energy_window)?;
            non_negative("fragment min_rmsd", trials.min_rmsd)?;
            at_least_one("fragment max_conformers", trials.max_conformers)?;
        }
        check_trials(
            "stochastic",
            self.stochastic.min_trials,
            self.stochastic.max_trials,
        )
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be positive, got {value}"),
        })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: format!("must not be negative, got {value}"),
        })
    }
}

fn at_least_one(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            name,
            reason: "must be at least 1".into(),
        })
    }
}

fn check_trials(group: &'static str, min: usize, max: usize) -> Result<(), ConfigError> {
    if max == 0 {
        return Err(ConfigError::InvalidValue {
            name: "max_trials",
            reason: format!("{group} trials must allow at least one attempt"),
        });
    }
    if min > max {
        return Err(ConfigError::TrialRange { group, min, max });
    }
    Ok(())
}

/// Builds [`GeneratorSettings`] from the defaults, validating on [`build`](Self::build).
#[derive(Default)]
pub struct GeneratorSettingsBuilder {
    settings: GeneratorSettings,
}

impl GeneratorSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: SamplingMode) -> Self {
        self.settings.sampling.mode = mode;
        self
    }
    pub fn macrocycle_ring_size(mut self, size: usize) -> Self {
        self.settings.sampling.macrocycle_ring_size = size;
        self
    }
    pub fn max_ring_rotors(mut self, count: usize) -> Self {
        self.settings.sampling.max_ring_rotors = count;
        self
    }
    pub fn max_rotors(mut self, count: usize) -> Self {
        self.settings.sampling.max_rotors = count;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.settings.sampling.seed = seed;
        self
    }
    pub fn stereo_from_3d(mut self, enabled: bool) -> Self {
        self.settings.sampling.stereo_from_3d = enabled;
        self
    }
    pub fn energy_window(mut self, window: f64) -> Self {
        self.settings.pool.energy_window = window;
        self
    }
    pub fn rmsd_threshold(mut self, threshold: f64) -> Self {
        self.settings.pool.rmsd_threshold = threshold;
        self
    }
    pub fn max_conformers(mut self, count: usize) -> Self {
        self.settings.pool.max_conformers = count;
        self
    }
    pub fn max_symmetry_mappings(mut self, count: usize) -> Self {
        self.settings.pool.max_symmetry_mappings = count;
        self
    }
    pub fn refinement(mut self, max_iterations: usize, gradient_tolerance: f64) -> Self {
        self.settings.refinement = RefinementSettings {
            max_iterations,
            gradient_tolerance,
        };
        self
    }
    pub fn fragment_trials(mut self, kind: FragmentKind, trials: TrialSettings) -> Self {
        match kind {
            FragmentKind::RingSystem => self.settings.fragments.ring = trials,
            FragmentKind::Chain => self.settings.fragments.chain = trials,
            FragmentKind::Macrocycle => self.settings.fragments.macrocycle = trials,
        }
        self
    }
    pub fn fragment_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.fragments.timeout = timeout;
        self
    }
    pub fn require_library(mut self, required: bool) -> Self {
        self.settings.fragments.require_library = required;
        self
    }
    pub fn max_candidates(mut self, count: usize) -> Self {
        self.settings.assembly.max_candidates = count;
        self
    }
    pub fn max_stereo_variants(mut self, count: usize) -> Self {
        self.settings.assembly.max_stereo_variants = count;
        self
    }
    pub fn enumerate_nitrogens(mut self, enabled: bool) -> Self {
        self.settings.assembly.enumerate_nitrogens = enabled;
        self
    }
    pub fn use_input_coordinates(mut self, enabled: bool) -> Self {
        self.settings.assembly.use_input_coordinates = enabled;
        self
    }
    pub fn sample_torsion_tolerance(mut self, enabled: bool) -> Self {
        self.settings.assembly.sample_torsion_tolerance = enabled;
        self
    }
    pub fn stochastic_trials(mut self, min_trials: usize, max_trials: usize) -> Self {
        self.settings.stochastic = StochasticSettings {
            min_trials,
            max_trials,
        };
        self
    }
    pub fn forcefield_kind(mut self, kind: ForceFieldKind) -> Self {
        self.settings.forcefield.kind = kind;
        self
    }
    pub fn strict_parameters(mut self, strict: bool) -> Self {
        self.settings.forcefield.strict = strict;
        self
    }
    pub fn forcefield_params_path(mut self, path: Option<PathBuf>) -> Self {
        self.settings.forcefield.params_path = path;
        self
    }
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<GeneratorSettings, ConfigError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = GeneratorSettings::builder().build().unwrap();
        assert_eq!(settings.sampling.mode, SamplingMode::Auto);
        assert_eq!(settings.pool.max_conformers, 200);
        assert_eq!(settings.fragments.macrocycle.max_trials, 500);
        assert_eq!(settings.assembly.max_stereo_variants, 16);
        assert!(settings.timeout.is_none());
    }

    #[test]
    fn builder_rejects_inverted_trial_ranges() {
        let err = GeneratorSettings::builder()
            .stochastic_trials(50, 10)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TrialRange {
                group: "stochastic",
                min: 50,
                max: 10
            }
        );
    }

    #[test]
    fn builder_rejects_non_positive_window() {
        let err = GeneratorSettings::builder()
            .energy_window(0.0)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "energy_window",
                ..
            }
        ));
    }

    #[test]
    fn zero_rmsd_threshold_is_allowed() {
        let settings = GeneratorSettings::builder()
            .rmsd_threshold(0.0)
            .mode(SamplingMode::Stochastic)
            .build()
            .unwrap();
        assert_eq!(settings.pool.rmsd_threshold, 0.0);
    }

    #[test]
    fn sampling_mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<SamplingMode>(), Ok(SamplingMode::Auto));
        assert_eq!(
            "stochastic".parse::<SamplingMode>(),
            Ok(SamplingMode::Stochastic)
        );
        assert!("random".parse::<SamplingMode>().is_err());
        assert_eq!(SamplingMode::Systematic.to_string(), "systematic");
    }

    #[test]
    fn refinement_maps_onto_minimizer_config() {
        let config = RefinementSettings {
            max_iterations: 42,
            gradient_tolerance: 0.2,
        }
        .minimize_config();
        assert_eq!(config.max_steps, 42);
        assert_eq!(config.gradient_threshold, 0.2);
    }
}
