use crate::cli::TuningArgs;
use crate::error::{CliError, Result};
use confgen::core::forcefield::oracle::ForceFieldKind;
use confgen::core::torsions::library::Composition;
use confgen::engine::config::{GeneratorSettings, SamplingMode, TrialSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialSamplingConfig {
    mode: Option<SamplingMode>,
    macrocycle_ring_size: Option<usize>,
    max_ring_rotors: Option<usize>,
    max_rotors: Option<usize>,
    seed: Option<u64>,
    stereo_from_3d: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialPoolConfig {
    energy_window: Option<f64>,
    rmsd_threshold: Option<f64>,
    max_conformers: Option<usize>,
    max_symmetry_mappings: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialRefinementConfig {
    max_iterations: Option<usize>,
    gradient_tolerance: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialTrialConfig {
    min_trials: Option<usize>,
    max_trials: Option<usize>,
    energy_window: Option<f64>,
    min_rmsd: Option<f64>,
    max_conformers: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialFragmentsConfig {
    ring: Option<PartialTrialConfig>,
    chain: Option<PartialTrialConfig>,
    macrocycle: Option<PartialTrialConfig>,
    timeout_seconds: Option<f64>,
    require_library: Option<bool>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialAssemblyConfig {
    max_candidates: Option<usize>,
    max_stereo_variants: Option<usize>,
    enumerate_nitrogens: Option<bool>,
    use_input_coordinates: Option<bool>,
    sample_torsion_tolerance: Option<bool>,
    clash_factor: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialStochasticConfig {
    min_trials: Option<usize>,
    max_trials: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialForcefieldConfig {
    kind: Option<ForceFieldKind>,
    strict: Option<bool>,
    params_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialLibraryFile {
    path: PathBuf,
    #[serde(default)]
    composition: Composition,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialLibrariesConfig {
    torsions: Option<Vec<PartialLibraryFile>>,
    fragments: Option<Vec<PartialLibraryFile>>,
    max_fragment_entries: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialRunSection {
    threads: Option<usize>,
    timeout_seconds: Option<f64>,
    multi_conformer: Option<bool>,
}

/// The configuration file as written, every value optional.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    sampling: Option<PartialSamplingConfig>,
    pool: Option<PartialPoolConfig>,
    refinement: Option<PartialRefinementConfig>,
    fragments: Option<PartialFragmentsConfig>,
    assembly: Option<PartialAssemblyConfig>,
    stochastic: Option<PartialStochasticConfig>,
    forcefield: Option<PartialForcefieldConfig>,
    libraries: Option<PartialLibrariesConfig>,
    run: Option<PartialRunSection>,
}

/// A user library file and how it combines with the ones before it.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryFile {
    pub path: PathBuf,
    pub composition: Composition,
}

impl From<PartialLibraryFile> for LibraryFile {
    fn from(p: PartialLibraryFile) -> Self {
        Self {
            path: p.path,
            composition: p.composition,
        }
    }
}

/// Fully resolved settings for one command invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub settings: GeneratorSettings,
    pub threads: usize,
    pub multi_conformer: bool,
    pub torsion_libraries: Vec<LibraryFile>,
    pub fragment_libraries: Vec<LibraryFile>,
    pub max_fragment_entries: Option<usize>,
}

impl PartialRunConfig {
    /// Reads the optional configuration file and applies `-S key=value` overrides.
    ///
    /// Overrides are written into the parsed document before it is checked, so they
    /// accept exactly the keys the file does.
    pub fn load(path: Option<&Path>, set_values: &[String]) -> Result<Self> {
        let mut table = match path {
            Some(path) => {
                debug!("Loading configuration from file: {:?}", path);
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<toml::Table>(&content).map_err(|e| CliError::FileParsing {
                    path: path.to_path_buf(),
                    source: e.into(),
                })?
            }
            None => toml::Table::new(),
        };
        apply_set_values(&mut table, set_values)?;

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| match path {
                Some(path) => CliError::FileParsing {
                    path: path.to_path_buf(),
                    source: e.into(),
                },
                None => CliError::Config(e.to_string()),
            })
    }

    /// Resolves the final settings; command-line flags win over file values, file
    /// values win over built-in defaults.
    pub fn merge_with_cli(self, args: &TuningArgs, threads: Option<usize>) -> Result<RunConfig> {
        let mut settings = GeneratorSettings::default();

        let sampling = self.sampling.unwrap_or_default();
        set(&mut settings.sampling.mode, args.mode.or(sampling.mode));
        set(
            &mut settings.sampling.macrocycle_ring_size,
            sampling.macrocycle_ring_size,
        );
        set(&mut settings.sampling.max_ring_rotors, sampling.max_ring_rotors);
        set(&mut settings.sampling.max_rotors, sampling.max_rotors);
        set(&mut settings.sampling.seed, args.seed.or(sampling.seed));
        set(
            &mut settings.sampling.stereo_from_3d,
            flag(args.stereo_from_3d).or(sampling.stereo_from_3d),
        );

        let pool = self.pool.unwrap_or_default();
        set(
            &mut settings.pool.energy_window,
            args.energy_window.or(pool.energy_window),
        );
        set(
            &mut settings.pool.rmsd_threshold,
            args.rmsd_threshold.or(pool.rmsd_threshold),
        );
        set(
            &mut settings.pool.max_conformers,
            args.max_conformers.or(pool.max_conformers),
        );
        set(
            &mut settings.pool.max_symmetry_mappings,
            pool.max_symmetry_mappings,
        );

        let refinement = self.refinement.unwrap_or_default();
        set(
            &mut settings.refinement.max_iterations,
            refinement.max_iterations,
        );
        set(
            &mut settings.refinement.gradient_tolerance,
            refinement.gradient_tolerance,
        );

        let fragments = self.fragments.unwrap_or_default();
        merge_trials(&mut settings.fragments.ring, fragments.ring);
        merge_trials(&mut settings.fragments.chain, fragments.chain);
        merge_trials(&mut settings.fragments.macrocycle, fragments.macrocycle);
        if let Some(secs) = fragments.timeout_seconds {
            settings.fragments.timeout = Some(seconds("fragments.timeout-seconds", secs)?);
        }
        set(
            &mut settings.fragments.require_library,
            fragments.require_library,
        );

        let assembly = self.assembly.unwrap_or_default();
        set(
            &mut settings.assembly.max_candidates,
            assembly.max_candidates,
        );
        set(
            &mut settings.assembly.max_stereo_variants,
            assembly.max_stereo_variants,
        );
        set(
            &mut settings.assembly.enumerate_nitrogens,
            assembly.enumerate_nitrogens,
        );
        set(
            &mut settings.assembly.use_input_coordinates,
            assembly.use_input_coordinates,
        );
        set(
            &mut settings.assembly.sample_torsion_tolerance,
            assembly.sample_torsion_tolerance,
        );
        set(&mut settings.assembly.clash_factor, assembly.clash_factor);

        let stochastic = self.stochastic.unwrap_or_default();
        set(&mut settings.stochastic.min_trials, stochastic.min_trials);
        set(&mut settings.stochastic.max_trials, stochastic.max_trials);

        let forcefield = self.forcefield.unwrap_or_default();
        set(
            &mut settings.forcefield.kind,
            args.forcefield.or(forcefield.kind),
        );
        set(
            &mut settings.forcefield.strict,
            flag(args.strict).or(forcefield.strict),
        );
        settings.forcefield.params_path = forcefield.params_path;

        let run = self.run.unwrap_or_default();
        settings.timeout = args
            .timeout
            .or(run.timeout_seconds)
            .map(|secs| seconds("timeout", secs))
            .transpose()?;

        settings
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let libraries = self.libraries.unwrap_or_default();
        let mut torsion_libraries: Vec<LibraryFile> = libraries
            .torsions
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect();
        torsion_libraries.extend(args.torsion_libraries.iter().map(|path| LibraryFile {
            path: path.clone(),
            composition: args.torsion_composition,
        }));
        let mut fragment_libraries: Vec<LibraryFile> = libraries
            .fragments
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect();
        fragment_libraries.extend(args.fragment_libraries.iter().map(|path| LibraryFile {
            path: path.clone(),
            composition: Composition::Additional,
        }));

        Ok(RunConfig {
            settings,
            threads: threads.or(run.threads).unwrap_or(0),
            multi_conformer: run.multi_conformer.unwrap_or(true),
            torsion_libraries,
            fragment_libraries,
            max_fragment_entries: libraries.max_fragment_entries,
        })
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// A command-line switch only overrides the file when it is given.
fn flag(given: bool) -> Option<bool> {
    given.then_some(true)
}

fn merge_trials(trials: &mut TrialSettings, partial: Option<PartialTrialConfig>) {
    let Some(p) = partial else {
        return;
    };
    set(&mut trials.min_trials, p.min_trials);
    set(&mut trials.max_trials, p.max_trials);
    set(&mut trials.energy_window, p.energy_window);
    set(&mut trials.min_rmsd, p.min_rmsd);
    set(&mut trials.max_conformers, p.max_conformers);
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    if value <= 0.0 {
        return Err(CliError::Config(format!(
            "`{}` must be positive, got {}",
            name, value
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| CliError::Config(format!("Invalid duration for `{}`: {}", name, e)))
}

/// Writes each `KEY=VALUE` pair into `table`, creating sections along dotted keys.
fn apply_set_values(table: &mut toml::Table, set_values: &[String]) -> Result<()> {
    for kv_pair in set_values {
        let Some((key, raw)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(CliError::Config(format!(
                "Invalid configuration key for --set: '{}'",
                key
            )));
        }

        let (sections, field) = match key.rsplit_once('.') {
            Some((sections, field)) => (Some(sections), field),
            None => (None, key),
        };
        let mut current = &mut *table;
        for section in sections.into_iter().flat_map(|s| s.split('.')) {
            let entry = current
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            current = match entry {
                toml::Value::Table(inner) => inner,
                _ => {
                    return Err(CliError::Config(format!(
                        "'{}' in '{}' is a value, not a section",
                        section, key
                    )));
                }
            };
        }
        current.insert(field.to_string(), parse_value(raw.trim()));
    }
    Ok(())
}

/// Reads a value as TOML, falling back to a bare string (`mode=stochastic`).
fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut parsed| parsed.remove("value"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}
