use clap::{Args, Parser, Subcommand};
use confgen::core::forcefield::oracle::ForceFieldKind;
use confgen::core::torsions::library::Composition;
use confgen::engine::config::SamplingMode;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "confgen - Fragment-based generation of low-energy 3D conformers for small molecules.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of worker threads. 0 processes molecules one by one on the main thread.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate conformer ensembles for every molecule of the input files.
    Generate(GenerateArgs),
    /// Build, merge and inspect fragment libraries.
    Library(LibraryArgs),
}

/// Arguments for the `generate` subcommand.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Input SD files, read in the given order.
    #[arg(short, long, required = true, num_args = 1.., value_name = "PATH")]
    pub input: Vec<PathBuf>,

    /// Output SD file for molecules with conformers.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Write molecules that failed, with their best-known geometry, to this SD file.
    #[arg(long, value_name = "PATH")]
    pub failed: Option<PathBuf>,

    /// Write one CSV line per input molecule with its result code and timing.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Write only the lowest-energy conformer of each molecule.
    #[arg(long)]
    pub best_only: bool,

    /// Save the fragment library, including fragments built during this run.
    #[arg(long, value_name = "PATH")]
    pub save_library: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// Generation settings shared by every command that runs the generator.
#[derive(Args, Debug, Default)]
pub struct TuningArgs {
    /// Path to a configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Sampling Overrides ---
    /// Sampling mode: auto, systematic or stochastic.
    #[arg(short, long, value_name = "MODE")]
    pub mode: Option<SamplingMode>,

    /// Seed for all random choices.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Assign unspecified stereocenters from the input coordinates.
    #[arg(long)]
    pub stereo_from_3d: bool,

    // --- Pooling Overrides ---
    /// Energy window above the best conformer, in kcal/mol.
    #[arg(short = 'e', long, value_name = "FLOAT")]
    pub energy_window: Option<f64>,

    /// Minimum heavy-atom RMSD between output conformers, in Å.
    #[arg(short = 'r', long, value_name = "FLOAT")]
    pub rmsd_threshold: Option<f64>,

    /// Maximum number of conformers per molecule.
    #[arg(short = 'n', long, value_name = "INT")]
    pub max_conformers: Option<usize>,

    /// Per-molecule time limit in seconds.
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    // --- Force Field Overrides ---
    /// Force field terms: full or bonded.
    #[arg(long, value_name = "KIND")]
    pub forcefield: Option<ForceFieldKind>,

    /// Fail molecules with elements that have no force-field parameters.
    #[arg(long)]
    pub strict: bool,

    // --- Library Overrides ---
    /// Additional torsion rule file. Can be used multiple times.
    #[arg(long = "torsion-library", value_name = "PATH")]
    pub torsion_libraries: Vec<PathBuf>,

    /// Whether `--torsion-library` files extend or replace the built-in rules.
    #[arg(long, value_name = "MODE", default_value = "additional")]
    pub torsion_composition: Composition,

    /// Fragment library file to reuse and extend. Can be used multiple times.
    #[arg(short = 'l', long = "fragment-library", value_name = "PATH")]
    pub fragment_libraries: Vec<PathBuf>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S pool.energy-window=5.0
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `library` subcommand.
#[derive(Args, Debug)]
pub struct LibraryArgs {
    #[command(subcommand)]
    pub command: LibraryCommands,
}

/// Available commands for fragment library management.
#[derive(Subcommand, Debug)]
pub enum LibraryCommands {
    /// Fragment the input molecules and store their fragment conformers.
    Build(BuildArgs),
    /// Combine several library files into one.
    Merge {
        /// Library files to merge. The first entry per fragment wins.
        #[arg(required = true, num_args = 1.., value_name = "PATH")]
        inputs: Vec<PathBuf>,
        /// Output library file.
        #[arg(short, long, required = true, value_name = "PATH")]
        output: PathBuf,
        /// Keep at most this many entries, dropping the least used first.
        #[arg(long, value_name = "INT")]
        max_entries: Option<usize>,
    },
    /// Print entry, conformer and occurrence counts of a library file.
    Info {
        #[arg(required = true, value_name = "PATH")]
        path: PathBuf,
    },
}

/// Arguments for `library build`.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Input SD files.
    #[arg(short, long, required = true, num_args = 1.., value_name = "PATH")]
    pub input: Vec<PathBuf>,

    /// Output library file.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Keep at most this many entries, dropping the least used first.
    #[arg(long, value_name = "INT")]
    pub max_entries: Option<usize>,

    #[command(flatten)]
    pub tuning: TuningArgs,
}
