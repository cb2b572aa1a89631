use super::{build_registry, ensure_completed, open_inputs, run_interruptible};
use crate::cli::{BuildArgs, LibraryArgs, LibraryCommands};
use crate::config::PartialRunConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use confgen::core::io::traits::MemorySink;
use confgen::core::library::store::FragmentLibrary;
use confgen::engine::progress::{Progress, ProgressReporter};
use confgen::workflows::batch::BatchDriver;
use confgen::workflows::tasks::LibraryTask;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub async fn run(args: LibraryArgs, threads: Option<usize>) -> Result<()> {
    match args.command {
        LibraryCommands::Build(build_args) => build(build_args, threads),
        LibraryCommands::Merge {
            inputs,
            output,
            max_entries,
        } => merge(&inputs, &output, max_entries),
        LibraryCommands::Info { path } => {
            println!("{}", describe(&path)?);
            Ok(())
        }
    }
}

fn build(args: BuildArgs, threads: Option<usize>) -> Result<()> {
    let config = PartialRunConfig::load(args.tuning.config.as_deref(), &args.tuning.set_values)?
        .merge_with_cli(&args.tuning, threads)?;
    let registry = build_registry(&config)?;
    let library = registry
        .fragments
        .clone()
        .unwrap_or_else(|| Arc::new(FragmentLibrary::new()));
    let registry = registry.with_fragment_library(Arc::clone(&library));
    let preloaded = library.len();

    let mut source = open_inputs(&args.input)?;
    let mut sink = MemorySink::default();
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let driver = BatchDriver::new(config.threads);

    println!("Collecting fragments ({} worker thread(s))...", config.threads);
    reporter.report(Progress::PhaseStart {
        name: "Collecting fragments",
    });
    let report = run_interruptible(
        &driver,
        &mut source,
        &mut sink,
        LibraryTask::factory(config.settings.clone(), registry),
        &reporter,
    )?;
    reporter.report(Progress::PhaseFinish);

    let pruned = match args.max_entries.or(config.max_fragment_entries) {
        Some(max) => library.prune_to(max),
        None => 0,
    };
    library.save_path(&args.output)?;
    info!(
        preloaded,
        entries = library.len(),
        pruned,
        "Fragment library built"
    );
    println!(
        "Processed {} molecule(s) ({} failed); library has {} entries ({} new, {} pruned), written to: {}",
        report.processed(),
        report.failed(),
        library.len(),
        library.len().saturating_sub(preloaded),
        pruned,
        args.output.display()
    );

    ensure_completed(&report)
}

fn merge(inputs: &[PathBuf], output: &Path, max_entries: Option<usize>) -> Result<()> {
    let merged = FragmentLibrary::new();
    for path in inputs {
        let other = FragmentLibrary::new();
        other.load_path(path)?;
        let added = merged.merge(&other);
        info!("Merged {:?}: {} of {} entries were new", path, added, other.len());
    }
    if let Some(max) = max_entries {
        merged.prune_to(max);
    }
    merged.save_path(output)?;
    println!(
        "Merged {} file(s) into {} entries, written to: {}",
        inputs.len(),
        merged.len(),
        output.display()
    );
    Ok(())
}

fn describe(path: &Path) -> Result<String> {
    let library = FragmentLibrary::new();
    library.load_path(path)?;
    let stats = library.stats();
    let most_used = library
        .entries()
        .into_iter()
        .max_by_key(|(fingerprint, entry)| (entry.occurrences(), std::cmp::Reverse(*fingerprint)));

    let mut text = format!(
        "{}\n  entries:      {}\n  conformers:   {}\n  occurrences:  {}\n  topology:     {} bytes",
        path.display(),
        stats.entries,
        stats.conformers,
        stats.occurrences,
        stats.topology_bytes
    );
    if let Some((fingerprint, entry)) = most_used {
        text.push_str(&format!(
            "\n  most used:    {:016x} ({} occurrences, {} conformers)",
            fingerprint,
            entry.occurrences(),
            entry.conformer_count()
        ));
    }
    Ok(text)
}
