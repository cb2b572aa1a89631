pub mod generate;
pub mod library;

use crate::config::RunConfig;
use crate::error::{CliError, Result};
use confgen::core::io::sdf::SdfReader;
use confgen::core::io::traits::{ChainedSource, MoleculeSink, MoleculeSource};
use confgen::engine::control::AbortSignal;
use confgen::engine::progress::ProgressReporter;
use confgen::engine::registry::LibraryRegistry;
use confgen::workflows::batch::{BatchDriver, BatchReport};
use confgen::workflows::tasks::MoleculeTask;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Opens every input file up front so a missing file fails before any work starts.
fn open_inputs(paths: &[PathBuf]) -> Result<ChainedSource> {
    let mut source = ChainedSource::new();
    for path in paths {
        info!("Opening input file {:?}", path);
        source.push(Box::new(SdfReader::open(path)?));
    }
    Ok(source)
}

/// Built-in rules and parameters plus the user's torsion and fragment libraries,
/// applied in order.
fn build_registry(config: &RunConfig) -> Result<LibraryRegistry> {
    let mut registry = LibraryRegistry::from_settings(&config.settings.forcefield)?;
    for file in &config.torsion_libraries {
        registry = registry.add_torsion_file(&file.path, file.composition)?;
    }
    for file in &config.fragment_libraries {
        registry = registry.add_fragment_file(&file.path, file.composition)?;
    }
    Ok(registry)
}

/// Runs a batch on the current runtime thread while Ctrl-C raises the abort signal.
fn run_interruptible<F, T>(
    driver: &BatchDriver,
    source: &mut dyn MoleculeSource,
    sink: &mut dyn MoleculeSink,
    make_task: F,
    reporter: &ProgressReporter,
) -> Result<BatchReport>
where
    F: Fn(&AbortSignal) -> T + Sync,
    T: MoleculeTask,
{
    let signal = driver.abort_signal().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the molecules in progress.");
            signal.raise();
        }
    });

    let report = tokio::task::block_in_place(|| driver.run(source, sink, make_task, reporter));
    interrupt.abort();
    Ok(report?)
}

fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in &report.records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Wrote run report for {} molecule(s) to {:?}", report.records.len(), path);
    Ok(())
}

/// Turns an incomplete batch into a failing exit status.
fn ensure_completed(report: &BatchReport) -> Result<()> {
    if let Some(message) = &report.error {
        return Err(CliError::Stopped(message.clone()));
    }
    if report.aborted {
        return Err(CliError::Interrupted {
            processed: report.processed(),
        });
    }
    Ok(())
}
