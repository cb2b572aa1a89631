use super::{build_registry, ensure_completed, open_inputs, run_interruptible, write_report};
use crate::cli::GenerateArgs;
use crate::config::PartialRunConfig;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use confgen::core::io::sdf::SdfWriter;
use confgen::core::io::traits::{MoleculeSink, StreamRouter};
use confgen::engine::progress::{Progress, ProgressReporter};
use confgen::workflows::batch::BatchDriver;
use confgen::workflows::tasks::ConformerTask;
use tracing::{debug, info, warn};

pub async fn run(args: GenerateArgs, threads: Option<usize>) -> Result<()> {
    let partial_config =
        PartialRunConfig::load(args.tuning.config.as_deref(), &args.tuning.set_values)?;
    info!("Merging configuration from file and CLI arguments...");
    let config = partial_config.merge_with_cli(&args.tuning, threads)?;
    debug!("Resolved settings: {:?}", config.settings);

    let registry = build_registry(&config)?;
    let mut source = open_inputs(&args.input)?;

    let multi_conformer = config.multi_conformer && !args.best_only;
    let succeeded = SdfWriter::create(&args.output, multi_conformer)?;
    let failed: Option<Box<dyn MoleculeSink>> = match &args.failed {
        Some(path) => Some(Box::new(SdfWriter::create(path, false)?)),
        None => None,
    };
    let mut sink = StreamRouter::new(Box::new(succeeded), failed);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let driver = BatchDriver::new(config.threads);

    println!(
        "Generating conformers ({} mode, {} worker thread(s))...",
        config.settings.sampling.mode, config.threads
    );
    reporter.report(Progress::PhaseStart {
        name: "Generating conformers",
    });
    let report = run_interruptible(
        &driver,
        &mut source,
        &mut sink,
        ConformerTask::factory(config.settings.clone(), registry.clone()),
        &reporter,
    )?;
    reporter.report(Progress::PhaseFinish);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    if let (Some(path), Some(library)) = (&args.save_library, &registry.fragments) {
        if let Some(max) = config.max_fragment_entries {
            library.prune_to(max);
        }
        library.save_path(path)?;
        println!(
            "Fragment library with {} entries written to: {}",
            library.len(),
            path.display()
        );
    }

    for record in report.records.iter().filter(|r| !r.is_success()) {
        warn!(
            index = record.index,
            name = %record.name,
            code = %record.code,
            "No conformers written: {}",
            record.message.as_deref().unwrap_or("no details")
        );
    }
    println!(
        "Processed {} molecule(s) in {:.1}s: {} succeeded, {} failed, {} conformer(s) written to {}",
        report.processed(),
        report.elapsed.as_secs_f64(),
        report.succeeded(),
        report.failed(),
        report.conformers(),
        args.output.display()
    );

    ensure_completed(&report)
}
