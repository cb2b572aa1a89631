use super::tasks::{MoleculeTask, TaskOutcome};
use crate::core::chem::repair::repair;
use crate::core::io::traits::{MoleculeSink, MoleculeSource, OutputStream};
use crate::engine::control::AbortSignal;
use crate::engine::error::{EngineError, ReturnCode};
use crate::engine::progress::{Progress, ProgressReporter};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result of one input record.
#[derive(Debug, Clone, Serialize)]
pub struct MoleculeRecord {
    /// Zero-based position in the concatenated input.
    pub index: usize,
    pub name: String,
    pub code: ReturnCode,
    pub conformers: usize,
    pub elapsed_ms: u64,
    pub message: Option<String>,
}

impl MoleculeRecord {
    pub fn is_success(&self) -> bool {
        self.code.is_success(self.conformers)
    }
}

/// Per-molecule outcomes of a batch, in input order, plus how the batch ended.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub records: Vec<MoleculeRecord>,
    /// The run was cancelled, by the caller or by an unexpected error.
    pub aborted: bool,
    /// The first unexpected error, which stopped the batch.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.records.len()
    }

    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.processed() - self.succeeded()
    }

    pub fn conformers(&self) -> usize {
        self.records.iter().map(|r| r.conformers).sum()
    }

    /// Whether the batch ran to the end of its input.
    pub fn completed(&self) -> bool {
        !self.aborted && self.error.is_none()
    }
}

struct Cursor<'s> {
    source: &'s mut dyn MoleculeSource,
    next: usize,
}

/// State shared by all workers; every lock is held only for bookkeeping.
struct Shared<'s> {
    cursor: Mutex<Cursor<'s>>,
    sink: Mutex<&'s mut dyn MoleculeSink>,
    records: Mutex<Vec<MoleculeRecord>>,
    error: Mutex<Option<String>>,
    signal: AbortSignal,
}

impl Shared<'_> {
    /// Records the first unexpected error and stops every worker.
    fn fail(&self, message: String) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            error!(error = %message, "Stopping the batch after an unexpected error");
            *slot = Some(message);
        }
        self.signal.raise();
    }
}

/// Feeds molecules from a source through per-worker tasks into a sink.
///
/// With `threads == 0` everything runs on the calling thread; otherwise a dedicated
/// rayon pool of that many workers is used. Output order follows completion order.
#[derive(Debug, Clone, Default)]
pub struct BatchDriver {
    threads: usize,
    signal: AbortSignal,
}

impl BatchDriver {
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            signal: AbortSignal::new(),
        }
    }

    /// The flag that cancels the batch; hand it to signal handlers.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Processes every record of `source`.
    ///
    /// # Arguments
    ///
    /// * `source` - Input records, read one at a time under a lock.
    /// * `sink` - Receives succeeded molecules and, repaired, failed ones.
    /// * `make_task` - Builds one task per worker, given the batch's abort signal.
    /// * `reporter` - Receives one increment per finished record.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ThreadPool`] if the worker threads cannot be started.
    /// Molecule failures never surface here; they are in the report.
    #[instrument(skip_all, name = "batch", fields(threads = self.threads))]
    pub fn run<F, T>(
        &self,
        source: &mut dyn MoleculeSource,
        sink: &mut dyn MoleculeSink,
        make_task: F,
        reporter: &ProgressReporter,
    ) -> Result<BatchReport, BatchError>
    where
        F: Fn(&AbortSignal) -> T + Sync,
        T: MoleculeTask,
    {
        let started = Instant::now();
        let shared = Shared {
            cursor: Mutex::new(Cursor { source, next: 0 }),
            sink: Mutex::new(sink),
            records: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            signal: self.signal.clone(),
        };

        // === Phase 1: Workers ===
        reporter.report(Progress::TaskStart { total_steps: None });
        if self.threads == 0 {
            let mut task = make_task(&shared.signal);
            work(&mut task, &shared, reporter);
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(|i| format!("confgen-worker-{i}"))
                .build()?;
            pool.scope(|scope| {
                for _ in 0..self.threads {
                    scope.spawn(|_| {
                        let mut task = make_task(&shared.signal);
                        work(&mut task, &shared, reporter);
                    });
                }
            });
        }
        reporter.report(Progress::TaskFinish);

        // === Phase 2: Flush and report ===
        if let Err(e) = shared.sink.lock().flush() {
            shared.fail(format!("failed to flush output: {e}"));
        }
        let mut records = shared.records.into_inner();
        records.sort_by_key(|r| r.index);
        let report = BatchReport {
            records,
            aborted: self.signal.is_raised(),
            error: shared.error.into_inner(),
            elapsed: started.elapsed(),
        };
        info!(
            processed = report.processed(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            conformers = report.conformers(),
            aborted = report.aborted,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
        Ok(report)
    }
}

fn work<T: MoleculeTask>(task: &mut T, shared: &Shared<'_>, reporter: &ProgressReporter) {
    loop {
        if shared.signal.is_raised() {
            break;
        }
        let (index, record) = {
            let mut cursor = shared.cursor.lock();
            let Some(record) = cursor.source.next_molecule() else {
                break;
            };
            let index = cursor.next;
            cursor.next += 1;
            (index, record)
        };

        let started = Instant::now();
        let molecule = match record {
            Ok(molecule) => molecule,
            Err(e) => {
                warn!(index, error = %e, "Skipping unreadable input record");
                shared.records.lock().push(MoleculeRecord {
                    index,
                    name: String::new(),
                    code: ReturnCode::ConfGenFailed,
                    conformers: 0,
                    elapsed_ms: 0,
                    message: Some(format!("unreadable record: {e}")),
                });
                reporter.report(Progress::TaskIncrement);
                continue;
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| task.process(&molecule)))
            .unwrap_or_else(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                TaskOutcome::failed(EngineError::Internal(format!("worker panicked: {detail}")))
            });
        if let Some(e) = outcome.error.as_ref().filter(|e| e.is_unexpected()) {
            shared.fail(format!("molecule {index} ('{}'): {e}", molecule.name));
        }
        if outcome.code == ReturnCode::Aborted {
            shared.signal.raise();
        }

        if task.writes_output() && outcome.code != ReturnCode::Aborted {
            let written = if outcome.is_success() {
                shared
                    .sink
                    .lock()
                    .write(&molecule, &outcome.conformers, OutputStream::Succeeded)
            } else {
                let mut repaired = molecule.clone();
                let summary = repair(&mut repaired);
                debug!(index, ?summary, "Repaired failed molecule for output");
                shared.sink.lock().write(&repaired, &[], OutputStream::Failed)
            };
            if let Err(e) = written {
                shared.fail(format!("failed to write molecule {index}: {e}"));
            }
        }

        shared.records.lock().push(MoleculeRecord {
            index,
            name: molecule.name.clone(),
            code: outcome.code,
            conformers: outcome.conformers.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            message: outcome.error.as_ref().map(ToString::to_string),
        });
        reporter.report(Progress::TaskIncrement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::sdf::SdfError;
    use crate::core::io::traits::{MemorySink, MemorySource};
    use crate::core::models::conformer::Conformer;
    use crate::core::models::molecule::Molecule;
    use crate::engine::config::GeneratorSettings;
    use crate::engine::registry::LibraryRegistry;
    use crate::workflows::tasks::{ConformerTask, LibraryTask};
    use nalgebra::Point3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds for names starting with "ok", fails otherwise, panics on "panic".
    struct Scripted;

    impl MoleculeTask for Scripted {
        fn process(&mut self, molecule: &Molecule) -> TaskOutcome {
            match molecule.name.as_str() {
                "panic" => panic!("scripted panic"),
                name if name.starts_with("ok") => TaskOutcome {
                    code: ReturnCode::Success,
                    conformers: vec![Conformer::new(vec![Point3::origin()], 1.0)],
                    error: None,
                },
                _ => TaskOutcome::failed(EngineError::Generation("scripted failure".into())),
            }
        }
    }

    fn molecules(names: &[&str]) -> MemorySource {
        MemorySource::from(names.iter().map(|n| Molecule::new(*n)).collect::<Vec<_>>())
    }

    struct BrokenRecord {
        served: bool,
    }

    impl MoleculeSource for BrokenRecord {
        fn next_molecule(&mut self) -> Option<Result<Molecule, SdfError>> {
            if self.served {
                return None;
            }
            self.served = true;
            Some(Err(SdfError::Parse {
                line: 3,
                details: "bad counts line".into(),
            }))
        }
    }

    #[test]
    fn records_are_routed_by_outcome() {
        let mut source = molecules(&["ok-1", "bad", "ok-2"]);
        let mut sink = MemorySink::default();
        let report = BatchDriver::new(0)
            .run(&mut source, &mut sink, |_| Scripted, &ProgressReporter::new())
            .unwrap();
        assert!(report.completed());
        assert_eq!(report.processed(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.conformers(), 2);
        assert_eq!(report.records[1].code, ReturnCode::ConfGenFailed);
        assert!(report.records[1].message.as_ref().unwrap().contains("scripted failure"));
        assert_eq!(sink.succeeded().count(), 2);
        let failed: Vec<_> = sink.failed().collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].molecule.properties.contains_key("confgen.components"));
    }

    #[test]
    fn panics_stop_the_batch() {
        let mut source = molecules(&["ok-1", "panic", "ok-2", "ok-3"]);
        let mut sink = MemorySink::default();
        let report = BatchDriver::new(0)
            .run(&mut source, &mut sink, |_| Scripted, &ProgressReporter::new())
            .unwrap();
        assert!(report.aborted);
        assert!(report.error.as_ref().unwrap().contains("scripted panic"));
        assert_eq!(report.processed(), 2);
        assert_eq!(report.records[1].code, ReturnCode::ConfGenFailed);
    }

    #[test]
    fn raised_signal_prevents_any_work() {
        let driver = BatchDriver::new(2);
        driver.abort_signal().raise();
        let mut source = molecules(&["ok-1", "ok-2"]);
        let mut sink = MemorySink::default();
        let report = driver
            .run(&mut source, &mut sink, |_| Scripted, &ProgressReporter::new())
            .unwrap();
        assert!(report.aborted);
        assert_eq!(report.processed(), 0);
        assert!(sink.records.is_empty());
    }

    #[test]
    fn unreadable_records_are_reported_and_skipped() {
        let mut source = BrokenRecord { served: false };
        let mut sink = MemorySink::default();
        let report = BatchDriver::new(0)
            .run(&mut source, &mut sink, |_| Scripted, &ProgressReporter::new())
            .unwrap();
        assert!(report.completed());
        assert_eq!(report.failed(), 1);
        assert!(report.records[0].message.as_ref().unwrap().contains("unreadable"));
    }

    #[test]
    fn workers_share_the_input_and_report_progress() {
        let names: Vec<String> = (0..40).map(|i| format!("ok-{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut source = molecules(&refs);
        let mut sink = MemorySink::default();
        let increments = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if matches!(event, Progress::TaskIncrement) {
                increments.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let report = BatchDriver::new(4)
            .run(&mut source, &mut sink, |_| Scripted, &reporter)
            .unwrap();
        assert_eq!(report.processed(), 40);
        assert_eq!(increments.load(Ordering::SeqCst), 40);
        let indices: Vec<usize> = report.records.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..40).collect::<Vec<_>>());
        assert_eq!(sink.succeeded().count(), 40);
    }

    fn butane() -> Molecule {
        use crate::core::models::atom::Atom;
        use crate::core::models::element::Element;
        use crate::core::models::topology::BondOrder;
        let mut mol = Molecule::new("butane");
        for h in [3, 2, 2, 3] {
            let c = mol.add_atom(Atom::new(Element::C, Point3::origin()));
            mol.atom_mut(c).implicit_hydrogens = h;
        }
        for i in 0..3 {
            mol.add_bond(i, i + 1, BondOrder::Single).unwrap();
        }
        mol
    }

    #[test]
    fn conformer_and_library_tasks_share_one_library() {
        let registry = LibraryRegistry::builtin().unwrap();
        let settings = GeneratorSettings::default();

        let mut source = MemorySource::from(vec![butane(), butane()]);
        let mut sink = MemorySink::default();
        let report = BatchDriver::new(2)
            .run(
                &mut source,
                &mut sink,
                LibraryTask::factory(settings.clone(), registry.clone()),
                &ProgressReporter::new(),
            )
            .unwrap();
        assert_eq!(report.succeeded(), 2);
        assert!(sink.records.is_empty());
        let library = registry.fragments.as_ref().unwrap();
        assert_eq!(library.len(), 1);

        let mut source = MemorySource::from(vec![butane()]);
        let report = BatchDriver::new(0)
            .run(
                &mut source,
                &mut sink,
                ConformerTask::factory(settings, registry.clone()),
                &ProgressReporter::new(),
            )
            .unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(library.len(), 1);
        let written: Vec<_> = sink.succeeded().collect();
        assert_eq!(written.len(), 1);
        assert!(!written[0].conformers.is_empty());
    }
}
