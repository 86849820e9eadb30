//! Run orchestration.
//!
//! One run = prepare output folders, build mosaics for tiled sub-folders,
//! then classify, resolve, measure and route every top-level file of the
//! input directory. Failures are collected per file; the configured
//! [`FailurePolicy`] decides whether the run keeps going.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use rayon::prelude::*;

use crate::area::estimate_area;
use crate::classify::{extension_of, Classification, Classifier};
use crate::config::{FailurePolicy, SpotConfig};
use crate::error::{Result, SpotError};
use crate::export::ExportSink;
use crate::identity::{IdentityResolver, MapIdGenerator};
use crate::mosaic::{build_mosaics, planned_mosaics};
use crate::raster::RasterEngine;
use crate::record::{FileKind, FileRecord};
use crate::router::Router;
use crate::tracker::DuplicateTracker;

/// Run-level cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct RunFailure {
    pub path: PathBuf,
    pub error: SpotError,
}

/// What a run did.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Files fully processed, in listing order.
    pub records: Vec<FileRecord>,
    /// Top-level files with an extension nobody handles.
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<RunFailure>,
    /// Mosaic descriptors written before the file pass.
    pub mosaics: Vec<PathBuf>,
    pub cancelled: bool,
    /// Stopped early under [`FailurePolicy::FailFast`].
    pub aborted: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled && !self.aborted
    }

    /// 0 ok, 1 isolated failures, 2 fail-fast abort, 130 cancelled.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            130
        } else if self.aborted {
            2
        } else if !self.failures.is_empty() {
            1
        } else {
            0
        }
    }

    pub fn count(&self, kind: FileKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }
}

enum FileOutcome {
    Done(FileRecord),
    Skipped,
    Failed(SpotError),
    NotRun,
}

pub struct Orchestrator {
    config: SpotConfig,
    engine: Arc<dyn RasterEngine>,
    classifier: Classifier,
    resolver: IdentityResolver,
    tracker: DuplicateTracker,
    router: Router,
    cancel: CancelToken,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(config: SpotConfig, engine: Arc<dyn RasterEngine>, sink: Arc<dyn ExportSink>) -> Self {
        let classifier = Classifier::new(
            Arc::clone(&engine),
            config.extensions.clone(),
            config.exports.mesh.enabled,
        );
        let resolver = IdentityResolver::new(config.naming.clone(), config.storage_dir());
        let router = Router::new(config.exports.clone(), config.working_raster, sink);

        Self {
            config,
            engine,
            classifier,
            resolver,
            tracker: DuplicateTracker::new(),
            router,
            cancel: CancelToken::new(),
            dry_run: false,
        }
    }

    /// Replace the map id generator (deterministic ids in tests).
    pub fn with_generator(mut self, generator: Arc<dyn MapIdGenerator>) -> Self {
        self.resolver = self.resolver.with_generator(generator);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Read and classify only: no folders are cleaned or created and no
    /// mosaics are written. Exports still go to the sink.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SpotConfig {
        &self.config
    }

    pub fn tracker(&self) -> &DuplicateTracker {
        &self.tracker
    }

    /// Clean (if configured) and create the output folder layout.
    pub fn prepare_output(&self) -> Result<()> {
        let output = &self.config.paths.output;
        if self.dry_run {
            info!("dry run: leaving {} untouched", output.display());
            return Ok(());
        }

        if self.config.paths.clean_output && output.exists() {
            info!("removing previous output {}", output.display());
            fs::remove_dir_all(output).map_err(|e| SpotError::io(output, e))?;
        }

        for dir in self.config.output_folders() {
            fs::create_dir_all(&dir).map_err(|e| SpotError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Remove the scratch folder.
    pub fn finish(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }

        let tmp = &self.config.paths.tmp;
        match fs::remove_dir_all(tmp) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SpotError::io(tmp, e)),
        }
    }

    /// Process the input directory.
    ///
    /// Only failures to read the input directory itself are returned as
    /// errors; everything else lands in the report.
    pub fn run(&self) -> Result<RunReport> {
        let input = &self.config.paths.input;
        let mut report = RunReport::default();

        // -----------------------------------------------------------------
        // Mosaics first, so their descriptors are part of the listing.
        // -----------------------------------------------------------------
        if self.dry_run {
            report.mosaics = planned_mosaics(input, &self.config.extensions)?;
            for mosaic in &report.mosaics {
                info!("dry run: would build {}", mosaic.display());
            }
        } else if has_entries(input)? {
            let tmp = &self.config.paths.tmp;
            fs::create_dir_all(tmp).map_err(|e| SpotError::io(tmp, e))?;

            let outcome = build_mosaics(input, tmp, &self.config.extensions, self.engine.as_ref())?;
            report.mosaics = outcome.built;
            for (path, error) in outcome.failures {
                report.failures.push(RunFailure { path, error });
            }

            if !report.failures.is_empty() && self.config.run.failure_policy == FailurePolicy::FailFast {
                error!("mosaic construction failed, aborting run");
                report.aborted = true;
                return Ok(report);
            }
        }

        // -----------------------------------------------------------------
        // Top-level files.
        // -----------------------------------------------------------------
        let files = list_files(input)?;
        info!(
            "{} top-level files in {} ({} engine)",
            files.len(),
            input.display(),
            self.engine.name()
        );

        let outcomes: Vec<(PathBuf, FileOutcome)> = if self.config.run.parallel {
            self.run_parallel(files)
        } else {
            self.run_sequential(files)
        };

        for (path, outcome) in outcomes {
            match outcome {
                FileOutcome::Done(record) => report.records.push(record),
                FileOutcome::Skipped => report.skipped.push(path),
                FileOutcome::Failed(error) => report.failures.push(RunFailure { path, error }),
                FileOutcome::NotRun => {}
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        report.aborted = self.config.run.failure_policy == FailurePolicy::FailFast
            && !report.failures.is_empty();

        Ok(report)
    }

    fn run_sequential(&self, files: Vec<PathBuf>) -> Vec<(PathBuf, FileOutcome)> {
        let total = files.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut stop = false;

        for (i, path) in files.into_iter().enumerate() {
            if stop || self.cancel.is_cancelled() {
                outcomes.push((path, FileOutcome::NotRun));
                continue;
            }

            info!("[{}/{total}] {}", i + 1, path.display());
            let outcome = self.outcome_of(&path);
            if matches!(outcome, FileOutcome::Failed(_)) && self.fail_fast() {
                warn!("stopping after first failure (fail_fast)");
                stop = true;
            }
            outcomes.push((path, outcome));
        }

        outcomes
    }

    fn run_parallel(&self, files: Vec<PathBuf>) -> Vec<(PathBuf, FileOutcome)> {
        let stop = AtomicBool::new(false);

        files
            .into_par_iter()
            .map(|path| {
                if stop.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                    return (path, FileOutcome::NotRun);
                }

                info!("{}", path.display());
                let outcome = self.outcome_of(&path);
                if matches!(outcome, FileOutcome::Failed(_)) && self.fail_fast() {
                    stop.store(true, Ordering::SeqCst);
                }
                (path, outcome)
            })
            .collect()
    }

    fn fail_fast(&self) -> bool {
        self.config.run.failure_policy == FailurePolicy::FailFast
    }

    fn outcome_of(&self, path: &Path) -> FileOutcome {
        match self.process_file(path) {
            Ok(Some(record)) => FileOutcome::Done(record),
            Ok(None) => {
                info!("{}: not a recognized input, skipping", path.display());
                FileOutcome::Skipped
            }
            Err(e) => {
                error!("{}: {e}", path.display());
                FileOutcome::Failed(e)
            }
        }
    }

    /// Classify, resolve, measure and route one file. `None` when skipped.
    pub fn process_file(&self, path: &Path) -> Result<Option<FileRecord>> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = extension_of(path);
        let metadata = &self.config.metadata;

        match self.classifier.classify(path)? {
            Classification::Skipped => Ok(None),

            Classification::Mesh { extension } => {
                let identity = self.resolver.resolve(&file_name, FileKind::Mesh3D, &self.tracker);
                self.create_folder(&identity.output_folder)?;

                let record = FileRecord::new(
                    path.to_path_buf(),
                    extension,
                    FileKind::Mesh3D,
                    identity,
                    None,
                    None,
                    metadata,
                );
                info!("{}: {} -> {}", file_name, record.kind, record.identity.output_name);

                self.router.route(&record, None)?;
                Ok(Some(record))
            }

            Classification::Raster { kind, meta, dataset } => {
                let identity = self.resolver.resolve(&file_name, kind, &self.tracker);
                self.create_folder(&identity.output_folder)?;

                let area = estimate_area(dataset.as_ref(), &meta, self.config.area.coarse_resolution)
                    .map_err(|source| SpotError::Open {
                        path: path.to_path_buf(),
                        source,
                    })?;

                info!(
                    "{}: {kind} -> {} ({area:.4} ha, gsd {} cm)",
                    file_name, identity.output_name, meta.gsd_cm
                );

                let record = FileRecord::new(
                    path.to_path_buf(),
                    extension,
                    kind,
                    identity,
                    Some(meta),
                    Some(area),
                    metadata,
                );

                self.router.route(&record, Some(dataset.as_ref()))?;
                Ok(Some(record))
            }
        }
    }

    fn create_folder(&self, dir: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(|e| SpotError::io(dir, e))
    }
}

fn has_entries(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).map_err(|e| SpotError::io(dir, e))?;
    Ok(entries.next().is_some())
}

/// Regular files directly inside `dir`, sorted.
fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SpotError::io(dir, e))? {
        let path = entry.map_err(|e| SpotError::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
