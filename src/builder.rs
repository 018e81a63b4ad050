//! Build orchestration.
//!
//! Jobs run one at a time on the builder's thread. Each job starts a
//! [`Worker`], stages the worker's pipe into the destination while it is
//! still producing, joins it, commits the destination and only then turns
//! the buffered diagnostics into markers. Nothing but the builder touches
//! the workspace or the preferences.

use std::collections::HashSet;
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::bridge::{self, DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::BuildError;
use crate::prefs::{ConfigStore, PreferenceBackend, TomlPreferences};
use crate::resource::{ResourceDelta, ResourcePath, SourceKind};
use crate::strategy::Strategy;
use crate::worker::{Readiness, Worker, WorkerJob, WorkerOutcome};
use crate::workspace::Workspace;

/// Pipe sizing for every job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Chunks in flight between worker and builder
    pub pipe_capacity: usize,
    pub chunk_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// One source -> destination unit of a build pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub source: ResourcePath,
    pub destination: ResourcePath,
    pub strategy: Strategy,
}

impl BuildJob {
    pub fn new(source: ResourcePath, strategy: Strategy) -> Option<Self> {
        let destination = source.minified()?;
        Some(Self {
            source,
            destination,
            strategy,
        })
    }
}

/// Outcome of one delta or job
#[derive(Debug)]
pub enum JobStatus {
    /// Destination written
    Built { bytes: u64, extras: usize },
    /// Source had errors; destination untouched
    Skipped,
    /// Settings dropped, or moved along with a rename
    Removed { moved_to: Option<ResourcePath> },
    Failed(BuildError),
    Cancelled,
}

#[derive(Debug)]
pub struct JobResult {
    pub source: ResourcePath,
    pub status: JobStatus,
    /// Diagnostics flushed to markers for this job
    pub diagnostics: Vec<Diagnostic>,
    pub duration: Duration,
}

impl JobResult {
    fn new(source: ResourcePath, status: JobStatus, start: Instant) -> Self {
        Self {
            source,
            status,
            diagnostics: Vec::new(),
            duration: start.elapsed(),
        }
    }
}

/// Counters over a [`BuildReport`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub built: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub bytes: u64,
    pub diagnostics: usize,
}

/// Everything one build invocation did
#[derive(Debug, Default)]
pub struct BuildReport {
    pub results: Vec<JobResult>,
    /// Failures not tied to a job (visitation, saving metadata)
    pub errors: Vec<BuildError>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn stats(&self) -> BuildStats {
        let mut stats = BuildStats {
            failed: self.errors.len(),
            ..BuildStats::default()
        };
        for result in &self.results {
            stats.diagnostics += result.diagnostics.len();
            match &result.status {
                JobStatus::Built { bytes, .. } => {
                    stats.built += 1;
                    stats.bytes += bytes;
                }
                JobStatus::Skipped => stats.skipped += 1,
                JobStatus::Removed { .. } => stats.removed += 1,
                JobStatus::Failed(_) => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn has_failure(&self) -> bool {
        self.stats().failed > 0
    }

    pub fn has_success(&self) -> bool {
        let stats = self.stats();
        stats.built + stats.skipped + stats.removed > 0
    }

    pub fn was_cancelled(&self) -> bool {
        self.stats().cancelled > 0
    }
}

enum Executed {
    Built { bytes: u64, extras: usize },
    Skipped,
}

/// The orchestrator: owns the workspace, the settings and the diagnostic buffer
pub struct Builder<W: Workspace, B: PreferenceBackend = TomlPreferences> {
    workspace: W,
    prefs: ConfigStore<B>,
    options: BuildOptions,
    diagnostics: DiagnosticSink,
    shutdown: Arc<AtomicBool>,
}

impl<W: Workspace, B: PreferenceBackend> Builder<W, B> {
    pub fn new(workspace: W, prefs: ConfigStore<B>, options: BuildOptions) -> Self {
        Self {
            workspace,
            prefs,
            options,
            diagnostics: DiagnosticSink::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop between jobs once `shutdown` is set
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut W {
        &mut self.workspace
    }

    pub fn prefs(&self) -> &ConfigStore<B> {
        &self.prefs
    }

    pub fn prefs_mut(&mut self) -> &mut ConfigStore<B> {
        &mut self.prefs
    }

    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Build every configured resource
    pub fn full_build(&mut self) -> BuildReport {
        self.full_build_with(|_, _, _| {})
    }

    /// Build every configured resource, calling `on_visit(position, total, path)`
    /// before each resource is looked at
    pub fn full_build_with(
        &mut self,
        mut on_visit: impl FnMut(usize, usize, &ResourcePath),
    ) -> BuildReport {
        let start = Instant::now();
        let mut report = BuildReport::default();
        let resources = self.workspace.resources();
        let total = resources.len();
        info!(resources = total, "full build");

        for (index, entry) in resources.into_iter().enumerate() {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "visit failed");
                    report.errors.push(e);
                    continue;
                }
            };
            if self.cancelled() {
                report
                    .results
                    .push(JobResult::new(path, JobStatus::Cancelled, Instant::now()));
                break;
            }
            on_visit(index + 1, total, &path);
            if let Some(result) = self.build_resource(&path) {
                report.results.push(result);
            }
        }

        self.finish(report, start)
    }

    /// Process a change set: removals and move-outs first, then additions
    /// and changes. Every event is processed; failures are collected.
    pub fn incremental_build(&mut self, deltas: &[ResourceDelta]) -> BuildReport {
        let start = Instant::now();
        let mut report = BuildReport::default();
        let ordered = order_deltas(deltas);
        info!(events = ordered.len(), "incremental build");

        let mut built = HashSet::new();
        for delta in ordered {
            if self.cancelled() {
                report.results.push(JobResult::new(
                    delta.path.clone(),
                    JobStatus::Cancelled,
                    Instant::now(),
                ));
                break;
            }
            if delta.is_removal() {
                report.results.push(self.forget(delta));
            } else if built.insert(delta.path.clone()) {
                if let Some(result) = self.build_resource(&delta.path) {
                    report.results.push(result);
                }
            }
        }

        self.finish(report, start)
    }

    /// Delete every marker
    pub fn clean(&mut self) -> Result<usize, BuildError> {
        let removed = self.workspace.delete_markers(None);
        self.workspace.save()?;
        info!(markers = removed, "cleaned");
        Ok(removed)
    }

    fn finish(&mut self, mut report: BuildReport, start: Instant) -> BuildReport {
        if let Err(e) = self.workspace.save() {
            report.errors.push(e);
        }
        report.duration = start.elapsed();
        let stats = report.stats();
        info!(
            built = stats.built,
            skipped = stats.skipped,
            failed = stats.failed,
            elapsed_ms = report.duration.as_millis() as u64,
            "build finished"
        );
        report
    }

    /// Migrate or drop the settings of a removed resource
    fn forget(&mut self, delta: &ResourceDelta) -> JobResult {
        let start = Instant::now();
        let path = &delta.path;
        self.workspace.delete_markers(Some(path));

        let migrated = match &delta.moved_to {
            Some(to) => self.prefs.move_all(path, to).map(|n| {
                debug!(from = %path, %to, options = n, "settings moved");
            }),
            None => Ok(()),
        };
        let dropped = match delta.moved_to.as_ref() {
            Some(to) if to == path => migrated,
            _ => migrated.and_then(|()| self.prefs.remove_all(path).map(drop)),
        };
        let status = match dropped {
            Ok(()) => JobStatus::Removed {
                moved_to: delta.moved_to.clone(),
            },
            Err(e) => {
                warn!(%path, error = %e, "failed to update settings");
                JobStatus::Failed(e)
            }
        };
        JobResult::new(path.clone(), status, start)
    }

    /// Build `source` if it exists and is configured
    pub fn build_resource(&mut self, source: &ResourcePath) -> Option<JobResult> {
        SourceKind::of(source)?;
        if !self.workspace.exists(source) {
            return None;
        }
        let Some(strategy) = self.prefs.settings(source) else {
            self.workspace.delete_markers(Some(source));
            return None;
        };
        let job = BuildJob::new(source.clone(), strategy)?;
        Some(self.run_job(&job))
    }

    /// Run one job to completion, diagnostics flushed
    pub fn run_job(&mut self, job: &BuildJob) -> JobResult {
        let start = Instant::now();
        self.workspace.delete_markers(Some(&job.source));
        debug!(source = %job.source, strategy = %job.strategy, "running job");

        let status = match self.execute(job) {
            Ok(Executed::Built { bytes, extras }) => {
                info!(source = %job.source, destination = %job.destination, bytes, "built");
                JobStatus::Built { bytes, extras }
            }
            Ok(Executed::Skipped) => {
                info!(source = %job.source, "skipped, source has errors");
                JobStatus::Skipped
            }
            Err(e) => {
                warn!(source = %job.source, error = %e, "job failed");
                JobStatus::Failed(e)
            }
        };

        let mut result = JobResult::new(job.source.clone(), status, start);
        result.diagnostics = self.flush_diagnostics();
        result
    }

    /// Turn buffered diagnostics into markers. Only called after a join.
    fn flush_diagnostics(&mut self) -> Vec<Diagnostic> {
        let drained = self.diagnostics.drain();
        for diagnostic in &drained {
            debug!(%diagnostic, "marker");
            self.workspace.create_marker(diagnostic.clone());
        }
        drained
    }

    fn execute(&mut self, job: &BuildJob) -> Result<Executed, BuildError> {
        let content = self.workspace.open(&job.source)?;
        let destination_charset = self
            .workspace
            .exists(&job.destination)
            .then(|| self.workspace.charset(&job.destination));
        let worker_job = WorkerJob {
            source: job.source.clone(),
            destination: job.destination.clone(),
            strategy: job.strategy,
            content,
            source_charset: self.workspace.charset(&job.source),
            destination_charset,
        };

        let (writer, mut reader) = bridge::pipe(self.options.pipe_capacity, self.options.chunk_size);
        let worker = Worker::spawn(
            worker_job,
            writer,
            self.diagnostics.reporter(job.source.clone()),
        )?;
        let staged = match worker.ready() {
            Readiness::Ready { .. } => Some(self.workspace.stage(&job.destination, &mut reader)),
            Readiness::Skipped | Readiness::Failed => None,
        };
        // Releases a worker still blocked on a full pipe
        drop(reader);
        let outcome = worker.join();

        let (charset, bytes, extras, staged) = match (outcome, staged) {
            (Err(BuildError::Pipe { .. }), Some(Err(e))) => return Err(e),
            (Err(e), _) => return Err(e),
            (Ok(WorkerOutcome::Skipped), _) => return Ok(Executed::Skipped),
            (Ok(WorkerOutcome::Written { .. }), Some(Err(e))) => return Err(e),
            (Ok(WorkerOutcome::Written { .. }), None) => {
                return Err(BuildError::Pipe {
                    path: job.destination.clone(),
                    source: io::Error::other("output was never collected"),
                })
            }
            (
                Ok(WorkerOutcome::Written {
                    charset,
                    bytes,
                    extras,
                }),
                Some(Ok(staged)),
            ) => (charset, bytes, extras, staged),
        };

        self.workspace.commit(staged)?;
        self.workspace.set_derived(&job.destination, true);
        self.workspace.set_charset(&job.destination, &charset);

        let written = extras.len();
        for extra in extras {
            let mut content = Cursor::new(extra.bytes);
            if self.workspace.exists(&extra.path) {
                self.workspace.set_contents(&extra.path, &mut content)?;
                self.workspace.set_derived(&extra.path, true);
            } else {
                self.workspace.create(&extra.path, &mut content, true)?;
            }
        }

        Ok(Executed::Built {
            bytes,
            extras: written,
        })
    }
}

/// Keep css/js events: moves, then plain removals, then additions and
/// changes, each kind in arrival order. A plain removal of a moved path
/// must not drop the settings before they are moved.
fn order_deltas(deltas: &[ResourceDelta]) -> Vec<&ResourceDelta> {
    let relevant = deltas
        .iter()
        .filter(|d| SourceKind::of(&d.path).is_some());
    let (removals, additions): (Vec<_>, Vec<_>) = relevant.partition(|d| d.is_removal());
    let (mut ordered, plain): (Vec<_>, Vec<_>) =
        removals.into_iter().partition(|d| d.moved_to.is_some());
    ordered.extend(plain);
    ordered.extend(additions);
    ordered
}
