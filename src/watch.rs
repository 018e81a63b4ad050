//! File system watching for incremental builds.
//!
//! ```text
//! notify → Debouncer (timing) → to_deltas (resources, renames) → Builder
//! ```
//!
//! The watcher starts before the initial full build so nothing changed
//! during that build is lost. Renamed directories are expanded into
//! per-file moves, and a removal whose file exists again by the time the
//! batch is processed (an editor's save-by-rename) counts as a change.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, RecvTimeoutError};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::builder::{BuildReport, Builder};
use crate::error::BuildError;
use crate::prefs::PreferenceBackend;
use crate::resource::{ResourceDelta, ResourcePath};
use crate::workspace::FsWorkspace;

/// Quiet period before a batch is built
pub const DEBOUNCE: Duration = Duration::from_millis(300);

/// How often the loop checks for shutdown
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A file system change, before it is mapped onto resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// Rename half or unspecified rename; resolved by looking at the disk
    Touched(PathBuf),
}

/// Map a notify event onto raw changes. Metadata and access events are dropped.
pub fn classify(event: &Event) -> Vec<RawChange> {
    let paths = event.paths.iter().cloned();
    match event.kind {
        EventKind::Create(_) => paths.map(RawChange::Created).collect(),
        EventKind::Remove(_) => paths.map(RawChange::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![RawChange::Renamed {
                from: event.paths[0].clone(),
                to: event.paths[1].clone(),
            }]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(RawChange::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(RawChange::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths.map(RawChange::Touched).collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => paths.map(RawChange::Modified).collect(),
        _ => Vec::new(),
    }
}

/// Collects changes until nothing happened for [`DEBOUNCE`]
#[derive(Debug, Default)]
pub struct Debouncer {
    changes: Vec<RawChange>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn add(&mut self, event: &Event) {
        let changes = classify(event);
        if !changes.is_empty() {
            debug!(kind = ?event.kind, paths = ?event.paths, "raw notify");
            self.push(changes, Instant::now());
        }
    }

    pub fn push(&mut self, changes: Vec<RawChange>, at: Instant) {
        for change in changes {
            if self.changes.last() != Some(&change) {
                self.changes.push(change);
            }
        }
        self.last_event = Some(at);
    }

    /// Take the batch once the quiet period has passed
    pub fn take_if_ready(&mut self, now: Instant) -> Option<Vec<RawChange>> {
        let last = self.last_event?;
        if now.saturating_duration_since(last) < DEBOUNCE || self.changes.is_empty() {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.changes))
    }
}

/// Turn a batch into resource deltas.
///
/// `configured` are the paths with stored settings; removing or renaming a
/// directory affects those below it even though the files are gone. Some
/// backends (inotify) report a rename as its two halves plus the pair; the
/// halves of a pair present in the batch are dropped.
pub fn to_deltas(
    changes: Vec<RawChange>,
    workspace: &FsWorkspace,
    configured: &BTreeSet<ResourcePath>,
) -> Vec<ResourceDelta> {
    let mut renamed_from = HashSet::new();
    let mut renamed_to = HashSet::new();
    for change in &changes {
        if let RawChange::Renamed { from, to } = change {
            renamed_from.insert(from.clone());
            renamed_to.insert(to.clone());
        }
    }
    let changes = changes.into_iter().filter(|change| match change {
        RawChange::Removed(path) => !renamed_from.contains(path),
        RawChange::Created(path) => !renamed_to.contains(path),
        _ => true,
    });

    let mut deltas = Vec::new();
    for change in changes {
        match change {
            RawChange::Created(path) => appeared(&path, workspace, &mut deltas),
            RawChange::Modified(path) => {
                if path.is_file() {
                    if let Some(resource) = workspace.resource_for(&path) {
                        deltas.push(ResourceDelta::changed(resource));
                    }
                }
            }
            RawChange::Removed(path) => vanished(&path, workspace, configured, &mut deltas),
            RawChange::Touched(path) => {
                if path.exists() {
                    appeared(&path, workspace, &mut deltas);
                } else {
                    vanished(&path, workspace, configured, &mut deltas);
                }
            }
            RawChange::Renamed { from, to } => {
                match (workspace.resource_for(&from), workspace.resource_for(&to)) {
                    (Some(old), Some(new)) if !from.exists() => {
                        deltas.push(ResourceDelta::moved(old.clone(), new.clone()));
                        deltas.extend(
                            configured
                                .iter()
                                .filter(|c| c.is_under(&old))
                                .filter_map(|c| {
                                    Some(ResourceDelta::moved(c.clone(), c.rebase(&old, &new)?))
                                }),
                        );
                    }
                    (Some(_), _) => vanished(&from, workspace, configured, &mut deltas),
                    (None, _) => {}
                }
                appeared(&to, workspace, &mut deltas);
            }
        }
    }
    deltas
}

/// A file or directory showed up: every file in it is added
fn appeared(path: &Path, workspace: &FsWorkspace, deltas: &mut Vec<ResourceDelta>) {
    if path.is_dir() {
        let files = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| workspace.resource_for(entry.path()));
        deltas.extend(files.map(ResourceDelta::added));
    } else if let Some(resource) = workspace.resource_for(path) {
        deltas.push(ResourceDelta::added(resource));
    }
}

/// A file or directory went away, unless it is back already
fn vanished(
    path: &Path,
    workspace: &FsWorkspace,
    configured: &BTreeSet<ResourcePath>,
    deltas: &mut Vec<ResourceDelta>,
) {
    let Some(resource) = workspace.resource_for(path) else {
        return;
    };
    if path.is_file() {
        deltas.push(ResourceDelta::changed(resource));
        return;
    }
    deltas.push(ResourceDelta::removed(resource.clone()));
    deltas.extend(
        configured
            .iter()
            .filter(|c| c.is_under(&resource))
            .map(|c| ResourceDelta::removed(c.clone())),
    );
}

/// Watch the workspace root and build every settled batch until `shutdown`
/// is set. Runs a full build first.
pub fn watch<B: PreferenceBackend>(
    builder: &mut Builder<FsWorkspace, B>,
    shutdown: &AtomicBool,
    mut on_report: impl FnMut(&BuildReport),
) -> Result<(), BuildError> {
    let (tx, rx) = unbounded();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    let root = builder.workspace().root().to_path_buf();
    watcher.watch(&root, RecursiveMode::Recursive)?;

    // Events raised during this build queue up in `rx`
    let report = builder.full_build();
    on_report(&report);
    info!(root = %root.display(), "watching for changes");

    let mut debouncer = Debouncer::default();
    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                if !event.paths.iter().all(|p| builder.workspace().is_ignored(p)) {
                    debouncer.add(&event);
                }
            }
            Ok(Err(e)) => warn!(error = %e, "notify error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(changes) = debouncer.take_if_ready(Instant::now()) else {
            continue;
        };
        let configured = builder.prefs().paths();
        let deltas = to_deltas(changes, builder.workspace(), &configured);
        if deltas.is_empty() {
            continue;
        }
        for delta in &deltas {
            debug!(path = %delta.path, kind = ?delta.kind, moved_to = ?delta.moved_to, "delta");
        }
        let report = builder.incremental_build(&deltas);
        on_report(&report);
    }

    info!("stopped watching");
    Ok(())
}
