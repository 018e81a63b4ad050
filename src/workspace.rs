//! The host the builder works against: resources, charsets, derived flags
//! and markers.
//!
//! [`Workspace`] is the only way the builder mutates anything outside its
//! own memory, and it is only ever called from the builder's thread.
//! [`FsWorkspace`] backs it with a directory tree plus a JSON state file
//! for the metadata a plain file system does not carry.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::diagnostics::Diagnostic;
use crate::error::BuildError;
use crate::resource::ResourcePath;

/// Directories never visited by a full build
const IGNORED_DIRECTORIES: &[&str] = &["node_modules", ".git", ".svn", ".hg"];

/// Name of the metadata file inside the state directory
pub const STATE_FILE: &str = "workspace.json";

/// Name of the preference file inside the state directory
pub const PREFS_FILE: &str = "prefs.toml";

/// Resource tree and marker host
pub trait Workspace {
    /// Content written but not yet visible; dropping it discards it
    type Staged;

    /// Visit every resource. Entries that could not be visited are errors.
    fn resources(&self) -> Vec<Result<ResourcePath, BuildError>>;

    fn exists(&self, path: &ResourcePath) -> bool;

    fn open(&self, path: &ResourcePath) -> Result<Box<dyn Read + Send>, BuildError>;

    /// Effective charset (explicit or inherited default)
    fn charset(&self, path: &ResourcePath) -> String;

    fn set_charset(&mut self, path: &ResourcePath, charset: &str);

    fn is_derived(&self, path: &ResourcePath) -> bool;

    fn set_derived(&mut self, path: &ResourcePath, derived: bool);

    /// Copy `content` to a staging area until it ends cleanly
    fn stage(&self, path: &ResourcePath, content: &mut dyn Read) -> Result<Self::Staged, BuildError>;

    /// Make staged content visible at its path, creating or replacing it
    fn commit(&mut self, staged: Self::Staged) -> Result<(), BuildError>;

    /// Create a resource from `content`
    fn create(
        &mut self,
        path: &ResourcePath,
        content: &mut dyn Read,
        derived: bool,
    ) -> Result<(), BuildError> {
        let staged = self.stage(path, content)?;
        self.commit(staged)?;
        self.set_derived(path, derived);
        Ok(())
    }

    /// Replace the content of an existing resource
    fn set_contents(&mut self, path: &ResourcePath, content: &mut dyn Read) -> Result<(), BuildError> {
        let staged = self.stage(path, content)?;
        self.commit(staged)
    }

    /// Delete markers of `path`, or of every resource. Returns how many.
    fn delete_markers(&mut self, path: Option<&ResourcePath>) -> usize;

    fn create_marker(&mut self, diagnostic: Diagnostic);

    /// Markers of `path`, or all markers
    fn markers(&self, path: Option<&ResourcePath>) -> Vec<Diagnostic>;

    /// Persist metadata
    fn save(&mut self) -> Result<(), BuildError>;
}

/// Metadata persisted next to the preferences
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WorkspaceState {
    #[serde(default)]
    charsets: BTreeMap<ResourcePath, String>,
    #[serde(default)]
    derived: BTreeSet<ResourcePath>,
    #[serde(default)]
    markers: Vec<Diagnostic>,
}

/// Destination content staged in a temp file beside its target
#[derive(Debug)]
pub struct StagedFile {
    path: ResourcePath,
    target: PathBuf,
    temp: NamedTempFile,
}

/// Workspace rooted at a directory
#[derive(Debug)]
pub struct FsWorkspace {
    root: PathBuf,
    state_dir: PathBuf,
    default_charset: String,
    state: WorkspaceState,
    dirty: bool,
}

impl FsWorkspace {
    /// Open the workspace at `root`, loading metadata from `state_dir`
    pub fn open(root: &Path, state_dir: &Path, default_charset: &str) -> Result<Self, BuildError> {
        if !root.is_dir() {
            return Err(BuildError::RootNotFound {
                path: root.to_path_buf(),
            });
        }
        let state_file = state_dir.join(STATE_FILE);
        let state = match fs::read_to_string(&state_file) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| BuildError::State {
                path: state_file.clone(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => WorkspaceState::default(),
            Err(e) => {
                return Err(BuildError::State {
                    path: state_file,
                    message: e.to_string(),
                })
            }
        };
        Ok(Self {
            root: root.to_path_buf(),
            state_dir: state_dir.to_path_buf(),
            default_charset: default_charset.to_string(),
            state,
            dirty: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File system location of `path`
    pub fn fs_path(&self, path: &ResourcePath) -> PathBuf {
        self.root.join(path.as_str())
    }

    /// Resource for a file system path under the root, if it is one
    pub fn resource_for(&self, fs_path: &Path) -> Option<ResourcePath> {
        if self.is_ignored(fs_path) {
            return None;
        }
        ResourcePath::from_relative(fs_path.strip_prefix(&self.root).ok()?)
    }

    /// True for paths inside the state directory or an ignored directory
    pub fn is_ignored(&self, fs_path: &Path) -> bool {
        if fs_path.starts_with(&self.state_dir) {
            return true;
        }
        let Ok(relative) = fs_path.strip_prefix(&self.root) else {
            return true;
        };
        relative.components().any(|c| match c {
            std::path::Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| IGNORED_DIRECTORIES.contains(&name)),
            _ => false,
        })
    }

    fn is_ignored_dir(&self, dir: &Path) -> bool {
        dir == self.state_dir
            || dir
                .file_name()
                .and_then(OsStr::to_str)
                .is_some_and(|name| IGNORED_DIRECTORIES.contains(&name))
    }

    fn write_state(&self) -> Result<(), BuildError> {
        let file = self.state_dir.join(STATE_FILE);
        let fail = |message: String| BuildError::State {
            path: file.clone(),
            message,
        };
        fs::create_dir_all(&self.state_dir).map_err(|e| fail(e.to_string()))?;
        let content = serde_json::to_string_pretty(&self.state).map_err(|e| fail(e.to_string()))?;
        let mut staged = NamedTempFile::new_in(&self.state_dir).map_err(|e| fail(e.to_string()))?;
        staged
            .write_all(content.as_bytes())
            .map_err(|e| fail(e.to_string()))?;
        staged.persist(&file).map_err(|e| fail(e.error.to_string()))?;
        Ok(())
    }
}

/// Copy until `content` ends, keeping read and write failures apart
fn copy_stream(
    path: &ResourcePath,
    target: &Path,
    content: &mut dyn Read,
    out: &mut File,
) -> Result<u64, BuildError> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match content.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(BuildError::Pipe {
                    path: path.clone(),
                    source: e,
                })
            }
        };
        out.write_all(&buf[..n])
            .map_err(|e| BuildError::destination(path, target.to_path_buf(), e))?;
        total += n as u64;
    }
    out.flush()
        .map_err(|e| BuildError::destination(path, target.to_path_buf(), e))?;
    Ok(total)
}

impl Workspace for FsWorkspace {
    type Staged = StagedFile;

    fn resources(&self) -> Vec<Result<ResourcePath, BuildError>> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !(entry.file_type().is_dir() && self.is_ignored_dir(entry.path())))
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => self.resource_for(entry.path()).map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(BuildError::Walk {
                    path: e.path().map_or_else(|| self.root.clone(), Path::to_path_buf),
                    source: e,
                })),
            })
            .collect()
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        self.fs_path(path).is_file()
    }

    fn open(&self, path: &ResourcePath) -> Result<Box<dyn Read + Send>, BuildError> {
        let file = File::open(self.fs_path(path)).map_err(|e| BuildError::SourceRead {
            path: path.clone(),
            source: e,
        })?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn charset(&self, path: &ResourcePath) -> String {
        self.state
            .charsets
            .get(path)
            .cloned()
            .unwrap_or_else(|| self.default_charset.clone())
    }

    fn set_charset(&mut self, path: &ResourcePath, charset: &str) {
        if self.state.charsets.get(path).map(String::as_str) != Some(charset) {
            self.state.charsets.insert(path.clone(), charset.to_string());
            self.dirty = true;
        }
    }

    fn is_derived(&self, path: &ResourcePath) -> bool {
        self.state.derived.contains(path)
    }

    fn set_derived(&mut self, path: &ResourcePath, derived: bool) {
        let changed = if derived {
            self.state.derived.insert(path.clone())
        } else {
            self.state.derived.remove(path)
        };
        self.dirty |= changed;
    }

    fn stage(&self, path: &ResourcePath, content: &mut dyn Read) -> Result<StagedFile, BuildError> {
        let target = self.fs_path(path);
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)
            .map_err(|e| BuildError::destination(path, parent.to_path_buf(), e))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".minify-")
            .tempfile_in(parent)
            .map_err(|e| BuildError::destination(path, target.clone(), e))?;
        let bytes = copy_stream(path, &target, content, temp.as_file_mut())?;
        debug!(%path, bytes, "staged");
        Ok(StagedFile {
            path: path.clone(),
            target,
            temp,
        })
    }

    fn commit(&mut self, staged: StagedFile) -> Result<(), BuildError> {
        let StagedFile { path, target, temp } = staged;
        temp.persist(&target)
            .map_err(|e| BuildError::destination(&path, target.clone(), e.error))?;
        Ok(())
    }

    fn delete_markers(&mut self, path: Option<&ResourcePath>) -> usize {
        let before = self.state.markers.len();
        match path {
            Some(path) => self.state.markers.retain(|m| &m.file != path),
            None => self.state.markers.clear(),
        }
        let removed = before - self.state.markers.len();
        self.dirty |= removed > 0;
        removed
    }

    fn create_marker(&mut self, diagnostic: Diagnostic) {
        self.state.markers.push(diagnostic);
        self.dirty = true;
    }

    fn markers(&self, path: Option<&ResourcePath>) -> Vec<Diagnostic> {
        self.state
            .markers
            .iter()
            .filter(|m| path.map_or(true, |p| &m.file == p))
            .cloned()
            .collect()
    }

    fn save(&mut self) -> Result<(), BuildError> {
        if !self.dirty {
            return Ok(());
        }
        if let Err(e) = self.write_state() {
            warn!(error = %e, "failed to save workspace state");
            return Err(e);
        }
        self.dirty = false;
        Ok(())
    }
}
