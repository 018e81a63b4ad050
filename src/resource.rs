//! Resource paths, change deltas and source kinds.
//!
//! A [`ResourcePath`] is the single correlation key between preferences,
//! build jobs and diagnostics: project-relative, slash-separated and
//! compared structurally. It is interned as `Arc<str>` so jobs and reports
//! can share it freely across the worker boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Component, Path};
use std::sync::Arc;

/// Project-relative, slash-separated resource identifier (e.g. "web/js/app.js")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(Arc<str>);

impl ResourcePath {
    /// Create a normalized path. Backslashes become slashes, leading "./"
    /// and "/" are dropped. Returns None for empty paths or paths that
    /// escape the project ("..").
    pub fn new(s: &str) -> Option<Self> {
        let normalized = s.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in normalized.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return None;
        }
        Some(Self(Arc::from(segments.join("/"))))
    }

    /// Build from a filesystem path relative to the project root
    pub fn from_relative(path: &Path) -> Option<Self> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Self::new(&segments.join("/"))
    }

    /// Get the inner string reference
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment
    #[inline]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Extension of the last segment, without the dot
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        let dot = name.rfind('.')?;
        if dot == 0 {
            return None;
        }
        Some(&name[dot + 1..])
    }

    /// Minified destination: "dir/name.ext" -> "dir/name.min.ext"
    pub fn minified(&self) -> Option<Self> {
        let ext = self.extension()?;
        let stem = &self.0[..self.0.len() - ext.len() - 1];
        Some(Self(Arc::from(format!("{stem}.min.{ext}"))))
    }

    /// Source map companion of a destination: "name.min.js" -> "name.min.js.map"
    pub fn source_map(&self) -> Self {
        Self(Arc::from(format!("{}.map", self.0)))
    }

    /// True if `self` lies strictly below the directory `prefix`
    pub fn is_under(&self, prefix: &ResourcePath) -> bool {
        self.0.len() > prefix.0.len()
            && self.0.starts_with(prefix.as_str())
            && self.0.as_bytes()[prefix.0.len()] == b'/'
    }

    /// Re-anchor a path from directory `from` to directory `to`
    pub fn rebase(&self, from: &ResourcePath, to: &ResourcePath) -> Option<Self> {
        if !self.is_under(from) {
            return None;
        }
        Self::new(&format!("{}{}", to.as_str(), &self.0[from.0.len()..]))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ResourcePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResourcePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ResourcePath::new(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid resource path '{raw}'")))
    }
}

/// Source file kinds the builder knows how to minify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Css,
    Js,
}

impl SourceKind {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Css => "css",
            SourceKind::Js => "js",
        }
    }

    #[inline]
    pub fn parse(ext: &str) -> Option<Self> {
        match ext {
            "css" => Some(SourceKind::Css),
            "js" => Some(SourceKind::Js),
            _ => None,
        }
    }

    /// Kind of a resource, if it is a minifiable source
    pub fn of(path: &ResourcePath) -> Option<Self> {
        path.extension().and_then(Self::parse)
    }
}

/// What happened to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One entry of an incremental change set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDelta {
    pub path: ResourcePath,
    pub kind: ChangeKind,
    /// Set on removals that are the "from" side of a rename
    pub moved_to: Option<ResourcePath>,
}

impl ResourceDelta {
    pub fn added(path: ResourcePath) -> Self {
        Self {
            path,
            kind: ChangeKind::Added,
            moved_to: None,
        }
    }

    pub fn changed(path: ResourcePath) -> Self {
        Self {
            path,
            kind: ChangeKind::Changed,
            moved_to: None,
        }
    }

    pub fn removed(path: ResourcePath) -> Self {
        Self {
            path,
            kind: ChangeKind::Removed,
            moved_to: None,
        }
    }

    /// A rename: removal of `from` that carries its new location
    pub fn moved(from: ResourcePath, to: ResourcePath) -> Self {
        Self {
            path: from,
            kind: ChangeKind::Removed,
            moved_to: Some(to),
        }
    }

    /// Removals (including move-outs) sort before additions and changes
    #[inline]
    pub fn is_removal(&self) -> bool {
        self.kind == ChangeKind::Removed
    }
}
