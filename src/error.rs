use std::path::PathBuf;
use thiserror::Error;

use crate::resource::ResourcePath;

/// Build error types
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Workspace root not found: {path}")]
    RootNotFound { path: PathBuf },

    #[error("No space left on device for {path}")]
    DiskFull { path: PathBuf },

    #[error("Failed to read {path}")]
    SourceRead {
        path: ResourcePath,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}")]
    DestinationWrite {
        path: ResourcePath,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown charset '{label}' for {path}")]
    UnknownCharset { path: ResourcePath, label: String },

    #[error("Preference store {path}: {message}")]
    Preferences { path: PathBuf, message: String },

    #[error("Workspace state {path}: {message}")]
    State { path: PathBuf, message: String },

    #[error("Minifier failed on {path}: {message}")]
    Minify { path: ResourcePath, message: String },

    #[error("Stream to {path} broken")]
    Pipe {
        path: ResourcePath,
        #[source]
        source: std::io::Error,
    },

    #[error("Minifier thread for {path} panicked: {message}")]
    WorkerPanicked { path: ResourcePath, message: String },

    #[error("Failed to visit {path}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("File watcher failed")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Map an I/O failure on a destination, recognising a full disk (ENOSPC).
    pub fn destination(path: &ResourcePath, fs_path: PathBuf, e: std::io::Error) -> Self {
        if e.raw_os_error() == Some(28) {
            return BuildError::DiskFull { path: fs_path };
        }
        BuildError::DestinationWrite {
            path: path.clone(),
            source: e,
        }
    }
}
