//! # Minify Builder
//!
//! Incremental minification of CSS and JavaScript files.
//!
//! Every file can be configured with a strategy (CSS compressor, a
//! conservative JS compressor or a whole-program JS compiler). A build turns
//! `name.ext` into `name.min.ext` for every configured file, either for the
//! whole workspace or for a set of changes.
//!
//! ## Features
//!
//! - Minifiers run on their own thread and stream into the destination
//!   through a bounded pipe
//! - Diagnostics are buffered and become markers after the minifier joined
//! - Settings follow their files across renames and go away with them
//! - All-or-nothing destination writes
//! - Watch mode with debounced file system events
//!
//! ## Usage
//!
//! ```ignore
//! use minify_builder::builder::{BuildOptions, Builder};
//! use minify_builder::prefs::{ConfigStore, TomlPreferences};
//! use minify_builder::workspace::FsWorkspace;
//!
//! let workspace = FsWorkspace::open(&root, &root.join(".minify"), "UTF-8")?;
//! let prefs = ConfigStore::new(TomlPreferences::open(&root.join(".minify/prefs.toml"))?);
//! let report = Builder::new(workspace, prefs, BuildOptions::default()).full_build();
//! ```

/// Bounded blocking pipe between minifier and builder
pub mod bridge;

/// Build orchestration
pub mod builder;

/// CLI configuration and argument parsing
pub mod config;

/// Diagnostics and the buffer they wait in
pub mod diagnostics;

/// Error types for build operations
pub mod error;

/// CSS and JavaScript minifiers
pub mod minifier;

/// Per-file settings store
pub mod prefs;

/// Resource paths and change deltas
pub mod resource;

/// Strategy resolution and options
pub mod strategy;

/// File system watching
pub mod watch;

/// Minifier threads
pub mod worker;

/// Workspace host: files, charsets, derived flags, markers
pub mod workspace;
