//! CLI configuration and runtime settings for the minification builder.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::bridge::{DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE};
use crate::builder::BuildOptions;
use crate::error::BuildError;
use crate::minifier::lookup_charset;
use crate::resource::ResourcePath;
use crate::strategy::{self, OptimizationLevel, Strategy};

/// Incremental CSS and JavaScript minification
#[derive(Parser, Debug)]
#[command(name = "minify-builder")]
#[command(version)]
#[command(about = "Incremental CSS and JavaScript minification")]
pub struct Cli {
    /// Workspace root directory
    #[arg(long, global = true, env = "MINIFY_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Directory for settings and workspace state, relative to the root
    #[arg(long, global = true, env = "MINIFY_STATE_DIR", default_value = ".minify")]
    pub state_dir: PathBuf,

    /// Chunks buffered between a minifier and the destination writer
    #[arg(long, global = true, env = "MINIFY_PIPE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub pipe_capacity: usize,

    /// Size of one buffered chunk in bytes
    #[arg(long, global = true, env = "MINIFY_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Charset of files without an explicit one
    #[arg(long, global = true, env = "MINIFY_DEFAULT_CHARSET", default_value = "UTF-8")]
    pub default_charset: String,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Build every configured file, or only the given ones
    Build {
        /// Project-relative files to rebuild
        paths: Vec<String>,
    },
    /// Remove all markers
    Clean,
    /// Build, then rebuild on every change until Ctrl+C
    Watch,
    /// Read or change per-file settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    /// Show the settings of one file, or of every configured file
    Show { path: Option<String> },
    /// Print one raw option
    Get { path: String, option: String },
    /// Replace the settings of a file
    Set(SetArgs),
    /// Remove every setting of a file
    Unset { path: String },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SetArgs {
    pub path: String,

    /// none, css-compressor, yui or gcc
    pub strategy: String,

    #[arg(long)]
    pub preserve_semicolons: Option<bool>,

    #[arg(long)]
    pub disable_optimizations: Option<bool>,

    /// whitespace-only, simple or advanced
    #[arg(long)]
    pub optimization: Option<String>,

    #[arg(long)]
    pub source_map: Option<bool>,

    #[arg(long)]
    pub embed_sources: Option<bool>,
}

impl SetArgs {
    /// The settings to store. None clears the file's settings.
    pub fn to_settings(&self) -> anyhow::Result<(ResourcePath, Option<Strategy>)> {
        let path = parse_resource(&self.path)?;
        if strategy::canonical_name(&self.strategy) == strategy::NONE {
            return Ok((path, None));
        }
        let Some(ext) = path.extension() else {
            anyhow::bail!("{path} has no extension");
        };
        let Some(resolved) = strategy::resolve(ext, &self.strategy) else {
            anyhow::bail!("Strategy '{}' does not apply to {path}", self.strategy);
        };

        let settings = match resolved {
            Strategy::CssCompress => Strategy::CssCompress,
            Strategy::JsCompress(mut opts) => {
                opts.preserve_semicolons = self.preserve_semicolons.unwrap_or(opts.preserve_semicolons);
                opts.disable_optimizations =
                    self.disable_optimizations.unwrap_or(opts.disable_optimizations);
                Strategy::JsCompress(opts)
            }
            Strategy::Closure(mut opts) => {
                if let Some(raw) = &self.optimization {
                    opts.level = OptimizationLevel::parse(raw)
                        .ok_or_else(|| anyhow::anyhow!("Unknown optimization level '{raw}'"))?;
                }
                opts.source_map = self.source_map.unwrap_or(opts.source_map);
                opts.embed_sources = self.embed_sources.unwrap_or(opts.embed_sources);
                Strategy::Closure(opts)
            }
        };
        Ok((path, Some(settings)))
    }
}

/// Parse a project-relative path given on the command line
pub fn parse_resource(raw: &str) -> anyhow::Result<ResourcePath> {
    ResourcePath::new(raw).ok_or_else(|| anyhow::anyhow!("Invalid project path '{raw}'"))
}

/// Runtime configuration parsed from CLI
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonical workspace root
    pub root: PathBuf,
    /// Absolute state directory
    pub state_dir: PathBuf,
    pub build: BuildOptions,
    pub default_charset: String,
    pub verbose: u8,
    pub quiet: bool,
    pub command: Command,
}

impl Config {
    /// Create Config from CLI arguments
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let root = cli
            .root
            .canonicalize()
            .map_err(|_| BuildError::RootNotFound {
                path: cli.root.clone(),
            })?;
        let state_dir = if cli.state_dir.is_absolute() {
            cli.state_dir
        } else {
            root.join(cli.state_dir)
        };

        if lookup_charset(&cli.default_charset).is_none() {
            anyhow::bail!("Unknown charset '{}'", cli.default_charset);
        }

        Ok(Config {
            root,
            state_dir,
            build: BuildOptions {
                pipe_capacity: cli.pipe_capacity.max(1),
                chunk_size: cli.chunk_size.max(1),
            },
            default_charset: cli.default_charset.trim().to_string(),
            verbose: cli.verbose,
            quiet: cli.quiet,
            command: cli.command,
        })
    }
}
