use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use minify_builder::builder::{BuildReport, Builder, JobStatus};
use minify_builder::config::{parse_resource, Cli, Command, Config, ConfigAction};
use minify_builder::prefs::{ConfigStore, TomlPreferences};
use minify_builder::resource::ResourceDelta;
use minify_builder::watch::watch;
use minify_builder::workspace::{FsWorkspace, PREFS_FILE};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match (quiet, verbose) {
            (true, _) => tracing_subscriber::EnvFilter::new("error"),
            (false, 0) => tracing_subscriber::EnvFilter::new("warn"),
            (false, 1) => tracing_subscriber::EnvFilter::new("info"),
            (false, 2) => tracing_subscriber::EnvFilter::new("debug"),
            (false, _) => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    setup_logging(config.verbose, config.quiet);

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let workspace = FsWorkspace::open(&config.root, &config.state_dir, &config.default_charset)
        .with_context(|| format!("Failed to open workspace {}", config.root.display()))?;
    let prefs = TomlPreferences::open(&config.state_dir.join(PREFS_FILE))
        .context("Failed to load settings")?;
    let mut builder =
        Builder::new(workspace, ConfigStore::new(prefs), config.build).with_shutdown(shutdown.clone());

    match &config.command {
        Command::Build { paths } if paths.is_empty() => {
            let report = full_build(&mut builder, config.verbose > 0);
            print_report(&report, config.quiet);
            Ok(exit_code(&report))
        }
        Command::Build { paths } => {
            let deltas = paths
                .iter()
                .map(|raw| parse_resource(raw).map(ResourceDelta::changed))
                .collect::<Result<Vec<_>>>()?;
            let report = builder.incremental_build(&deltas);
            print_report(&report, config.quiet);
            Ok(exit_code(&report))
        }
        Command::Clean => {
            let removed = builder.clean().context("Failed to clean markers")?;
            if !config.quiet {
                println!("Removed {removed} marker(s)");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch => {
            let quiet = config.quiet;
            watch(&mut builder, &shutdown, |report| print_report(report, quiet))
                .context("Watching failed")?;
            eprintln!("\nWatch stopped");
            Ok(ExitCode::from(130))
        }
        Command::Config { action } => config_command(builder.prefs_mut(), action),
    }
}

fn full_build(builder: &mut Builder<FsWorkspace>, verbose: bool) -> BuildReport {
    if !verbose {
        return builder.full_build();
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let report = builder.full_build_with(|position, total, path| {
        pb.set_length(total as u64);
        pb.set_position(position as u64);
        pb.set_message(path.to_string());
    });
    pb.finish_with_message("Complete");
    report
}

fn print_report(report: &BuildReport, quiet: bool) {
    let stats = report.stats();

    for result in &report.results {
        for diagnostic in &result.diagnostics {
            eprintln!("{diagnostic}");
        }
        let status = match &result.status {
            JobStatus::Built { bytes, extras } if *extras > 0 => {
                format!("{bytes} bytes (+{extras} extra)")
            }
            JobStatus::Built { bytes, .. } => format!("{bytes} bytes"),
            JobStatus::Skipped => "skipped, see diagnostics".to_string(),
            JobStatus::Removed { moved_to: Some(to) } => format!("settings moved to {to}"),
            JobStatus::Removed { moved_to: None } => "settings removed".to_string(),
            JobStatus::Failed(e) => format!("FAILED: {e:#}"),
            JobStatus::Cancelled => "cancelled".to_string(),
        };
        if !quiet || matches!(result.status, JobStatus::Failed(_)) {
            println!("  {}: {}", result.source, status);
        }
    }
    for error in &report.errors {
        eprintln!("Error: {error}");
    }

    if !quiet {
        println!(
            "Built {} file(s), {} skipped, {} failed, {} diagnostic(s) in {:.2}s",
            stats.built,
            stats.skipped,
            stats.failed,
            stats.diagnostics,
            report.duration.as_secs_f64()
        );
    }
}

fn exit_code(report: &BuildReport) -> ExitCode {
    if report.was_cancelled() {
        eprintln!("\nBuild cancelled");
        return ExitCode::from(130);
    }
    if report.has_failure() && !report.has_success() {
        ExitCode::from(2)
    } else if report.has_failure() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn config_command(prefs: &mut ConfigStore, action: &ConfigAction) -> Result<ExitCode> {
    match action {
        ConfigAction::Show { path: Some(raw) } => {
            let path = parse_resource(raw)?;
            match prefs.settings(&path) {
                Some(strategy) => println!("{path}: {strategy}"),
                None => println!("{path}: none"),
            }
            for (option, value) in prefs.entries(&path) {
                println!("  {option} = {value}");
            }
        }
        ConfigAction::Show { path: None } => {
            for path in prefs.paths() {
                match prefs.settings(&path) {
                    Some(strategy) => println!("{path}: {strategy}"),
                    None => println!("{path}: none"),
                }
            }
        }
        ConfigAction::Get { path, option } => {
            let path = parse_resource(path)?;
            match prefs.get_opt(&path, option) {
                Some(value) => println!("{value}"),
                None => return Ok(ExitCode::from(1)),
            }
        }
        ConfigAction::Set(args) => {
            let (path, settings) = args.to_settings()?;
            prefs
                .apply(&path, settings.as_ref())
                .with_context(|| format!("Failed to store settings for {path}"))?;
        }
        ConfigAction::Unset { path } => {
            let path = parse_resource(path)?;
            let removed = prefs
                .remove_all(&path)
                .with_context(|| format!("Failed to remove settings for {path}"))?;
            println!("Removed {removed} option(s)");
        }
    }
    Ok(ExitCode::SUCCESS)
}
