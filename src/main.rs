//! testcoord - Asynchronous test execution coordinator
//!
//! Resolves tests from a catalog, dispatches them one at a time through an
//! invoker, and correlates the lifecycle events they publish on a run topic
//! back to each execution.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test in a group
//! testcoord run --catalog ./catalog.yaml --group smoke
//!
//! # Run by tag with a shorter per-test timeout, save the JSON report
//! testcoord run --tag fast --timeout 90s --output report.json
//!
//! # Stream lifecycle events as JSON lines
//! testcoord stream --id pkg.login
//!
//! # List what a selection resolves to
//! testcoord discover --namespace core
//!
//! # Write an example configuration file
//! testcoord config init
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

mod bus;
mod catalog;
mod cli;
mod config;
mod coordinator;
mod invoker;
mod models;
mod output;
mod results;
mod utils;

use bus::Topic;
use catalog::{Catalog, HttpCatalog, LocalCatalog};
use cli::Args;
use config::{AppConfig, CatalogSource, EnvConfig};
use coordinator::Coordinator;
use invoker::ProcessInvoker;
use output::{write_report_to_file, OutputFormat, ResultFormatter};
use results::{RunReport, RunStatus};
use utils::logger::{init_logger, parse_level};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.clone())
        .map(PathBuf::from);
    let (mut config, loaded_from) = AppConfig::load_or_default(config_path.as_deref())?;
    config.apply_env(&env)?;

    if let Some(level) = &args.log_level {
        config.output.log_level = level.clone();
    }
    if args.verbose {
        config.output.log_level = "debug".to_string();
    }
    init_logger(parse_level(&config.output.log_level)?)?;

    if let Some(path) = &loaded_from {
        debug!("Loaded configuration from {}", path.display());
    }
    if env.has_any() {
        debug!("Applied {}_* environment overrides", config::ENV_PREFIX);
    }

    match args.command {
        cli::Command::Run(run_args) => run_tests(config, run_args).await,
        cli::Command::Stream(stream_args) => stream_tests(config, stream_args).await,
        cli::Command::Discover(discover_args) => {
            discover_tests(config, discover_args).await?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Config(config_args) => {
            manage_config(config, &env, config_args)?;
            Ok(ExitCode::SUCCESS)
        }
        cli::Command::Env => {
            config::print_env_help();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Fold command line execution flags into the configuration
fn apply_execution_args(config: &mut AppConfig, args: &cli::ExecutionArgs) {
    if let Some(catalog) = &args.catalog {
        config.catalog.source = Some(catalog.clone());
    }
    if let Some(timeout) = args.timeout {
        config.coordinator.test_timeout = timeout;
    }
    if let Some(wait) = args.completion_wait {
        config.coordinator.completion_wait = wait;
    }
    if let Some(drain) = args.drain_timeout {
        config.coordinator.drain_timeout = drain;
    }
}

fn build_catalog(config: &AppConfig) -> Result<Arc<dyn Catalog>> {
    let source = match config.catalog.source() {
        Some(source) => source,
        None => bail!(
            "No catalog configured. Use --catalog, {}_CATALOG or the config file.",
            config::ENV_PREFIX
        ),
    };

    match source {
        CatalogSource::File(path) => {
            let catalog = LocalCatalog::load(&path)?;
            if catalog.is_empty() {
                warn!("Catalog {} has no entries", path.display());
            } else {
                info!("Loaded {} catalog entries from {}", catalog.len(), path.display());
            }
            Ok(Arc::new(catalog))
        }
        CatalogSource::Http(url) => {
            let mut catalog = HttpCatalog::new(&url, config.catalog.request_timeout)?;
            for (key, value) in &config.catalog.headers {
                catalog = catalog.default_header(key, value)?;
            }
            info!("Using catalog registry at {}", url);
            Ok(Arc::new(catalog))
        }
    }
}

fn build_coordinator(config: &AppConfig, workdir: Option<&str>) -> Result<Coordinator> {
    config.validate()?;

    let catalog = build_catalog(config)?;
    let mut invoker = ProcessInvoker::new();
    if let Some(dir) = workdir {
        invoker = invoker.working_dir(dir);
    }
    let topic = Topic::new(config.coordinator.topic.clone());

    Ok(Coordinator::new(
        catalog,
        Arc::new(invoker),
        topic,
        config.coordinator.clone(),
    ))
}

fn exit_code(report: &RunReport) -> ExitCode {
    if report.success && report.status == RunStatus::Passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_tests(mut config: AppConfig, args: cli::RunArgs) -> Result<ExitCode> {
    apply_execution_args(&mut config, &args.execution);
    if let Some(format) = &args.format {
        config.output.format = format.clone();
    }
    if args.no_color {
        config.output.no_color = true;
    }

    let format = config.output_format()?;
    let coordinator = build_coordinator(&config, args.execution.workdir.as_deref())?;
    let criteria = args.selection.criteria();

    info!("Running tests matching {}", criteria);
    let report = coordinator.run(&criteria).await;

    let mut formatter = ResultFormatter::new(format);
    if config.output.no_color {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_report(&report));

    if let Some(output) = &args.output {
        save_report(output, &report)?;
        println!("Report saved to: {output}");
    }

    info!("{}", report.summary());
    Ok(exit_code(&report))
}

/// JSON unless the file extension asks for CSV
fn save_report(output: &str, report: &RunReport) -> Result<()> {
    let is_csv = Path::new(output)
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        write_report_to_file(output, report, OutputFormat::Csv)
    } else {
        report.save(output)
    }
}

async fn stream_tests(mut config: AppConfig, args: cli::StreamArgs) -> Result<ExitCode> {
    apply_execution_args(&mut config, &args.execution);

    let coordinator = build_coordinator(&config, args.execution.workdir.as_deref())?;
    let criteria = args.selection.criteria();

    let report = coordinator
        .run_streaming(&criteria, tokio::io::stdout())
        .await
        .context("Failed to stream run events")?;

    info!("{}", report.summary());
    Ok(exit_code(&report))
}

async fn discover_tests(mut config: AppConfig, args: cli::DiscoverArgs) -> Result<()> {
    if let Some(catalog) = &args.catalog {
        config.catalog.source = Some(catalog.clone());
    }
    if let Some(format) = &args.format {
        config.output.format = format.clone();
    }

    let format = config.output_format()?;
    let coordinator = build_coordinator(&config, None)?;
    let tests = coordinator.discover(&args.selection.criteria()).await?;

    let formatter = ResultFormatter::new(format).no_color();
    println!("{}", formatter.format_tests(&tests));
    Ok(())
}

fn manage_config(config: AppConfig, env: &EnvConfig, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                bail!("Configuration file already exists: {output}. Use --force to overwrite.");
            }

            AppConfig::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: env_only, format } => {
            if env_only {
                env.print_summary();
                return Ok(());
            }

            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }
    }

    Ok(())
}
