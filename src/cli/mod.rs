//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::time::Duration;

use crate::models::SelectionCriteria;

/// Asynchronous test execution coordinator
#[derive(Parser, Debug)]
#[command(name = "testcoord")]
#[command(version)]
#[command(about = "Run catalogued tests and correlate their lifecycle events")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the selected tests and print the report
    Run(RunArgs),

    /// Run the selected tests, streaming events as JSON lines
    Stream(StreamArgs),

    /// List the tests a selection resolves to
    Discover(DiscoverArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Show supported environment variables
    Env,
}

/// Test selection flags
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Exact test id
    #[arg(long)]
    pub id: Option<String>,

    /// Test group
    #[arg(short, long)]
    pub group: Option<String>,

    /// Test namespace
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Required tag (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,
}

impl SelectionArgs {
    pub fn criteria(&self) -> SelectionCriteria {
        SelectionCriteria {
            id: self.id.clone(),
            group: self.group.clone(),
            namespace: self.namespace.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Settings shared by commands that execute tests
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ExecutionArgs {
    /// Catalog file or http(s) registry URL
    #[arg(long)]
    pub catalog: Option<String>,

    /// Per-test timeout (e.g. 90s, 5m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// How long to wait for a completion event after a test is ready
    #[arg(long, value_parser = humantime::parse_duration)]
    pub completion_wait: Option<Duration>,

    /// How long the event listener may take to drain
    #[arg(long, value_parser = humantime::parse_duration)]
    pub drain_timeout: Option<Duration>,

    /// Working directory for test processes
    #[arg(long)]
    pub workdir: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save the JSON report to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for stream command
#[derive(Parser, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// Arguments for discover command
#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Catalog file or http(s) registry URL
    #[arg(long)]
    pub catalog: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Show environment variables only
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = crate::config::DEFAULT_INIT_PATH)]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}
