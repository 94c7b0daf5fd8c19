use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::request::RunOptions;
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "phpunit-sync")]
#[command(about = "Discover PHPUnit tests and correlate their results", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (JSON or YAML); defaults to .phpunit-sync.* in the project root
    #[arg(long, value_name = "FILE", global = true)]
    pub settings: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the test tree for one or more project roots
    Discover {
        /// Project root; repeat for several roots
        #[arg(long = "path", value_name = "ROOT", default_value = ".")]
        paths: Vec<PathBuf>,
    },

    /// Print the PHPUnit command line for a run without starting it
    Args {
        #[command(flatten)]
        run: RunArgs,

        /// Assume this PHPUnit version instead of probing for it
        #[arg(long, value_name = "VERSION")]
        phpunit_version: Option<String>,
    },

    /// Run PHPUnit and report per-test results
    Run {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Correlate a captured `--teamcity` log against the discovered tests
    Correlate {
        /// Project root
        #[arg(long, value_name = "ROOT", default_value = ".")]
        path: PathBuf,

        /// Log file produced with `phpunit --teamcity`
        #[arg(value_name = "LOG")]
        log: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Project root; repeat for several roots
    #[arg(long = "path", value_name = "ROOT", default_value = ".")]
    pub paths: Vec<PathBuf>,

    /// Node id to run (see `discover -f json`); runs everything when omitted
    #[arg(long, value_name = "NODE_ID")]
    pub target: Option<String>,

    /// Restrict the run to one test suite
    #[arg(long)]
    pub suite: Option<String>,

    /// Restrict the run to a group. Can be specified multiple times.
    #[arg(long = "group", value_name = "GROUP")]
    pub groups: Vec<String>,

    /// Write a Clover coverage report to this file
    #[arg(long, value_name = "FILE")]
    pub coverage: Option<PathBuf>,

    /// Extra arguments passed to PHPUnit after `--`
    #[arg(last = true)]
    pub extra: Vec<String>,
}

impl RunArgs {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            suite: self.suite.clone(),
            groups: self.groups.clone(),
            coverage: self.coverage.clone(),
            extra_args: self.extra.clone(),
        }
    }

    pub fn target_id(&self) -> Option<NodeId> {
        self.target.as_deref().map(NodeId::from)
    }
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        for root in self.roots() {
            validate_root(root)?;
        }
        if let Command::Correlate { log, .. } = &self.command {
            if !log.is_file() {
                anyhow::bail!("Log file does not exist: {}", log.display());
            }
        }
        if let Some(ref settings) = self.settings {
            if !settings.exists() {
                anyhow::bail!("Settings file does not exist: {}", settings.display());
            }
        }
        Ok(())
    }

    pub fn roots(&self) -> Vec<&Path> {
        match &self.command {
            Command::Discover { paths } => paths.iter().map(PathBuf::as_path).collect(),
            Command::Args { run, .. } | Command::Run { run } => run.paths.iter().map(PathBuf::as_path).collect(),
            Command::Correlate { path, .. } => vec![path.as_path()],
        }
    }

    /// Settings for `root`: the explicit `--settings` file, else the root's own.
    pub fn load_settings(&self, root: &Path) -> Result<Settings> {
        match &self.settings {
            Some(path) => Settings::load(path)
                .with_context(|| format!("Cannot load settings: {}", path.display())),
            None => Settings::discover(root)
                .with_context(|| format!("Cannot load settings for {}", root.display())),
        }
    }
}

pub fn validate_root(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Path does not exist: {}", path.display());
    }
    if !path.is_dir() {
        anyhow::bail!("Project root is not a directory: {}", path.display());
    }
    std::fs::read_dir(path).with_context(|| format!("Cannot read directory: {}", path.display()))?;
    Ok(())
}
