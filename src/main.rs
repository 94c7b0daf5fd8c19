use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use phpunit_sync_core::cli::{self, Command, OutputFormat, RunArgs};
use phpunit_sync_core::correlator::{Correlator, ExecutionResult, RunSummary, TestStatus};
use phpunit_sync_core::logging::{self, Verbosity};
use phpunit_sync_core::project::{ProjectContext, Workspace};
use phpunit_sync_core::request::RunnerVersion;
use phpunit_sync_core::runner::{CancellationToken, RunOutcome, RunReport};
use phpunit_sync_core::tree::OutlineNode;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let args = cli::Args::parse();
    logging::init(Verbosity::from_flags(args.verbose, args.quiet));
    args.validate().context("Invalid arguments")?;

    match &args.command {
        Command::Discover { paths } => discover(&args, paths),
        Command::Args { run, phpunit_version } => print_arguments(&args, run, phpunit_version.as_deref()),
        Command::Run { run } => run_tests(&args, run),
        Command::Correlate { path, log } => correlate(&args, path, log),
    }
}

fn open_project(args: &cli::Args, root: &Path) -> Result<ProjectContext> {
    let settings = args.load_settings(root)?;
    ProjectContext::open(root, settings).with_context(|| format!("Cannot open project: {}", root.display()))
}

fn open_workspace(args: &cli::Args, roots: &[PathBuf]) -> Result<Workspace> {
    let mut workspace = Workspace::new();
    for root in roots {
        workspace.add(open_project(args, root)?);
    }
    for (root, report) in roots.iter().zip(workspace.discover_all()) {
        report.with_context(|| format!("Discovery failed for {}", root.display()))?;
    }
    Ok(workspace)
}

fn discover(args: &cli::Args, roots: &[PathBuf]) -> Result<ExitCode> {
    let workspace = open_workspace(args, roots)?;

    match args.format {
        OutputFormat::Json => {
            let projects: Vec<_> = workspace
                .projects()
                .iter()
                .map(|project| {
                    json!({
                        "root": project.root(),
                        "tests": project.tree().outline(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
        OutputFormat::Text => {
            for project in workspace.projects() {
                println!("{}", project.root().display());
                for node in project.tree().outline() {
                    print_outline(&node, 1);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// The projects a run covers: the one owning `--target`, else every root.
fn selected_projects<'a>(workspace: &'a mut Workspace, run: &RunArgs) -> Result<Vec<&'a mut ProjectContext>> {
    match run.target_id() {
        Some(id) => {
            let project = workspace
                .project_with_node_mut(&id)
                .with_context(|| format!("No project contains test node {id}"))?;
            Ok(vec![project])
        }
        None => Ok(workspace.projects_mut().iter_mut().collect()),
    }
}
fn print_outline(node: &OutlineNode, depth: usize) {
    let tags = if node.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", node.tags.join(", "))
    };
    println!("{}{} {}{}", "  ".repeat(depth), node.kind, node.label, tags);
    for child in &node.children {
        print_outline(child, depth + 1);
    }
}

fn print_arguments(args: &cli::Args, run: &RunArgs, version: Option<&str>) -> Result<ExitCode> {
    let version = version
        .map(|text| {
            RunnerVersion::parse(&format!("PHPUnit {text}")).with_context(|| format!("Invalid PHPUnit version: {text}"))
        })
        .transpose()?;
    let mut workspace = open_workspace(args, &run.paths)?;

    let mut invocations = Vec::new();
    for project in selected_projects(&mut workspace, run)? {
        let version = match version {
            Some(version) => version,
            None => project.runner_version().context("Cannot determine PHPUnit version")?,
        };
        let argv = project.arguments(run.target_id().as_ref(), &run.options(), version)?;
        invocations.push((project.root().to_path_buf(), argv));
    }

    match args.format {
        OutputFormat::Json => {
            let invocations: Vec<_> = invocations
                .iter()
                .map(|(root, argv)| json!({ "root": root, "args": argv }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&invocations)?);
        }
        OutputFormat::Text => {
            for (_, argv) in &invocations {
                println!("{}", argv.join(" "));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_tests(args: &cli::Args, run: &RunArgs) -> Result<ExitCode> {
    let mut workspace = open_workspace(args, &run.paths)?;
    let cancel = CancellationToken::new();
    let options = run.options();

    let runs: Vec<(PathBuf, phpunit_sync_core::Result<RunReport>)> = match run.target_id() {
        Some(id) => {
            let project = workspace
                .project_with_node_mut(&id)
                .with_context(|| format!("No project contains test node {id}"))?;
            let report = project.run(Some(&id), &options, &cancel);
            vec![(project.root().to_path_buf(), report)]
        }
        None => {
            let reports = workspace.run_all(&options, &cancel);
            workspace
                .projects()
                .iter()
                .map(|project| project.root().to_path_buf())
                .zip(reports)
                .collect()
        }
    };

    let mut success = true;
    let mut reports = Vec::new();
    for (root, report) in runs {
        match report {
            Ok(report) => {
                success &= succeeded(&report.outcome, &report.results);
                reports.push((root, report));
            }
            Err(e) => {
                success = false;
                eprintln!("Run failed for {}: {e}", root.display());
            }
        }
    }

    match args.format {
        OutputFormat::Json => {
            let reports: Vec<_> = reports
                .iter()
                .map(|(root, report)| json!({ "root": root, "report": report }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Text => {
            let several = reports.len() > 1;
            for (root, report) in &reports {
                if several {
                    println!("{}", root.display());
                }
                print_results(&report.results, report.summary.as_ref());
                print_outcome(report);
            }
        }
    }

    Ok(if success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn print_outcome(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed => {}
        RunOutcome::Aborted { message } => eprintln!("Run aborted: {message}"),
        RunOutcome::Cancelled => eprintln!("Run cancelled"),
        RunOutcome::Incomplete { exit_code } => {
            eprintln!("PHPUnit exited without a summary (exit code {exit_code:?})");
            if !report.stderr.is_empty() {
                eprintln!("{}", report.stderr.trim_end());
            }
        }
    }
}

fn correlate(args: &cli::Args, root: &Path, log: &Path) -> Result<ExitCode> {
    let mut project = open_project(args, root)?;
    project.discover()?;

    let bytes = std::fs::read(log).with_context(|| format!("Cannot read log: {}", log.display()))?;
    let mut correlator = Correlator::with_paths(project.path_mapper());
    let mut tree = project.tree().clone();
    tree.begin_run();
    correlator.feed(&bytes, &mut tree);
    correlator.finish(&mut tree);

    let outcome = RunOutcome::of(&correlator, None);
    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "outcome": &outcome,
                "results": correlator.results(),
                "summary": correlator.summary(),
                "fatal": correlator.fatal(),
                "tests": tree.outline(),
            }))?
        ),
        OutputFormat::Text => print_results(correlator.results(), correlator.summary()),
    }

    if let RunOutcome::Incomplete { .. } = outcome {
        eprintln!("Log ended without a summary");
    }
    Ok(exit_code(&outcome, correlator.results()))
}

fn print_results(results: &[ExecutionResult], summary: Option<&RunSummary>) {
    for result in results {
        let dataset = result
            .dataset
            .as_deref()
            .map(|d| format!(" with data set {d}"))
            .unwrap_or_default();
        println!(
            "{:<8} {}{} ({} ms)",
            result.status.as_str().to_uppercase(),
            result.node_id,
            dataset,
            result.duration_ms
        );
        if let Some(message) = &result.message {
            println!("         {message}");
        }
        if let (Some(file), Some(line)) = (&result.file, result.line) {
            println!("         at {file}:{line}");
        }
    }
    if let Some(summary) = summary {
        println!(
            "\nTests: {}, Assertions: {}, Errors: {}, Failures: {}, Skipped: {}, Incomplete: {}",
            summary.tests, summary.assertions, summary.errors, summary.failures, summary.skipped, summary.incomplete
        );
    }
}

fn succeeded(outcome: &RunOutcome, results: &[ExecutionResult]) -> bool {
    let failed = results
        .iter()
        .any(|r| matches!(r.status, TestStatus::Failed | TestStatus::Error));
    !failed && matches!(outcome, RunOutcome::Completed)
}

fn exit_code(outcome: &RunOutcome, results: &[ExecutionResult]) -> ExitCode {
    if succeeded(outcome, results) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
