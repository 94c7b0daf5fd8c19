//! Builds the PHPUnit argument vector for a run.

mod version;

pub use version::RunnerVersion;

use std::path::{Path, PathBuf};

use crate::config::{PathMapper, Settings};
use crate::tree::{NodeKind, NodeMetadata, TestNode};

/// Per-run choices on top of the project settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub suite: Option<String>,
    pub groups: Vec<String>,
    /// Clover XML report to produce alongside the run.
    pub coverage: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

/// The node a run is scoped to.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub node: &'a TestNode,
    pub metadata: Option<&'a NodeMetadata>,
}

/// Everything that decides one invocation's arguments.
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    pub settings: &'a Settings,
    pub configuration: Option<&'a Path>,
    pub target: Option<Target<'a>>,
    pub options: &'a RunOptions,
    pub version: RunnerVersion,
    pub paths: &'a PathMapper,
}

impl ExecutionRequest<'_> {
    /// Ordered argument vector, program first.
    pub fn arguments(&self) -> Vec<String> {
        let settings = self.settings;
        let mut args: Vec<String> = settings.command.clone();

        if !settings.php.is_empty() {
            args.push(settings.php.clone());
            if self.options.coverage.is_some() {
                args.push("-dxdebug.mode=coverage".to_string());
            }
        }
        args.push(settings.phpunit.clone());

        let user_args: Vec<&String> = settings.args.iter().chain(&self.options.extra_args).collect();
        if let Some(configuration) = self.configuration {
            if !names_configuration(&user_args) {
                args.push("--configuration".to_string());
                args.push(self.paths.to_remote(configuration));
            }
        }
        args.extend(user_args.into_iter().cloned());

        let selection = self.selection();
        args.extend(selection.arguments);

        args.push("--teamcity".to_string());
        args.push("--colors=never".to_string());

        if let Some(coverage) = &self.options.coverage {
            args.push("--coverage-clover".to_string());
            args.push(self.paths.to_remote(coverage));
        }

        if let Some(path) = selection.path {
            args.push(self.paths.to_remote(Path::new(&path)));
        }

        args
    }

    fn selection(&self) -> Selection {
        let mut selection = Selection::default();
        // class and method runs are scoped by path instead
        let target_suite = self.target.and_then(|t| match t.node.kind {
            NodeKind::Suite | NodeKind::Namespace => t.metadata.and_then(|m| m.suite.clone()),
            NodeKind::Class | NodeKind::Method => None,
        });
        let suite = self.options.suite.clone().or(target_suite);

        if let Some(target) = self.target {
            match target.node.kind {
                NodeKind::Suite => {}
                NodeKind::Namespace => {
                    if let Some(namespace) = target.metadata.and_then(|m| m.namespace.as_deref()) {
                        selection.filter(namespace_filter(namespace));
                    }
                }
                NodeKind::Class => {
                    selection.path = Some(target.node.locator.clone());
                }
                NodeKind::Method => {
                    let method = target
                        .metadata
                        .and_then(|m| m.method.as_deref())
                        .unwrap_or(&target.node.label);
                    let has_data = target.metadata.is_some_and(|m| m.has_data);
                    selection.filter(method_filter(method, has_data, self.version));
                    selection.path = Some(target.node.locator.clone());
                }
            }
        }

        if let Some(suite) = suite {
            selection.arguments.push("--testsuite".to_string());
            selection.arguments.push(suite);
        }
        if !self.options.groups.is_empty() {
            selection.arguments.push("--group".to_string());
            selection.arguments.push(self.options.groups.join(","));
        }
        selection
    }
}

#[derive(Debug, Default)]
struct Selection {
    arguments: Vec<String>,
    path: Option<String>,
}

impl Selection {
    fn filter(&mut self, pattern: String) {
        self.arguments.push("--filter".to_string());
        self.arguments.push(pattern);
    }
}

fn names_configuration(args: &[&String]) -> bool {
    args.iter().any(|arg| {
        arg.as_str() == "-c" || arg.as_str() == "--configuration" || arg.starts_with("--configuration=")
    })
}

/// `--filter` pattern for one test method.
///
/// Data-driven methods also match their dataset suffixes; PHPUnit 10 names
/// datasets either `with data set #0` / `with data set "name"` or
/// `with data (...)`.
pub fn method_filter(method: &str, has_data: bool, version: RunnerVersion) -> String {
    let method = regex::escape(method);
    match (has_data, version.has_event_system()) {
        (false, _) => format!("^.*::({method})$"),
        (true, false) => format!("^.*::({method})( with data set .*)?$"),
        (true, true) => format!("^.*::({method})( with data set .*| with data \\(.*\\))?$"),
    }
}

/// `--filter` pattern for every test class under a namespace.
pub fn namespace_filter(namespace: &str) -> String {
    let prefix = namespace.trim_matches('\\');
    format!("^{}\\\\", regex::escape(prefix))
}
