//! Per-root project state and the multi-root workspace.
//!
//! A [`ProjectContext`] owns everything one project root needs: settings,
//! namespace mappings, suites, the test tree and a parser. Nothing is shared
//! between roots, so a [`Workspace`] can discover its roots concurrently.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

use crate::autoload::{NamespaceResolver, MANIFEST_FILE};
use crate::config::{PathMapper, Settings};
use crate::correlator::Correlator;
use crate::discovery::{discover_test_files, PHP_EXTENSION};
use crate::error::{IoError, Result, RunnerError, TreeError};
use crate::extractor::Extractor;
use crate::request::{ExecutionRequest, RunOptions, RunnerVersion, Target};
use crate::runner::{self, CancellationToken, RunReport};
use crate::suites::{find_configuration, SuiteRegistry};
use crate::tree::{NodeId, SyncContext, SyncReport, TestTree};
use crate::utils::{canonical_locator, is_under, normalize_path};

pub struct ProjectContext {
    root: PathBuf,
    settings: Settings,
    namespaces: NamespaceResolver,
    suites: SuiteRegistry,
    tree: TestTree,
    extractor: Extractor,
    version: Option<RunnerVersion>,
}

impl ProjectContext {
    /// Opens a project root and loads its manifest and configuration.
    /// Test files are not read until [`ProjectContext::discover`].
    pub fn open(root: impl AsRef<Path>, settings: Settings) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(IoError::root_not_found(root).into());
        }
        let root = if root.is_absolute() {
            normalize_path(root)
        } else {
            let cwd = std::env::current_dir().map_err(|e| IoError::read_error(root, e))?;
            normalize_path(&cwd.join(root))
        };

        let mut project = Self {
            root,
            settings,
            namespaces: NamespaceResolver::new(),
            suites: SuiteRegistry::new(),
            tree: TestTree::new(),
            extractor: Extractor::new()?,
            version: None,
        };
        project.namespaces.load_file(&project.manifest_path());
        if let Some(configuration) = project.configuration_path() {
            project.suites.load_file(&configuration);
        }
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    pub fn namespaces(&self) -> &NamespaceResolver {
        &self.namespaces
    }

    pub fn suites(&self) -> &SuiteRegistry {
        &self.suites
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Explicit configuration from settings, else the first conventional
    /// phpunit.xml found in the root.
    pub fn configuration_path(&self) -> Option<PathBuf> {
        self.settings
            .configuration_path(&self.root)
            .or_else(|| find_configuration(&self.root))
    }

    pub fn path_mapper(&self) -> PathMapper {
        self.settings.path_mapper(&self.root)
    }

    /// Full scan: syncs every candidate file and drops files that left scope.
    pub fn discover(&mut self) -> Result<SyncReport> {
        let report = self.rescan()?;
        info!(
            root = %self.root.display(),
            nodes = self.tree.len(),
            files = self.tree.files().count(),
            "discovery complete"
        );
        Ok(report)
    }

    /// Reacts to a created or modified file whose content is already read.
    pub fn on_file_changed(&mut self, path: &Path, content: &str) -> Result<SyncReport> {
        let path = self.absolute(path);
        if path == self.manifest_path() {
            self.namespaces.load(&path, content);
            return self.rescan();
        }
        if self.configuration_path().as_deref() == Some(path.as_path()) {
            self.suites.load(&path, content);
            return self.rescan();
        }
        if !self.is_candidate(&path) {
            debug!(file = %path.display(), "ignoring change outside discovery scope");
            return Ok(self.remove_known(&path));
        }
        Ok(self.sync_source(&path, content)?)
    }

    pub fn on_file_deleted(&mut self, path: &Path) -> Result<SyncReport> {
        let path = self.absolute(path);
        if path == self.manifest_path() {
            self.namespaces.retract(&path);
            return self.rescan();
        }
        if self.suites.configuration() == Some(path.as_path()) {
            self.suites.clear();
            if let Some(configuration) = self.configuration_path() {
                self.suites.load_file(&configuration);
            }
            return self.rescan();
        }
        Ok(self.remove_known(&path))
    }

    /// Re-reads composer.json and re-resolves every file.
    pub fn reload_manifest(&mut self) -> Result<SyncReport> {
        self.namespaces.load_file(&self.manifest_path());
        self.rescan()
    }

    /// Re-reads phpunit.xml; suites that disappeared are dropped with their
    /// subtrees and files are re-assigned to the suites that remain.
    pub fn reload_configuration(&mut self) -> Result<SyncReport> {
        match self.configuration_path() {
            Some(configuration) => {
                self.suites.load_file(&configuration);
            }
            None => self.suites.clear(),
        }
        self.rescan()
    }

    /// Extracts definitions from `content` and syncs them into the tree.
    pub fn sync_source(&mut self, path: &Path, content: &str) -> std::result::Result<SyncReport, TreeError> {
        let definitions = self.extractor.extract(content, path);
        let context = SyncContext {
            namespaces: &self.namespaces,
            suites: &self.suites,
        };
        self.tree.sync_file(context, path, &definitions)
    }

    /// Argument vector for running `target` (or everything).
    pub fn arguments(
        &self,
        target: Option<&NodeId>,
        options: &RunOptions,
        version: RunnerVersion,
    ) -> std::result::Result<Vec<String>, TreeError> {
        let target = target
            .map(|id| {
                self.tree
                    .get(id)
                    .map(|node| Target {
                        node,
                        metadata: self.tree.metadata(id),
                    })
                    .ok_or_else(|| TreeError::unknown_node(id.as_str()))
            })
            .transpose()?;
        let configuration = self.configuration_path();
        let paths = self.path_mapper();

        Ok(ExecutionRequest {
            settings: &self.settings,
            configuration: configuration.as_deref(),
            target,
            options,
            version,
            paths: &paths,
        }
        .arguments())
    }

    /// PHPUnit version, probed once per context.
    pub fn runner_version(&mut self) -> std::result::Result<RunnerVersion, RunnerError> {
        if let Some(version) = self.version {
            return Ok(version);
        }
        let version = runner::probe_version(&self.settings, &self.root)?;
        debug!(%version, "detected runner version");
        self.version = Some(version);
        Ok(version)
    }

    /// Runs `target` and records each result on the tree as it arrives.
    pub fn run(&mut self, target: Option<&NodeId>, options: &RunOptions, cancel: &CancellationToken) -> Result<RunReport> {
        let version = self.runner_version()?;
        let args = self.arguments(target, options, version)?;
        let correlator = Correlator::with_paths(self.path_mapper());

        self.tree.begin_run();
        let report = runner::run(&args, &self.root, correlator, &mut self.tree, cancel)?;
        if let Some(observed) = report.version {
            self.version = Some(observed);
        }
        Ok(report)
    }

    fn rescan(&mut self) -> Result<SyncReport> {
        let candidates = discover_test_files(&self.root, &self.settings.excluded_dirs(), &self.suites)?;
        let mut report = SyncReport::default();

        let suite_ids: BTreeSet<NodeId> = self
            .suites
            .suites()
            .map(|suite| NodeId::suite(&canonical_locator(&suite.configuration), &suite.name))
            .collect();
        report.removed.extend(self.tree.retain_suites(&suite_ids));

        let in_scope: BTreeSet<String> = candidates.iter().map(|path| canonical_locator(path)).collect();
        let departed: Vec<String> = self
            .tree
            .files()
            .filter(|file| !in_scope.contains(*file))
            .map(str::to_string)
            .collect();
        for file in departed {
            report.removed.extend(self.tree.remove_file(Path::new(&file)));
        }

        for path in candidates {
            let content = match read_source(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable file");
                    continue;
                }
            };
            match self.sync_source(&path, &content) {
                Ok(file_report) => report.merge(file_report),
                Err(e) => warn!(file = %path.display(), error = %e, "file not synchronized"),
            }
        }
        Ok(report)
    }

    fn remove_known(&mut self, path: &Path) -> SyncReport {
        SyncReport {
            removed: self.tree.remove_file(path),
            ..SyncReport::default()
        }
    }

    fn is_candidate(&self, path: &Path) -> bool {
        if path.extension().map_or(true, |ext| ext != PHP_EXTENSION) || !is_under(path, &self.root) {
            return false;
        }
        let excluded = self.settings.excluded_dirs();
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let in_excluded = relative.parent().is_some_and(|dir| {
            dir.components().any(|c| {
                let name = c.as_os_str().to_string_lossy();
                name.starts_with('.') || excluded.contains(&name.as_ref())
            })
        });
        !in_excluded && self.suites.includes(path)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        normalize_path(&self.root.join(path))
    }
}

/// Reads a source file, replacing invalid UTF-8.
pub fn read_source(path: &Path) -> std::result::Result<String, IoError> {
    let bytes = fs::read(path).map_err(|e| IoError::read_error(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Independent project roots opened together.
#[derive(Default)]
pub struct Workspace {
    projects: Vec<ProjectContext>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, project: ProjectContext) {
        self.projects.push(project);
    }

    pub fn projects(&self) -> &[ProjectContext] {
        &self.projects
    }

    pub fn projects_mut(&mut self) -> &mut [ProjectContext] {
        &mut self.projects
    }

    /// Discovers every root concurrently; results come back in root order.
    pub fn discover_all(&mut self) -> Vec<Result<SyncReport>> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .projects
                .iter_mut()
                .map(|project| scope.spawn(move || project.discover()))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    /// Runs every root concurrently, one runner and correlator per root, and
    /// waits for all of them. A cancel on `cancel` reaches every run.
    pub fn run_all(&mut self, options: &RunOptions, cancel: &CancellationToken) -> Vec<Result<RunReport>> {
        thread::scope(|scope| {
            let handles: Vec<_> = self
                .projects
                .iter_mut()
                .map(|project| scope.spawn(move || project.run(None, options, cancel)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }

    /// The project whose tree holds `id`.
    pub fn project_with_node_mut(&mut self, id: &NodeId) -> Option<&mut ProjectContext> {
        self.projects.iter_mut().find(|project| project.tree().contains(id))
    }

    /// The project whose root most specifically contains `path`.
    pub fn project_for(&self, path: &Path) -> Option<&ProjectContext> {
        self.projects
            .iter()
            .filter(|project| is_under(path, project.root()))
            .max_by_key(|project| project.root().components().count())
    }

    pub fn project_for_mut(&mut self, path: &Path) -> Option<&mut ProjectContext> {
        self.projects
            .iter_mut()
            .filter(|project| is_under(path, project.root()))
            .max_by_key(|project| project.root().components().count())
    }
}
