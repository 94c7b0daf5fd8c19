//! Per-file synchronization of extracted definitions into the tree.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use super::{NodeChange, NodeId, NodeKind, NodeMetadata, NodeSpec, TestTree};
use crate::autoload::NamespaceResolver;
use crate::error::TreeError;
use crate::extractor::{DefinitionKind, TestDefinition};
use crate::suites::{SuiteDefinition, SuiteRegistry};
use crate::utils::canonical_locator;

/// Read-only project state a file sync resolves against.
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    pub namespaces: &'a NamespaceResolver,
    pub suites: &'a SuiteRegistry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    pub reparented: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl SyncReport {
    fn record(&mut self, id: &NodeId, change: NodeChange) {
        match change {
            NodeChange::Created => self.created.push(id.clone()),
            NodeChange::Updated => self.updated.push(id.clone()),
            NodeChange::Reparented => self.reparented.push(id.clone()),
            NodeChange::Unchanged => {}
        }
    }

    pub fn merge(&mut self, other: SyncReport) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.reparented.extend(other.reparented);
        self.removed.extend(other.removed);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.reparented.is_empty()
            && self.removed.is_empty()
    }
}

struct Scope<'a> {
    suite: Option<&'a SuiteDefinition>,
    suite_id: Option<NodeId>,
}

impl Scope<'_> {
    fn key(&self) -> &str {
        self.suite_id.as_ref().map(NodeId::as_str).unwrap_or_default()
    }

    fn suite_name(&self) -> Option<String> {
        self.suite.map(|suite| suite.name.clone())
    }
}

impl TestTree {
    /// Makes the tree reflect exactly `definitions` for the file at `path`.
    ///
    /// Ids the file contributed before but no longer produces are removed
    /// (with ancestor pruning); everything else is created, refreshed or
    /// reparented. Colliding ids within the file abort the sync before any
    /// mutation.
    pub fn sync_file(
        &mut self,
        context: SyncContext<'_>,
        path: &Path,
        definitions: &[TestDefinition],
    ) -> Result<SyncReport, TreeError> {
        let locator = canonical_locator(path);

        let suite = match context.suites.suite_for(path) {
            Some(suite) => Some(suite),
            None if context.suites.is_empty() => None,
            None => {
                debug!(file = %locator, "file is outside every test suite");
                return Ok(SyncReport {
                    removed: self.remove_file(path),
                    ..Default::default()
                });
            }
        };

        let mut planned = BTreeSet::new();
        let mut plan = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let class_fqn = definition.class_fqn();
            let id = match (&definition.kind, &definition.method_name) {
                (DefinitionKind::Method, Some(method)) => NodeId::method(&locator, &class_fqn, method),
                _ => NodeId::class(&locator, &class_fqn),
            };
            if !planned.insert(id.clone()) {
                return Err(TreeError::duplicate_id(id.as_str(), &locator));
            }
            plan.push((definition, id));
        }

        let mut report = SyncReport::default();
        let scope = Scope {
            suite,
            suite_id: suite
                .map(|suite| self.ensure_suite(suite, &mut report))
                .transpose()?,
        };

        let mut classes: HashMap<String, NodeId> = HashMap::new();
        for (definition, id) in plan {
            let class_fqn = definition.class_fqn();
            match definition.kind {
                DefinitionKind::Class => {
                    let (parent, mapping_prefix) =
                        self.ensure_namespace_chain(context, path, definition.namespace.as_deref(), &scope, &mut report)?;
                    let spec = NodeSpec::new(id.clone(), NodeKind::Class, &definition.class_name, &locator)
                        .with_range(definition.range)
                        .with_tags(definition.groups.iter().cloned())
                        .with_metadata(NodeMetadata {
                            namespace: definition.namespace.clone(),
                            class_fqn: Some(class_fqn.clone()),
                            suite: scope.suite_name(),
                            mapping_prefix,
                            ..Default::default()
                        });
                    let change = self.upsert(spec, parent.as_ref())?;
                    report.record(&id, change);
                    classes.insert(class_fqn, id);
                }
                DefinitionKind::Method => {
                    let Some(class_id) = classes.get(&class_fqn).cloned() else {
                        warn!(file = %locator, method = %definition.qualified_name(), "method without an enclosing class");
                        continue;
                    };
                    let spec = NodeSpec::new(id.clone(), NodeKind::Method, definition.label(), &locator)
                        .with_range(definition.range)
                        .with_tags(definition.groups.iter().cloned())
                        .with_metadata(NodeMetadata {
                            namespace: definition.namespace.clone(),
                            class_fqn: Some(class_fqn),
                            method: definition.method_name.clone(),
                            data_providers: definition.data_providers.clone(),
                            has_data: definition.has_data,
                            depends: definition.depends.clone(),
                            suite: scope.suite_name(),
                            mapping_prefix: None,
                        });
                    let change = self.upsert(spec, Some(&class_id))?;
                    report.record(&id, change);
                }
            }
        }

        let previous = self.index_file(&locator, planned.clone());
        for stale in previous.difference(&planned) {
            if self.contains(stale) {
                report.removed.extend(self.remove(stale));
            }
        }

        debug!(
            file = %locator,
            created = report.created.len(),
            updated = report.updated.len(),
            reparented = report.reparented.len(),
            removed = report.removed.len(),
            "synchronized file"
        );
        Ok(report)
    }

    /// Removes everything a file contributed.
    pub fn remove_file(&mut self, path: &Path) -> Vec<NodeId> {
        let locator = canonical_locator(path);
        let previous = self.index_file(&locator, BTreeSet::new());
        let mut removed = Vec::new();
        for id in previous {
            if self.contains(&id) {
                removed.extend(self.remove(&id));
            }
        }
        removed
    }

    /// Drops suite nodes (and their subtrees) that are not in `keep`.
    pub fn retain_suites(&mut self, keep: &BTreeSet<NodeId>) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .roots
            .iter()
            .filter(|id| id.kind() == Some(NodeKind::Suite) && !keep.contains(*id))
            .cloned()
            .collect();
        stale.iter().flat_map(|id| self.remove(id)).collect()
    }

    fn ensure_suite(&mut self, suite: &SuiteDefinition, report: &mut SyncReport) -> Result<NodeId, TreeError> {
        let configuration = canonical_locator(&suite.configuration);
        let id = NodeId::suite(&configuration, &suite.name);
        let spec = NodeSpec::new(id.clone(), NodeKind::Suite, &suite.name, configuration).with_metadata(NodeMetadata {
            suite: Some(suite.name.clone()),
            ..Default::default()
        });
        let change = self.upsert(spec, None)?;
        report.record(&id, change);
        Ok(id)
    }

    /// Materializes the namespace segments for a class and returns the node
    /// the class should hang under, plus the PSR-4 prefix that applied.
    fn ensure_namespace_chain(
        &mut self,
        context: SyncContext<'_>,
        path: &Path,
        namespace: Option<&str>,
        scope: &Scope<'_>,
        report: &mut SyncReport,
    ) -> Result<(Option<NodeId>, Option<String>), TreeError> {
        let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) else {
            return Ok((scope.suite_id.clone(), None));
        };

        let mapping = context.namespaces.resolve(namespace, path);
        if let Some(mapping) = mapping {
            let expected = mapping.expected_directory(namespace);
            if !expected.as_deref().is_some_and(Path::is_dir) {
                warn!(
                    file = %path.display(),
                    namespace,
                    prefix = %mapping.prefix,
                    expected = ?expected,
                    "namespace has no matching directory under its psr-4 mapping, attaching class to suite root"
                );
                return Ok((scope.suite_id.clone(), Some(mapping.prefix.clone())));
            }
        }

        let mut parent = scope.suite_id.clone();
        let mut qualified = String::new();
        for segment in namespace.split('\\').filter(|s| !s.is_empty()) {
            if !qualified.is_empty() {
                qualified.push('\\');
            }
            qualified.push_str(segment);

            let id = NodeId::namespace(scope.key(), &qualified);
            let spec = NodeSpec::new(id.clone(), NodeKind::Namespace, segment, scope.key()).with_metadata(
                NodeMetadata {
                    namespace: Some(qualified.clone()),
                    suite: scope.suite_name(),
                    ..Default::default()
                },
            );
            let change = self.upsert(spec, parent.as_ref())?;
            report.record(&id, change);
            parent = Some(id);
        }

        Ok((parent, mapping.map(|m| m.prefix.clone())))
    }
}
