use std::path::Path;

use crate::config::PathMapper;
use crate::tree::NodeId;
use crate::utils::canonical_locator;

const HINT_SCHEME: &str = "php_qn://";
const DATASET_MARKERS: [&str; 2] = [" with data set ", " with data "];

/// Decoded `php_qn://<file>::\<Class>::<method>` location hint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationHint {
    pub file: String,
    pub class_fqn: String,
    pub method: String,
    pub dataset: Option<String>,
}

impl LocationHint {
    /// Parses a hint, falling back to the test name for the dataset suffix
    /// when the hint itself does not carry it.
    pub fn parse(hint: &str, test_name: &str, paths: &PathMapper) -> Option<Self> {
        let rest = hint.strip_prefix(HINT_SCHEME)?;
        let mut parts = rest.splitn(3, "::");
        let file = parts.next().filter(|f| !f.is_empty())?;
        let class = parts.next()?.trim_start_matches('\\');
        let member = parts.next()?;
        if class.is_empty() || member.is_empty() {
            return None;
        }

        let (method, dataset) = match split_dataset(member) {
            (method, Some(dataset)) => (method, Some(dataset)),
            (method, None) => (method, split_dataset(test_name).1),
        };

        Some(Self {
            file: canonical_locator(&paths.to_local(file)),
            class_fqn: class.to_string(),
            method: method.to_string(),
            dataset: dataset.map(str::to_string),
        })
    }

    /// Same id function discovery uses for method nodes.
    pub fn node_id(&self) -> NodeId {
        NodeId::method(&self.file, &self.class_fqn, &self.method)
    }

    pub fn file_path(&self) -> &Path {
        Path::new(&self.file)
    }
}

fn split_dataset(name: &str) -> (&str, Option<&str>) {
    for marker in DATASET_MARKERS {
        if let Some((method, dataset)) = name.split_once(marker) {
            return (method, Some(dataset));
        }
    }
    (name, None)
}
