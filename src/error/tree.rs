use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("duplicate test id '{id}' in {locator}")]
    DuplicateId { id: String, locator: String },

    #[error("unknown test node: {id}")]
    UnknownNode { id: String },
}

impl TreeError {
    pub fn duplicate_id(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self::DuplicateId {
            id: id.into(),
            locator: locator.into(),
        }
    }

    pub fn unknown_node(id: impl Into<String>) -> Self {
        Self::UnknownNode { id: id.into() }
    }
}
