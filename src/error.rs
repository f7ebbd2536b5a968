use super::types::{CategoryId, StateId};

/// Outcome of a rejected or failed lifecycle operation.
#[derive(thiserror::Error, Debug)]
pub enum TransitionError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("target state {0} does not exist")]
    InvalidTarget(StateId),
    #[error("state '{target}' is not legal for category '{category}'. Legal states: [{}]", .legal.join(", "))]
    CategoryMismatch {
        category: String,
        target: String,
        legal: Vec<String>,
    },
    #[error("asset '{asset_id}' is in terminal state '{state}' and cannot transition")]
    TerminalState { asset_id: String, state: String },
    #[error("no transition from '{from}' to '{to}'. Valid next states: [{}]", .allowed.join(", "))]
    InvalidTransition {
        from: String,
        to: String,
        allowed: Vec<String>,
    },
    #[error("asset '{0}' was modified concurrently, re-read and retry")]
    ConcurrentModification(String),
    #[error("asset '{asset_id}' is in non-terminal state '{state}' and cannot be deleted")]
    NotTerminal { asset_id: String, state: String },
    #[error("category '{0}' has no default state and none was given")]
    MissingDefaultState(String),
    #[error("rejected rule set: {0}")]
    Rules(#[from] RuleSetError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl TransitionError {
    /// Only contention is transient; everything else fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransitionError::ConcurrentModification(_))
    }

    /// Rejections the caller can fix by picking another target.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            TransitionError::CategoryMismatch { .. } | TransitionError::InvalidTransition { .. }
        )
    }
}

impl From<sled::Error> for TransitionError {
    fn from(value: sled::Error) -> Self {
        TransitionError::Storage(value.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("corrupt data: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Identifier(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("a state named '{0}' already exists")]
    DuplicateState(String),
    #[error("a category named '{0}' already exists")]
    DuplicateCategory(String),
    #[error("unknown state {0}")]
    UnknownState(StateId),
    #[error("unknown category {0}")]
    UnknownCategory(CategoryId),
    #[error("default {state} is not linked to {category}")]
    UnlinkedDefault { category: CategoryId, state: StateId },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<sled::Error> for CatalogError {
    fn from(value: sled::Error) -> Self {
        CatalogError::Storage(value.into())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RuleSetError {
    #[error("'{from}' has an edge to undeclared state '{to}'")]
    UndeclaredTarget { from: String, to: String },
    #[error("terminal state '{0}' declares outgoing edges")]
    TerminalWithEdges(String),
    #[error("state '{0}' has no outgoing edges but is not marked terminal")]
    DeadEnd(String),
    #[error("state '{0}' is terminal in one family and non-terminal in another")]
    ConflictingTerminal(String),
}
