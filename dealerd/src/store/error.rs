use thiserror::Error;
use crate::store::linked_list::ListError;

/// Failures reported by store operations. None of them leave partial state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("duplicate key in {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u64 },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl StoreError {
    pub fn not_found(what: &'static str, id: u64) -> Self {
        StoreError::NotFound { what, id }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    /// Caller sent something malformed, as opposed to referencing missing state.
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_) | StoreError::InvalidTarget(_))
    }
}

// A list refusing a handle means the queue index and its bins disagree.
impl From<ListError> for StoreError {
    fn from(e: ListError) -> Self {
        StoreError::InvariantViolation(format!("work queue list: {}", e))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
