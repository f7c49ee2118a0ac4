use thiserror::Error;

use crate::domain::task::TaskStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid task transition from {from:?} to {to:?}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
