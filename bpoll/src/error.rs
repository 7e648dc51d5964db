//! Loop completion outcomes and failure values.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

/// How a loop finished when it was not rejected by its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// `end(name)` was called and the loop stopped scheduling.
    Ended,
    /// The attempt budget ran out before `end(name)` was called.
    AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopError<E> {
    /// A loop is already active under the requested name.
    AlreadyActive { name: String },
    /// The task failed; the loop stopped scheduling and the error is
    /// handed back to the awaiting caller unchanged.
    Task(E),
}

impl<E> LoopError<E> {
    pub fn already_active(name: impl Into<String>) -> Self {
        Self::AlreadyActive { name: name.into() }
    }
}

impl<E: Display> Display for LoopError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyActive { name } => {
                write!(f, "a loop named '{name}' is already active")
            }
            Self::Task(error) => write!(f, "loop task failed: {error}"),
        }
    }
}

impl<E: Debug + Display> Error for LoopError<E> {}
