//! Named, cancellable, bounded-backoff polling loops.
//!
//! A [`LoopRegistry`] owns every active loop and enforces at most one
//! active loop per name. Loops are the only retry primitive in the
//! workspace: a task is invoked repeatedly with a growing delay between
//! invocations until it calls [`LoopRegistry::end`], its attempt budget
//! runs out, or it fails.

mod error;
mod registry;

pub use error::{LoopError, LoopOutcome};
pub use registry::{LoopRegistry, LoopSettings};
