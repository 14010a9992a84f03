//! Storage collaborators for the rule engine.
//!
//! The traits describe what rules need from the external graph store; the
//! in-memory backend is the reference implementation used for embedded use
//! and tests.

mod memory;
mod traits;

pub use memory::InMemoryGraph;
pub use traits::{
    InferenceLifecycle, RelationAnchor, RelationBatchCallback, RelationLookup, RelationQuery,
    StorageError,
};
