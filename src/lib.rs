//! # stixrule - Incremental relationship inference for STIX knowledge graphs
//!
//! stixrule derives new relationships from chains of existing ones and keeps
//! them consistent as the graph changes. Every inferred relationship records
//! which elements justified it, so deleting any of them retracts exactly the
//! inferences that depended on it.
//!
//! ## Core Concepts
//!
//! - **Rule**: a `(left, right, creation)` relationship type triple; observing
//!   `(A)-left->(B)-right->(C)` derives `(A)-creation->(C)`
//! - **RuleContent**: provenance of one derivation (dependencies, explanation,
//!   merged attributes)
//! - **Lifecycle manager**: the store that creates, appends to and retracts
//!   inferred relationships
//! - **BundleBuilder**: accumulates graph objects into conflict-free batches
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stixrule::{catalog, InMemoryGraph, Relationship, RelationshipEvent, RuleManager};
//!
//! let graph = Arc::new(InMemoryGraph::new());
//! let manager = RuleManager::new(catalog::builtin_rules(), graph.clone(), graph.clone())?;
//!
//! let rel = Relationship::new("relationship--1", "located-at", "city", "country");
//! graph.upsert_relationship(rel.clone())?;
//! let changes = manager.dispatch_cascading(&RelationshipEvent::from_relationship(&rel))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod error;
pub mod event;
pub mod relationship;
pub mod time;

// Rules and their collaborators
pub mod config;
pub mod manager;
pub mod rule;
pub mod storage;

// Outgoing batches
pub mod bundle;

pub use bundle::{can_add_object_to_bundle, Bundle, BundleBuilder, StixObject, STIX_SPEC_VERSION};
pub use confidence::{aggregate_contributions, compute_rule_confidence, Confidence};
pub use config::{DegeneratePeriodPolicy, InferenceConfig, RuntimeConfig};
pub use error::{ExecutionError, InferenceError, InferenceResult, ValidationError};
pub use event::RelationshipEvent;
pub use manager::{DispatchHandle, RuleManager, RuleRuntime};
pub use relationship::{
    ChangeEvent, ChangeKind, ElementId, InferenceInput, InferredRelationship, MarkingId,
    Relationship, RelationshipType,
};
pub use rule::{
    catalog, create_rule_content, RelationToRelationRule, RelationTypes, RuleAttributes,
    RuleContent, RuleDefinition,
};
pub use storage::{
    InMemoryGraph, InferenceLifecycle, RelationAnchor, RelationLookup, RelationQuery, StorageError,
};
pub use time::{build_period_from_dates, compute_range_intersection, Period};
