//! Rules deriving inferred relationships.
//!
//! - [`definition`]: rules as data (id + relationship type triple)
//! - [`content`]: provenance attached to every derived relationship
//! - [`relation_to_relation`]: the generic chaining engine
//! - [`catalog`]: built-in rule definitions

pub mod catalog;
pub mod content;
pub mod definition;
pub mod relation_to_relation;

pub use content::{create_rule_content, dependency_hash, RuleAttributes, RuleContent};
pub use definition::{RelationTypes, RuleDefinition};
pub use relation_to_relation::RelationToRelationRule;
