//! Collaborator traits for the rule engine.
//!
//! The graph store is external. Rules reach it only through these two
//! traits, injected at construction:
//! - [`RelationLookup`] streams existing relationships anchored on an element
//! - [`InferenceLifecycle`] owns inferred relationships and their provenance
//!
//! Both must offer read-your-writes consistency: an inferred relationship
//! created during one processing run must be visible to later lookups of
//! that run. Writes to the same inferred relationship must be serialized by
//! the implementation.

use thiserror::Error;

use crate::relationship::{ChangeEvent, ElementId, InferenceInput, Relationship, RelationshipType};
use crate::rule::RuleContent;

/// Errors that can occur in storage collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Element not found.
    #[error("Element not found: {0}")]
    NotFound(String),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Rule content rejected by the store.
    #[error("Invalid rule content: {0}")]
    InvalidContent(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Which endpoint of the relationship a lookup is anchored on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationAnchor {
    /// Relationships whose source is this element.
    From(ElementId),
    /// Relationships whose target is this element.
    To(ElementId),
}

/// A lookup of all relationships of one type anchored on one element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationQuery {
    pub relationship_type: RelationshipType,
    pub anchor: RelationAnchor,
}

impl RelationQuery {
    /// Relationships of `relationship_type` whose source is `from_id`.
    #[must_use]
    pub const fn from(relationship_type: RelationshipType, from_id: ElementId) -> Self {
        Self {
            relationship_type,
            anchor: RelationAnchor::From(from_id),
        }
    }

    /// Relationships of `relationship_type` whose target is `to_id`.
    #[must_use]
    pub const fn to(relationship_type: RelationshipType, to_id: ElementId) -> Self {
        Self {
            relationship_type,
            anchor: RelationAnchor::To(to_id),
        }
    }

    /// Check whether a relationship satisfies this query.
    #[must_use]
    pub fn matches(&self, rel: &Relationship) -> bool {
        rel.relationship_type == self.relationship_type
            && match &self.anchor {
                RelationAnchor::From(id) => &rel.from_id == id,
                RelationAnchor::To(id) => &rel.to_id == id,
            }
    }
}

/// Callback receiving one batch of relationships.
pub type RelationBatchCallback<'a> = dyn FnMut(&[Relationship]) -> Result<(), StorageError> + 'a;

/// Streams existing relationships to a callback.
pub trait RelationLookup: Send + Sync {
    /// Deliver every relationship matching `query` exactly once, across one
    /// or more callback invocations. An error returned by the callback aborts
    /// the listing and is returned as-is.
    fn list_all_relations(
        &self,
        query: &RelationQuery,
        callback: &mut RelationBatchCallback<'_>,
    ) -> Result<(), StorageError>;
}

/// Owns inferred relationships and the rule contributions justifying them.
pub trait InferenceLifecycle: Send + Sync {
    /// Create the inferred relationship for `input`, or append `content` to
    /// the existing one. A contribution is identified by rule id and
    /// dependency set; re-applying an identical contribution yields `None`.
    fn create_or_append_inferred_relation(
        &self,
        input: &InferenceInput,
        content: RuleContent,
    ) -> Result<Option<ChangeEvent>, StorageError>;

    /// Remove every contribution of `rule_id` to `element` that depends on
    /// `dependency_id`. The relationship is deleted once no contribution
    /// remains. Returns `None` when nothing changed.
    fn delete_rule_contribution(
        &self,
        rule_id: &str,
        element: &ElementId,
        dependency_id: &ElementId,
    ) -> Result<Option<ChangeEvent>, StorageError>;

    /// Remove the single contribution of `rule_id` to `element` identified
    /// by its dependency hash. Used when a chain stops supporting an
    /// inference without any of its elements being deleted. Returns `None`
    /// when nothing changed.
    fn withdraw_rule_contribution(
        &self,
        rule_id: &str,
        element: &ElementId,
        hash: &str,
    ) -> Result<Option<ChangeEvent>, StorageError>;

    /// Inferred relationships holding a `rule_id` contribution that depends
    /// on `dependency_id`.
    fn find_dependents(
        &self,
        rule_id: &str,
        dependency_id: &ElementId,
    ) -> Result<Vec<ElementId>, StorageError>;
}
