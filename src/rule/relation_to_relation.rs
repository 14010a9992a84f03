//! The relation-to-relation rule engine.
//!
//! For a rule chaining `left` and `right` relationship types:
//!
//! ```text
//! observed (A) -right-> (B):  find (P) -left-> (A),  derive (P) -creation-> (B)
//! observed (A) -left->  (B):  find (B) -right-> (P), derive (A) -creation-> (P)
//! ```
//!
//! Both branches are evaluated independently, right first. Each derived
//! relationship carries a contribution listing every element whose
//! disappearance must retract it.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::confidence::compute_rule_confidence;
use crate::config::DegeneratePeriodPolicy;
use crate::error::InferenceResult;
use crate::event::RelationshipEvent;
use crate::relationship::{ChangeEvent, ElementId, InferenceInput, MarkingId, Relationship};
use crate::storage::{InferenceLifecycle, RelationLookup, RelationQuery, StorageError};
use crate::time::compute_range_intersection;

use super::content::{create_rule_content, RuleAttributes};
use super::definition::RuleDefinition;

/// One derivation found while walking a chain.
struct Derivation {
    input: InferenceInput,
    dependencies: Vec<ElementId>,
    explanation: Vec<ElementId>,
}

/// Executes one rule definition against observed relationship events.
pub struct RelationToRelationRule {
    definition: RuleDefinition,
    lookup: Arc<dyn RelationLookup>,
    lifecycle: Arc<dyn InferenceLifecycle>,
    degenerate_period: DegeneratePeriodPolicy,
}

impl std::fmt::Debug for RelationToRelationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationToRelationRule")
            .field("definition", &self.definition)
            .field("degenerate_period", &self.degenerate_period)
            .finish_non_exhaustive()
    }
}

impl RelationToRelationRule {
    /// Binds a definition to its collaborators.
    pub fn new(
        definition: RuleDefinition,
        lookup: Arc<dyn RelationLookup>,
        lifecycle: Arc<dyn InferenceLifecycle>,
    ) -> Self {
        Self {
            definition,
            lookup,
            lifecycle,
            degenerate_period: DegeneratePeriodPolicy::default(),
        }
    }

    /// Sets what to do with chains whose periods do not overlap.
    #[must_use]
    pub fn with_degenerate_period(mut self, policy: DegeneratePeriodPolicy) -> Self {
        self.degenerate_period = policy;
        self
    }

    /// The executed definition.
    #[must_use]
    pub const fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    /// The rule id recorded in contributions.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Derives relationships from an asserted or updated relationship.
    ///
    /// Events of a type the rule does not watch yield no changes. Any lookup
    /// or lifecycle failure aborts the call; changes already applied by
    /// earlier chain members stay committed.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Storage` on collaborator failure.
    pub fn apply(&self, event: &RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        let types = &self.definition.relation_types;
        let mut changes = Vec::new();

        if event.relationship_type == types.right_type {
            // (P) -left-> (A) -right-> (B)  =>  (P) -creation-> (B)
            let query = RelationQuery::to(types.left_type.clone(), event.x_opencti_source_ref.clone());
            self.lookup.list_all_relations(&query, &mut |rows: &[Relationship]| {
                for found in rows {
                    let derivation = Derivation {
                        input: InferenceInput {
                            from_id: found.from_id.clone(),
                            to_id: event.x_opencti_target_ref.clone(),
                            relationship_type: types.creation_type.clone(),
                        },
                        dependencies: vec![
                            found.from_id.clone(),
                            found.id.clone(),
                            event.x_opencti_source_ref.clone(),
                            event.x_opencti_id.clone(),
                            event.x_opencti_target_ref.clone(),
                        ],
                        explanation: vec![found.id.clone(), event.x_opencti_id.clone()],
                    };
                    if let Some(change) = self.emit(event, found, derivation)? {
                        changes.push(change);
                    }
                }
                Ok(())
            })?;
        }

        if event.relationship_type == types.left_type {
            // (A) -left-> (B) -right-> (P)  =>  (A) -creation-> (P)
            let query = RelationQuery::from(types.right_type.clone(), event.x_opencti_target_ref.clone());
            self.lookup.list_all_relations(&query, &mut |rows: &[Relationship]| {
                for found in rows {
                    let derivation = Derivation {
                        input: InferenceInput {
                            from_id: event.x_opencti_source_ref.clone(),
                            to_id: found.to_id.clone(),
                            relationship_type: types.creation_type.clone(),
                        },
                        dependencies: vec![
                            event.x_opencti_source_ref.clone(),
                            event.x_opencti_id.clone(),
                            found.to_id.clone(),
                            found.id.clone(),
                            event.x_opencti_target_ref.clone(),
                        ],
                        explanation: vec![event.x_opencti_id.clone(), found.id.clone()],
                    };
                    if let Some(change) = self.emit(event, found, derivation)? {
                        changes.push(change);
                    }
                }
                Ok(())
            })?;
        }

        debug!(
            rule_id = %self.definition.id,
            event_id = %event.x_opencti_id,
            relationship_type = %event.relationship_type,
            changes = changes.len(),
            "rule applied"
        );
        Ok(changes)
    }

    /// A new supporting relationship: same as [`apply`](Self::apply).
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub fn insert(&self, event: &RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        self.apply(event)
    }

    /// A modified supporting relationship: same as [`apply`](Self::apply),
    /// since confidence and period must be recomputed.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub fn update(&self, event: &RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        self.apply(event)
    }

    /// Removes this rule's contributions to `element` that depend on
    /// `dependency_id`. The lifecycle manager deletes the relationship once
    /// no contribution remains.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Storage` on collaborator failure.
    pub fn clean(
        &self,
        element: &ElementId,
        dependency_id: &ElementId,
    ) -> InferenceResult<Option<ChangeEvent>> {
        let change = self
            .lifecycle
            .delete_rule_contribution(&self.definition.id, element, dependency_id)?;
        debug!(
            rule_id = %self.definition.id,
            element = %element,
            dependency = %dependency_id,
            change = ?change.as_ref().map(|c| c.kind),
            "rule contribution cleaned"
        );
        Ok(change)
    }

    /// Inferred relationships this rule derived using `dependency_id`.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::Storage` on collaborator failure.
    pub fn dependents(&self, dependency_id: &ElementId) -> InferenceResult<Vec<ElementId>> {
        Ok(self.lifecycle.find_dependents(&self.definition.id, dependency_id)?)
    }

    fn emit(
        &self,
        event: &RelationshipEvent,
        found: &Relationship,
        derivation: Derivation,
    ) -> Result<Option<ChangeEvent>, StorageError> {
        if derivation.input.from_id == derivation.input.to_id {
            trace!(rule_id = %self.definition.id, element = %derivation.input.from_id, "skipping self-referencing inference");
            return Ok(None);
        }

        let range = compute_range_intersection(&event.period(), &found.period());
        let attributes = RuleAttributes {
            confidence: compute_rule_confidence(&[event.confidence, found.confidence]),
            start_time: range.start,
            stop_time: range.end,
            object_marking: merge_markings(&event.object_marking_refs, &found.object_marking_refs),
        };
        let content = create_rule_content(
            self.definition.id.clone(),
            derivation.dependencies,
            derivation.explanation,
            attributes,
        );

        if range.is_degenerate() && self.degenerate_period == DegeneratePeriodPolicy::Skip {
            // The chain may have overlapped before this update.
            debug!(
                rule_id = %self.definition.id,
                event_id = %event.x_opencti_id,
                found_id = %found.id,
                period = %range,
                "withdrawing inference over non-overlapping periods"
            );
            return self.lifecycle.withdraw_rule_contribution(
                &self.definition.id,
                &derivation.input.inferred_id(),
                &content.hash,
            );
        }

        self.lifecycle
            .create_or_append_inferred_relation(&derivation.input, content)
    }
}

/// Ordered union of two marking lists.
fn merge_markings(first: &[MarkingId], second: &[MarkingId]) -> Vec<MarkingId> {
    let mut merged: Vec<MarkingId> = Vec::with_capacity(first.len() + second.len());
    for marking in first.iter().chain(second) {
        if !merged.contains(marking) {
            merged.push(marking.clone());
        }
    }
    merged
}
