//! In-memory graph backend.
//!
//! A thread-safe implementation of both collaborator traits over one
//! `RwLock`-guarded state. It is intended for embedded usage, tests, and as a
//! reference implementation of the lifecycle semantics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::confidence::{aggregate_contributions, Confidence};
use crate::config::InferenceConfig;
use crate::relationship::{
    ChangeEvent, ChangeKind, ElementId, InferenceInput, InferredRelationship, MarkingId,
    Relationship, RelationshipType,
};
use crate::rule::RuleContent;
use crate::storage::traits::{
    InferenceLifecycle, RelationAnchor, RelationBatchCallback, RelationLookup, RelationQuery,
    StorageError,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

type IndexKey = (RelationshipType, ElementId);

#[derive(Debug, Default)]
struct GraphState {
    relationships: HashMap<ElementId, Relationship>,
    inferred: BTreeMap<ElementId, InferredRelationship>,
    by_from: HashMap<IndexKey, BTreeSet<ElementId>>,
    by_to: HashMap<IndexKey, BTreeSet<ElementId>>,
}

impl GraphState {
    fn index(&mut self, rel: &Relationship) {
        self.by_from
            .entry((rel.relationship_type.clone(), rel.from_id.clone()))
            .or_default()
            .insert(rel.id.clone());
        self.by_to
            .entry((rel.relationship_type.clone(), rel.to_id.clone()))
            .or_default()
            .insert(rel.id.clone());
    }

    fn unindex(&mut self, rel: &Relationship) {
        for (map, key) in [
            (&mut self.by_from, (rel.relationship_type.clone(), rel.from_id.clone())),
            (&mut self.by_to, (rel.relationship_type.clone(), rel.to_id.clone())),
        ] {
            if let Some(ids) = map.get_mut(&key) {
                ids.remove(&rel.id);
                if ids.is_empty() {
                    map.remove(&key);
                }
            }
        }
    }

    fn put(&mut self, rel: Relationship) -> Option<Relationship> {
        let previous = self.remove(&rel.id);
        self.index(&rel);
        self.relationships.insert(rel.id.clone(), rel);
        previous
    }

    fn remove(&mut self, id: &ElementId) -> Option<Relationship> {
        let rel = self.relationships.remove(id)?;
        self.unindex(&rel);
        Some(rel)
    }
}

/// Earliest start across contributions; any unbounded start wins.
fn earliest(mut starts: impl Iterator<Item = Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
    let first = starts.next()??;
    starts.try_fold(first, |acc, start| start.map(|s| acc.min(s)))
}

/// Latest stop across contributions; any open-ended stop wins.
fn latest(mut stops: impl Iterator<Item = Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
    let first = stops.next()??;
    stops.try_fold(first, |acc, stop| stop.map(|s| acc.max(s)))
}

/// Recomputes top-level attributes from every contribution.
fn materialize(id: ElementId, input: &InferenceInput, inferred: &BTreeMap<String, Vec<RuleContent>>) -> Relationship {
    let contents: Vec<&RuleContent> = inferred.values().flatten().collect();
    let confidences: Vec<Confidence> = contents.iter().map(|c| c.attributes.confidence).collect();
    let mut markings: Vec<MarkingId> = Vec::new();
    for marking in contents.iter().flat_map(|c| &c.attributes.object_marking) {
        if !markings.contains(marking) {
            markings.push(marking.clone());
        }
    }

    Relationship::new(
        id,
        input.relationship_type.clone(),
        input.from_id.clone(),
        input.to_id.clone(),
    )
    .with_confidence(aggregate_contributions(&confidences))
    .with_period(
        earliest(contents.iter().map(|c| c.attributes.start_time)),
        latest(contents.iter().map(|c| c.attributes.stop_time)),
    )
    .with_markings(markings)
}

fn validate_content(content: &RuleContent) -> Result<(), StorageError> {
    if content.rule_id.trim().is_empty() {
        return Err(StorageError::InvalidContent("rule_id must not be empty".to_string()));
    }
    if content.dependencies.is_empty() {
        return Err(StorageError::InvalidContent(format!(
            "contribution of rule {} has no dependencies",
            content.rule_id
        )));
    }
    Ok(())
}

/// Thread-safe in-memory graph of asserted and inferred relationships.
///
/// Writes take the state write lock, which serializes concurrent
/// create-or-append calls on the same inferred relationship.
#[derive(Debug)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
    batch_size: usize,
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGraph {
    /// Default number of relationships delivered per lookup batch.
    pub const DEFAULT_BATCH_SIZE: usize = 500;

    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::with_batch_size(Self::DEFAULT_BATCH_SIZE)
    }

    /// Create a new empty graph delivering lookups in batches of `batch_size`.
    #[must_use]
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            batch_size: batch_size.max(1),
        }
    }

    /// Create a new empty graph using the configured lookup batch size.
    #[must_use]
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::with_batch_size(config.lookup_batch_size)
    }

    /// Insert or replace an asserted relationship. Returns the previous version.
    ///
    /// # Errors
    ///
    /// - `DuplicateKey` if the id belongs to an inferred relationship
    /// - `BackendError` on a poisoned lock
    pub fn upsert_relationship(&self, rel: Relationship) -> Result<Option<Relationship>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.upsert"))?;
        if state.inferred.contains_key(&rel.id) {
            return Err(StorageError::DuplicateKey(rel.id.to_string()));
        }
        Ok(state.put(rel))
    }

    /// Delete an asserted relationship. Inferred relationships are owned by
    /// rules and cannot be deleted here.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no asserted relationship has this id
    /// - `BackendError` on a poisoned lock
    pub fn delete_relationship(&self, id: &ElementId) -> Result<Relationship, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.delete"))?;
        if state.inferred.contains_key(id) {
            return Err(StorageError::NotFound(id.to_string()));
        }
        state
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Get any relationship (asserted or inferred) by id.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on a poisoned lock.
    pub fn get(&self, id: &ElementId) -> Result<Option<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.get"))?;
        Ok(state.relationships.get(id).cloned())
    }

    /// Get an inferred relationship with its contributions.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on a poisoned lock.
    pub fn get_inferred(&self, id: &ElementId) -> Result<Option<InferredRelationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.get_inferred"))?;
        Ok(state.inferred.get(id).cloned())
    }

    /// All inferred relationships, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on a poisoned lock.
    pub fn inferred(&self) -> Result<Vec<InferredRelationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.inferred"))?;
        Ok(state.inferred.values().cloned().collect())
    }

    /// Number of stored relationships, asserted and inferred.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on a poisoned lock.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.len"))?;
        Ok(state.relationships.len())
    }

    /// True if no relationship is stored.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on a poisoned lock.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl InMemoryGraph {
    /// Drops the `rule_id` contributions to `element` matched by `doomed`,
    /// then deletes or re-materializes the relationship.
    fn remove_contributions(
        &self,
        context: &'static str,
        rule_id: &str,
        element: &ElementId,
        doomed: impl Fn(&RuleContent) -> bool,
    ) -> Result<Option<ChangeEvent>, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err(context))?;
        let Some(existing) = state.inferred.get_mut(element) else {
            return Ok(None);
        };
        let Some(list) = existing.contributions.get_mut(rule_id) else {
            return Ok(None);
        };

        let before = list.len();
        list.retain(|c| !doomed(c));
        if list.len() == before {
            return Ok(None);
        }
        if list.is_empty() {
            existing.contributions.remove(rule_id);
        }

        if existing.contributions.is_empty() {
            state.inferred.remove(element);
            let removed = state
                .remove(element)
                .ok_or_else(|| StorageError::NotFound(element.to_string()))?;
            debug!(id = %element, rule_id, "inferred relationship removed");
            return Ok(Some(ChangeEvent::new(ChangeKind::Delete, removed)));
        }

        let input = InferenceInput {
            from_id: existing.relationship.from_id.clone(),
            to_id: existing.relationship.to_id.clone(),
            relationship_type: existing.relationship.relationship_type.clone(),
        };
        existing.relationship = materialize(element.clone(), &input, &existing.contributions);
        let relationship = existing.relationship.clone();
        state.put(relationship.clone());
        debug!(id = %element, rule_id, "inferred relationship contribution removed");
        Ok(Some(ChangeEvent::new(ChangeKind::Update, relationship)))
    }
}

impl RelationLookup for InMemoryGraph {
    fn list_all_relations(
        &self,
        query: &RelationQuery,
        callback: &mut RelationBatchCallback<'_>,
    ) -> Result<(), StorageError> {
        // Snapshot under the read lock; the callback may write to this graph.
        let rows: Vec<Relationship> = {
            let state = self.state.read().map_err(|_| lock_err("graph.list"))?;
            let (index, key) = match &query.anchor {
                RelationAnchor::From(id) => (&state.by_from, (query.relationship_type.clone(), id.clone())),
                RelationAnchor::To(id) => (&state.by_to, (query.relationship_type.clone(), id.clone())),
            };
            index
                .get(&key)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| state.relationships.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        trace!(relationship_type = %query.relationship_type, rows = rows.len(), "listing relations");
        for batch in rows.chunks(self.batch_size) {
            callback(batch)?;
        }
        Ok(())
    }
}

impl InferenceLifecycle for InMemoryGraph {
    fn create_or_append_inferred_relation(
        &self,
        input: &InferenceInput,
        content: RuleContent,
    ) -> Result<Option<ChangeEvent>, StorageError> {
        validate_content(&content)?;
        let id = input.inferred_id();
        let mut state = self.state.write().map_err(|_| lock_err("graph.create_inferred"))?;

        if state.relationships.contains_key(&id) && !state.inferred.contains_key(&id) {
            return Err(StorageError::DuplicateKey(id.to_string()));
        }

        let kind = match state.inferred.get_mut(&id) {
            None => {
                let mut contributions = BTreeMap::new();
                contributions.insert(content.rule_id.clone(), vec![content]);
                let relationship = materialize(id.clone(), input, &contributions);
                state.inferred.insert(
                    id.clone(),
                    InferredRelationship {
                        relationship,
                        contributions,
                    },
                );
                ChangeKind::Create
            }
            Some(existing) => {
                let list = existing.contributions.entry(content.rule_id.clone()).or_default();
                match list.iter().position(|c| c.same_contribution(&content)) {
                    Some(pos) if list[pos] == content => {
                        trace!(id = %id, rule_id = %content.rule_id, "contribution unchanged");
                        return Ok(None);
                    }
                    Some(pos) => list[pos] = content,
                    None => list.push(content),
                }
                existing.relationship = materialize(id.clone(), input, &existing.contributions);
                ChangeKind::Update
            }
        };

        let relationship = state
            .inferred
            .get(&id)
            .map(|inf| inf.relationship.clone())
            .ok_or_else(|| StorageError::BackendError(format!("inferred relationship {id} vanished")))?;
        state.put(relationship.clone());
        debug!(id = %id, kind = %kind, "inferred relationship written");
        Ok(Some(ChangeEvent::new(kind, relationship)))
    }

    fn delete_rule_contribution(
        &self,
        rule_id: &str,
        element: &ElementId,
        dependency_id: &ElementId,
    ) -> Result<Option<ChangeEvent>, StorageError> {
        self.remove_contributions("graph.delete_contribution", rule_id, element, |c| {
            c.depends_on(dependency_id)
        })
    }

    fn withdraw_rule_contribution(
        &self,
        rule_id: &str,
        element: &ElementId,
        hash: &str,
    ) -> Result<Option<ChangeEvent>, StorageError> {
        self.remove_contributions("graph.withdraw_contribution", rule_id, element, |c| c.hash == hash)
    }

    fn find_dependents(
        &self,
        rule_id: &str,
        dependency_id: &ElementId,
    ) -> Result<Vec<ElementId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.find_dependents"))?;
        Ok(state
            .inferred
            .iter()
            .filter(|(_, inf)| {
                inf.contributions
                    .get(rule_id)
                    .is_some_and(|list| list.iter().any(|c| c.depends_on(dependency_id)))
            })
            .map(|(id, _)| id.clone())
            .collect())
    }
}
