//! Rule manager.
//!
//! Holds one generic engine per configured rule definition and routes
//! relationship events to every rule watching their type. Changes produced
//! by rules can be re-injected (cascading) so that inferred relationships
//! feed further rules, and deletions are propagated to every contribution
//! that depended on the deleted element.

/// Bounded worker pool dispatching independent events in parallel.
pub mod runtime;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{DegeneratePeriodPolicy, InferenceConfig};
use crate::error::{ExecutionError, InferenceResult};
use crate::event::RelationshipEvent;
use crate::relationship::{ChangeEvent, ChangeKind, ElementId};
use crate::rule::{RelationToRelationRule, RuleDefinition};
use crate::storage::{InferenceLifecycle, RelationLookup};

pub use runtime::{DispatchHandle, RuleRuntime};

/// Routes events to rules.
#[derive(Debug)]
pub struct RuleManager {
    rules: Vec<RelationToRelationRule>,
    max_cascade_depth: usize,
}

impl RuleManager {
    /// Creates a manager running `definitions` with default settings.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an invalid or duplicate definition.
    pub fn new(
        definitions: Vec<RuleDefinition>,
        lookup: Arc<dyn RelationLookup>,
        lifecycle: Arc<dyn InferenceLifecycle>,
    ) -> InferenceResult<Self> {
        let config = InferenceConfig {
            rules: definitions,
            ..InferenceConfig::default()
        };
        Self::from_config(&config, lookup, lifecycle)
    }

    /// Creates a manager from a configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is invalid.
    pub fn from_config(
        config: &InferenceConfig,
        lookup: Arc<dyn RelationLookup>,
        lifecycle: Arc<dyn InferenceLifecycle>,
    ) -> InferenceResult<Self> {
        config.validate()?;
        let rules = config
            .rules
            .iter()
            .map(|def| {
                if def.relation_types.is_symmetric() {
                    debug!(rule_id = %def.id, "left and right types coincide; both branches fire per event");
                }
                build_rule(def.clone(), &lookup, &lifecycle, config.degenerate_period)
            })
            .collect::<Vec<_>>();
        info!(rules = rules.len(), "rule manager initialized");
        Ok(Self {
            rules,
            max_cascade_depth: config.max_cascade_depth,
        })
    }

    /// The configured rules, in configuration order.
    #[must_use]
    pub fn rules(&self) -> &[RelationToRelationRule] {
        &self.rules
    }

    /// Finds a rule by id.
    #[must_use]
    pub fn rule(&self, rule_id: &str) -> Option<&RelationToRelationRule> {
        self.rules.iter().find(|r| r.id() == rule_id)
    }

    /// Applies every rule watching the event type, in configuration order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing rule; see [`RelationToRelationRule::apply`].
    pub fn dispatch(&self, event: &RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        let mut changes = Vec::new();
        for rule in &self.rules {
            if rule.definition().relation_types.watches(&event.relationship_type) {
                changes.extend(rule.apply(event)?);
            }
        }
        Ok(changes)
    }

    /// Parses a raw stream payload, then dispatches it with cascading.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed payload, otherwise as
    /// [`RuleManager::dispatch_cascading`].
    pub fn dispatch_raw(&self, payload: serde_json::Value) -> InferenceResult<Vec<ChangeEvent>> {
        let event = RelationshipEvent::from_value(payload)?;
        self.dispatch_cascading(&event)
    }

    /// Dispatches an event, then re-injects every created or updated
    /// inferred relationship until no rule produces a change. Inferred
    /// relationships deleted on the way are retracted.
    ///
    /// # Errors
    ///
    /// Returns `CascadeLimitExceeded` when re-injection goes deeper than the
    /// configured limit. Changes applied before the failure stay committed.
    pub fn dispatch_cascading(&self, event: &RelationshipEvent) -> InferenceResult<Vec<ChangeEvent>> {
        let mut all = Vec::new();
        let mut queue = VecDeque::from([(event.clone(), 0usize)]);

        while let Some((current, depth)) = queue.pop_front() {
            for change in self.dispatch(&current)? {
                if change.is_upsert() {
                    if depth + 1 > self.max_cascade_depth {
                        warn!(
                            event_id = %event.x_opencti_id,
                            limit = self.max_cascade_depth,
                            "cascade depth limit reached"
                        );
                        return Err(ExecutionError::CascadeLimitExceeded {
                            limit: self.max_cascade_depth,
                            event_id: event.x_opencti_id.to_string(),
                        }
                        .into());
                    }
                    queue.push_back((RelationshipEvent::from(&change), depth + 1));
                    all.push(change);
                } else {
                    // A withdrawn inference may support others.
                    let deleted = change.relationship.id.clone();
                    all.push(change);
                    all.extend(self.retract(&deleted)?);
                }
            }
        }

        debug!(event_id = %event.x_opencti_id, changes = all.len(), "event dispatched");
        Ok(all)
    }

    /// Retracts every contribution depending on a deleted element.
    ///
    /// Inferred relationships removed on the way are retracted in turn,
    /// since they may support other inferences.
    ///
    /// # Errors
    ///
    /// Stops at the first collaborator failure.
    pub fn retract(&self, deleted: &ElementId) -> InferenceResult<Vec<ChangeEvent>> {
        let mut all = Vec::new();
        let mut seen = HashSet::from([deleted.clone()]);
        let mut queue = VecDeque::from([deleted.clone()]);

        while let Some(dependency) = queue.pop_front() {
            for rule in &self.rules {
                for element in rule.dependents(&dependency)? {
                    let Some(change) = rule.clean(&element, &dependency)? else {
                        continue;
                    };
                    if change.kind == ChangeKind::Delete && seen.insert(change.relationship.id.clone()) {
                        queue.push_back(change.relationship.id.clone());
                    }
                    all.push(change);
                }
            }
        }

        debug!(deleted = %deleted, changes = all.len(), "element retracted");
        Ok(all)
    }

    /// Removes one rule's contribution, by rule id.
    ///
    /// # Errors
    ///
    /// Returns `RuleNotFound` for an unknown rule id.
    pub fn clean(
        &self,
        rule_id: &str,
        element: &ElementId,
        dependency_id: &ElementId,
    ) -> InferenceResult<Option<ChangeEvent>> {
        let rule = self.rule(rule_id).ok_or_else(|| ExecutionError::RuleNotFound {
            rule_id: rule_id.to_string(),
        })?;
        rule.clean(element, dependency_id)
    }
}

fn build_rule(
    definition: RuleDefinition,
    lookup: &Arc<dyn RelationLookup>,
    lifecycle: &Arc<dyn InferenceLifecycle>,
    policy: DegeneratePeriodPolicy,
) -> RelationToRelationRule {
    RelationToRelationRule::new(definition, Arc::clone(lookup), Arc::clone(lifecycle))
        .with_degenerate_period(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InferenceError, ValidationError};
    use crate::relationship::Relationship;
    use crate::rule::{catalog, RelationTypes};
    use crate::storage::InMemoryGraph;

    fn manager(graph: &Arc<InMemoryGraph>, definitions: Vec<RuleDefinition>) -> RuleManager {
        RuleManager::new(
            definitions,
            Arc::clone(graph) as Arc<dyn RelationLookup>,
            Arc::clone(graph) as Arc<dyn InferenceLifecycle>,
        )
        .unwrap()
    }

    fn assert_rel(graph: &InMemoryGraph, id: &str, rel_type: &str, from: &str, to: &str) -> RelationshipEvent {
        let rel = Relationship::new(id, rel_type, from, to);
        graph.upsert_relationship(rel.clone()).unwrap();
        RelationshipEvent::from_relationship(&rel)
    }

    #[test]
    fn duplicate_rules_rejected() {
        let graph = Arc::new(InMemoryGraph::new());
        let err = RuleManager::new(
            vec![catalog::part_part(), catalog::part_part()],
            Arc::clone(&graph) as Arc<dyn RelationLookup>,
            Arc::clone(&graph) as Arc<dyn InferenceLifecycle>,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Validation(ValidationError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn dispatch_routes_by_type() {
        let graph = Arc::new(InMemoryGraph::new());
        let mgr = manager(&graph, catalog::builtin_rules());

        assert_rel(&graph, "r1", "targets", "intrusion-set", "org");
        let event = assert_rel(&graph, "r2", "located-at", "org", "country");

        let changes = mgr.dispatch(&event).unwrap();
        // location_targets derives (intrusion-set) targets (country).
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].relationship.relationship_type.as_str(), "targets");
        assert_eq!(changes[0].relationship.from_id.as_str(), "intrusion-set");
        assert_eq!(changes[0].relationship.to_id.as_str(), "country");

        let unrelated = assert_rel(&graph, "r3", "uses", "a", "b");
        assert!(mgr.dispatch(&unrelated).unwrap().is_empty());
    }

    #[test]
    fn cascading_follows_chains() {
        let graph = Arc::new(InMemoryGraph::new());
        let mgr = manager(&graph, vec![catalog::location_location()]);

        assert_rel(&graph, "r1", "located-at", "city", "region");
        assert_rel(&graph, "r2", "located-at", "region", "country");
        let event = assert_rel(&graph, "r3", "located-at", "country", "continent");

        let changes = mgr.dispatch_cascading(&event).unwrap();
        let mut pairs: Vec<(String, String)> = graph
            .inferred()
            .unwrap()
            .into_iter()
            .map(|inf| (inf.relationship.from_id.to_string(), inf.relationship.to_id.to_string()))
            .collect();
        pairs.sort();
        // region->continent directly; city->continent via the inferred region->continent.
        assert!(pairs.contains(&("region".to_string(), "continent".to_string())));
        assert!(pairs.contains(&("city".to_string(), "continent".to_string())));
        assert!(!changes.is_empty());
    }

    #[test]
    fn cascade_limit_is_enforced() {
        let graph = Arc::new(InMemoryGraph::new());
        let config = InferenceConfig {
            rules: vec![catalog::location_location()],
            max_cascade_depth: 0,
            ..InferenceConfig::default()
        };
        let mgr = RuleManager::from_config(
            &config,
            Arc::clone(&graph) as Arc<dyn RelationLookup>,
            Arc::clone(&graph) as Arc<dyn InferenceLifecycle>,
        )
        .unwrap();

        assert_rel(&graph, "r1", "located-at", "a", "b");
        let event = assert_rel(&graph, "r2", "located-at", "b", "c");
        let err = mgr.dispatch_cascading(&event).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Execution(ExecutionError::CascadeLimitExceeded { limit: 0, .. })
        ));
    }

    #[test]
    fn retract_cascades_through_inferred() {
        let graph = Arc::new(InMemoryGraph::new());
        let mgr = manager(&graph, vec![catalog::location_location()]);

        for (id, from, to) in [("r1", "city", "region"), ("r2", "region", "country"), ("r3", "country", "continent")] {
            let event = assert_rel(&graph, id, "located-at", from, to);
            mgr.dispatch_cascading(&event).unwrap();
        }
        assert!(!graph.inferred().unwrap().is_empty());

        graph.delete_relationship(&"r2".into()).unwrap();
        let changes = mgr.retract(&"r2".into()).unwrap();
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Delete));

        // Every chain went through r2.
        assert!(graph.inferred().unwrap().is_empty());
        assert_eq!(graph.len().unwrap(), 2);
    }

    #[test]
    fn skipped_chain_withdraws_and_retracts_downstream() {
        use chrono::{TimeZone, Utc};

        let day = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();
        let graph = Arc::new(InMemoryGraph::new());
        let config = InferenceConfig {
            rules: vec![catalog::location_location()],
            degenerate_period: DegeneratePeriodPolicy::Skip,
            ..InferenceConfig::default()
        };
        let mgr = RuleManager::from_config(
            &config,
            Arc::clone(&graph) as Arc<dyn RelationLookup>,
            Arc::clone(&graph) as Arc<dyn InferenceLifecycle>,
        )
        .unwrap();

        let upsert = |rel: Relationship| {
            graph.upsert_relationship(rel.clone()).unwrap();
            mgr.dispatch_cascading(&RelationshipEvent::from_relationship(&rel)).unwrap()
        };
        upsert(Relationship::new("r3", "located-at", "country", "continent"));
        upsert(
            Relationship::new("r1", "located-at", "city", "region")
                .with_period(Some(day(2019, 1, 1)), Some(day(2020, 1, 1))),
        );
        let region_country = Relationship::new("r2", "located-at", "region", "country");
        upsert(region_country.clone().with_period(Some(day(2019, 6, 1)), None));
        // city->country, region->continent, city->continent.
        assert_eq!(graph.inferred().unwrap().len(), 3);

        // r2 no longer overlaps r1: every chain through r1 and r2 goes.
        let changes = upsert(region_country.with_period(Some(day(2022, 1, 1)), None));
        assert!(changes.iter().any(|c| c.kind == ChangeKind::Delete));

        let remaining = graph.inferred().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].relationship.from_id.as_str(), "region");
        assert_eq!(remaining[0].relationship.to_id.as_str(), "continent");
        assert_eq!(remaining[0].relationship.start_time, Some(day(2022, 1, 1)));
    }

    #[test]
    fn clean_unknown_rule() {
        let graph = Arc::new(InMemoryGraph::new());
        let mgr = manager(&graph, catalog::builtin_rules());
        let err = mgr.clean("nope", &"x".into(), &"y".into()).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Execution(ExecutionError::RuleNotFound { .. })
        ));
    }

    #[test]
    fn dispatch_raw_validates() {
        let graph = Arc::new(InMemoryGraph::new());
        let mgr = manager(
            &graph,
            vec![RuleDefinition::new("r", RelationTypes::new("a", "b", "c"))],
        );
        let err = mgr.dispatch_raw(serde_json::json!({"relationship_type": "a"})).unwrap_err();
        assert!(err.is_validation());
    }
}
