//! Rule contributions (provenance records).
//!
//! A `RuleContent` records why one rule derived one inferred relationship:
//! the elements whose disappearance must retract it (`dependencies`), the
//! human-facing justification (`explanation`), and the attributes the rule
//! computed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::confidence::Confidence;
use crate::relationship::{ElementId, MarkingId};

/// Attributes computed by a rule for its contribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAttributes {
    pub confidence: Confidence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,

    #[serde(rename = "objectMarking", default)]
    pub object_marking: Vec<MarkingId>,
}

/// One rule's contribution to one inferred relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleContent {
    pub rule_id: String,

    /// Ordered, de-duplicated. Superset of `explanation`.
    pub dependencies: Vec<ElementId>,

    pub explanation: Vec<ElementId>,

    pub attributes: RuleAttributes,

    /// Digest of `dependencies`; with `rule_id`, identifies the contribution.
    pub hash: String,
}

impl RuleContent {
    /// True if this contribution must be retracted when `id` disappears.
    #[must_use]
    pub fn depends_on(&self, id: &ElementId) -> bool {
        self.dependencies.contains(id)
    }

    /// True if both records describe the same contribution (same rule and
    /// dependency set), regardless of computed attributes.
    #[must_use]
    pub fn same_contribution(&self, other: &Self) -> bool {
        self.rule_id == other.rule_id && self.hash == other.hash
    }
}

/// Stable digest of a dependency list.
#[must_use]
pub fn dependency_hash(dependencies: &[ElementId]) -> String {
    let mut hasher = blake3::Hasher::new();
    for dep in dependencies {
        hasher.update(dep.as_str().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Packages a rule contribution.
///
/// Dependencies keep their first occurrence order with duplicates removed.
/// Explanation ids missing from the dependencies are appended to them, so
/// that every explained element also triggers retraction.
#[must_use]
pub fn create_rule_content(
    rule_id: impl Into<String>,
    dependencies: Vec<ElementId>,
    explanation: Vec<ElementId>,
    attributes: RuleAttributes,
) -> RuleContent {
    let rule_id = rule_id.into();
    let mut deps: Vec<ElementId> = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    for id in &explanation {
        if !deps.contains(id) {
            debug!(rule_id = %rule_id, id = %id, "explanation id missing from dependencies");
            deps.push(id.clone());
        }
    }

    let hash = dependency_hash(&deps);
    RuleContent {
        rule_id,
        dependencies: deps,
        explanation,
        attributes,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<ElementId> {
        raw.iter().map(|s| ElementId::from(*s)).collect()
    }

    #[test]
    fn test_rule_content_keeps_order() {
        let content = create_rule_content(
            "location_location",
            ids(&["a", "r1", "b", "r2", "c"]),
            ids(&["r1", "r2"]),
            RuleAttributes::default(),
        );
        assert_eq!(content.dependencies, ids(&["a", "r1", "b", "r2", "c"]));
        assert_eq!(content.explanation, ids(&["r1", "r2"]));
        assert!(content.depends_on(&"b".into()));
        assert!(!content.depends_on(&"z".into()));
    }

    #[test]
    fn test_rule_content_deduplicates_dependencies() {
        let content = create_rule_content(
            "r",
            ids(&["a", "r1", "a", "r2", "a"]),
            ids(&["r1", "r2"]),
            RuleAttributes::default(),
        );
        assert_eq!(content.dependencies, ids(&["a", "r1", "r2"]));
    }

    #[test]
    fn test_rule_content_dependencies_cover_explanation() {
        let content = create_rule_content(
            "r",
            ids(&["a"]),
            ids(&["r1"]),
            RuleAttributes::default(),
        );
        assert_eq!(content.dependencies, ids(&["a", "r1"]));
    }

    #[test]
    fn test_hash_identifies_dependency_set() {
        let one = create_rule_content("r", ids(&["a", "b"]), vec![], RuleAttributes::default());
        let attrs = RuleAttributes {
            confidence: Confidence::new(90).unwrap(),
            ..RuleAttributes::default()
        };
        let same = create_rule_content("r", ids(&["a", "b"]), vec![], attrs);
        let other = create_rule_content("r", ids(&["ab"]), vec![], RuleAttributes::default());

        assert!(one.same_contribution(&same));
        assert_ne!(one, same);
        assert!(!one.same_contribution(&other));
    }

    #[test]
    fn test_attributes_serialize_marking_field() {
        let attrs = RuleAttributes {
            object_marking: vec![MarkingId::from("marking-definition--tlp-red")],
            ..RuleAttributes::default()
        };
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["objectMarking"][0], "marking-definition--tlp-red");
    }
}
