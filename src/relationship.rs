//! Relationships between graph elements, asserted or inferred.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::rule::RuleContent;
use crate::time::{build_period_from_dates, Period};

/// Namespace for deterministic inferred relationship ids.
const INFERRED_ID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_u128(0x6ba7_b812_9dad_11d1_80b4_00c0_4fd4_30c8);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of any graph element (entity or relationship).
    ElementId
);

string_id!(
    /// Identifier of a data marking definition.
    MarkingId
);

string_id!(
    /// A relationship type such as `attributed-to`.
    RelationshipType
);

/// A relationship between two elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: ElementId,
    pub relationship_type: RelationshipType,
    #[serde(rename = "fromId")]
    pub from_id: ElementId,
    #[serde(rename = "toId")]
    pub to_id: ElementId,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub object_marking_refs: Vec<MarkingId>,
}

impl Relationship {
    /// Creates a relationship with default confidence, no period and no markings.
    pub fn new(
        id: impl Into<ElementId>,
        relationship_type: impl Into<RelationshipType>,
        from_id: impl Into<ElementId>,
        to_id: impl Into<ElementId>,
    ) -> Self {
        Self {
            id: id.into(),
            relationship_type: relationship_type.into(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            confidence: Confidence::MIN,
            start_time: None,
            stop_time: None,
            object_marking_refs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_period(
        mut self,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start_time;
        self.stop_time = stop_time;
        self
    }

    #[must_use]
    pub fn with_markings(mut self, markings: Vec<MarkingId>) -> Self {
        self.object_marking_refs = markings;
        self
    }

    /// The validity period of this relationship.
    #[must_use]
    pub const fn period(&self) -> Period {
        build_period_from_dates(self.start_time, self.stop_time)
    }
}

/// Input for creating (or appending to) an inferred relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InferenceInput {
    #[serde(rename = "fromId")]
    pub from_id: ElementId,
    #[serde(rename = "toId")]
    pub to_id: ElementId,
    pub relationship_type: RelationshipType,
}

impl InferenceInput {
    /// Deterministic id of the inferred relationship for this input.
    ///
    /// The same `(type, from, to)` always maps to the same id, so every rule
    /// deriving that triple contributes to one relationship.
    #[must_use]
    pub fn inferred_id(&self) -> ElementId {
        let key = format!("{}|{}|{}", self.relationship_type, self.from_id, self.to_id);
        let uuid = uuid::Uuid::new_v5(&INFERRED_ID_NAMESPACE, key.as_bytes());
        ElementId(format!("relationship--{uuid}"))
    }
}

/// A relationship created by rules, with one or more justifications.
///
/// Owned by the rule engine: it exists as long as at least one rule
/// contribution remains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredRelationship {
    /// The materialized relationship, attributes aggregated from contributions.
    pub relationship: Relationship,

    /// Contributions keyed by rule id.
    pub contributions: BTreeMap<String, Vec<RuleContent>>,
}

impl InferredRelationship {
    /// Number of contributions across all rules.
    #[must_use]
    pub fn contribution_count(&self) -> usize {
        self.contributions.values().map(Vec::len).sum()
    }

    /// Iterates over every contribution, ordered by rule id.
    pub fn iter_contributions(&self) -> impl Iterator<Item = &RuleContent> {
        self.contributions.values().flatten()
    }
}

/// What happened to an inferred relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A change produced by the lifecycle manager, emitted back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub relationship: Relationship,
}

impl ChangeEvent {
    #[must_use]
    pub const fn new(kind: ChangeKind, relationship: Relationship) -> Self {
        Self { kind, relationship }
    }

    /// True for creations and updates, which may trigger further rules.
    #[must_use]
    pub const fn is_upsert(&self) -> bool {
        matches!(self.kind, ChangeKind::Create | ChangeKind::Update)
    }
}
