//! Rule definitions.
//!
//! A rule is data: an identifier plus the relationship type triple it
//! chains. One generic engine executes every definition.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::relationship::RelationshipType;

/// The relationship types chained by a relation-to-relation rule.
///
/// `(P) -left-> (A) -right-> (B)` derives `(P) -creation-> (B)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationTypes {
    pub left_type: RelationshipType,
    pub right_type: RelationshipType,
    pub creation_type: RelationshipType,
}

impl RelationTypes {
    /// Creates a type triple.
    pub fn new(
        left_type: impl Into<RelationshipType>,
        right_type: impl Into<RelationshipType>,
        creation_type: impl Into<RelationshipType>,
    ) -> Self {
        Self {
            left_type: left_type.into(),
            right_type: right_type.into(),
            creation_type: creation_type.into(),
        }
    }

    /// True when the rule reacts to relationships of this type.
    #[must_use]
    pub fn watches(&self, relationship_type: &RelationshipType) -> bool {
        &self.left_type == relationship_type || &self.right_type == relationship_type
    }

    /// Both chain branches fire for one event when left and right coincide.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        self.left_type == self.right_type
    }
}

/// A rule definition: identity, metadata and chained types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    /// Stable rule identifier, recorded in every contribution.
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(flatten)]
    pub relation_types: RelationTypes,
}

impl RuleDefinition {
    /// Maximum length of a rule id.
    pub const MAX_ID_LEN: usize = 128;

    /// Creates a definition with empty name and description.
    pub fn new(id: impl Into<String>, relation_types: RelationTypes) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            description: String::new(),
            relation_types,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validates the definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRuleDefinition` if the id is empty or too long, or if
    /// any relationship type is empty.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidRuleDefinition {
            rule_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.id.len() > Self::MAX_ID_LEN {
            return Err(invalid("id is too long"));
        }
        let types = &self.relation_types;
        for (field, value) in [
            ("leftType", &types.left_type),
            ("rightType", &types.right_type),
            ("creationType", &types.creation_type),
        ] {
            if value.as_str().trim().is_empty() {
                return Err(invalid(&format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}
