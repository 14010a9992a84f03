//! The asserted-relationship event consumed by rules.
//!
//! Field names are the wire contract with upstream event producers and are
//! kept exactly as they appear on the stream (`x_opencti_id`,
//! `x_opencti_source_ref`, ...). Payloads are validated here, before they
//! reach any rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::error::ValidationError;
use crate::relationship::{ChangeEvent, ElementId, MarkingId, Relationship, RelationshipType};
use crate::time::{build_period_from_dates, Period};

/// A relationship was created or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEvent {
    /// Id of the asserted relationship.
    pub x_opencti_id: ElementId,

    #[serde(default, deserialize_with = "null_as_default")]
    pub object_marking_refs: Vec<MarkingId>,

    pub relationship_type: RelationshipType,

    /// Source of the relationship.
    pub x_opencti_source_ref: ElementId,

    /// Target of the relationship.
    pub x_opencti_target_ref: ElementId,

    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: Confidence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,
}

/// Producers send `null` for absent markings and confidence.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl RelationshipEvent {
    const REQUIRED: [&'static str; 4] = [
        "x_opencti_id",
        "relationship_type",
        "x_opencti_source_ref",
        "x_opencti_target_ref",
    ];

    /// Parses and validates a raw stream payload.
    ///
    /// # Errors
    ///
    /// - `MissingField` when a required field is absent, null or empty
    /// - `ConfidenceOutOfRange` when `confidence` is outside `[0, 100]`
    /// - `InvalidField` for any other shape mismatch
    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        let Some(obj) = value.as_object() else {
            return Err(ValidationError::InvalidField {
                field: "event".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };

        for field in Self::REQUIRED {
            let present = obj
                .get(field)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|s| !s.trim().is_empty());
            if !present {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        if let Some(raw) = obj.get("confidence").filter(|v| !v.is_null()) {
            let Some(n) = raw.as_i64() else {
                return Err(ValidationError::InvalidField {
                    field: "confidence".to_string(),
                    reason: format!("expected an integer, got {raw}"),
                });
            };
            Confidence::new(n)?;
        }

        serde_json::from_value(value).map_err(|e| ValidationError::InvalidField {
            field: "event".to_string(),
            reason: e.to_string(),
        })
    }

    /// Parses and validates a raw JSON string.
    ///
    /// # Errors
    ///
    /// Same as [`RelationshipEvent::from_value`], plus `InvalidField` on malformed JSON.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let value = serde_json::from_str(json).map_err(|e| ValidationError::InvalidField {
            field: "event".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_value(value)
    }

    /// Builds the event describing a stored relationship.
    #[must_use]
    pub fn from_relationship(rel: &Relationship) -> Self {
        Self {
            x_opencti_id: rel.id.clone(),
            object_marking_refs: rel.object_marking_refs.clone(),
            relationship_type: rel.relationship_type.clone(),
            x_opencti_source_ref: rel.from_id.clone(),
            x_opencti_target_ref: rel.to_id.clone(),
            confidence: rel.confidence,
            start_time: rel.start_time,
            stop_time: rel.stop_time,
        }
    }

    /// The validity period carried by this event.
    #[must_use]
    pub const fn period(&self) -> Period {
        build_period_from_dates(self.start_time, self.stop_time)
    }
}

impl From<&ChangeEvent> for RelationshipEvent {
    fn from(change: &ChangeEvent) -> Self {
        Self::from_relationship(&change.relationship)
    }
}
