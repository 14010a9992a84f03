//! STIX bundle building.
//!
//! A [`BundleBuilder`] accumulates graph objects for one outgoing batch.
//! Before appending, callers ask [`BundleBuilder::can_add_objects`] whether
//! the candidates conflict with what is already there; an object with the
//! same id and type but different content cannot share a batch, and the
//! caller starts a new one instead.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ValidationError;

/// STIX version tag written on every bundle.
pub const STIX_SPEC_VERSION: &str = "2.1";

/// Fields ignored when comparing objects for merge eligibility.
const VOLATILE_FIELDS: [&str; 2] = ["converter_csv", "extensions"];

/// A graph object: a JSON object carrying string `id` and `type` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct StixObject(Map<String, Value>);

impl StixObject {
    /// Wraps a JSON value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidField` if the value is not an object, or
    /// `MissingField` if it lacks a non-empty string `id` or `type`.
    pub fn new(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(map) = value else {
            return Err(ValidationError::InvalidField {
                field: "object".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        };
        for field in ["id", "type"] {
            if !map.get(field).and_then(Value::as_str).is_some_and(|s| !s.is_empty()) {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        Ok(Self(map))
    }

    /// The object id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    /// The object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    /// A field of the object.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// True if both objects share id and type.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id() && self.object_type() == other.object_type()
    }

    /// True if both objects are equal once volatile fields are ignored.
    /// Key order is irrelevant.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        let stable = |map: &Map<String, Value>| -> Map<String, Value> {
            map.iter()
                .filter(|(k, _)| !VOLATILE_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        stable(&self.0) == stable(&other.0)
    }
}

impl TryFrom<Value> for StixObject {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StixObject> for Value {
    fn from(object: StixObject) -> Self {
        Self::Object(object.0)
    }
}

/// True iff no candidate has the same id and type as an existing object
/// while differing in content.
#[must_use]
pub fn can_add_object_to_bundle(candidates: &[StixObject], existing: &[StixObject]) -> bool {
    candidates.iter().all(|candidate| {
        !existing
            .iter()
            .any(|item| item.same_identity(candidate) && !item.same_content(candidate))
    })
}

/// A built bundle, ready for transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    /// `bundle--<uuid>`.
    pub id: String,
    /// Always `"bundle"`.
    #[serde(rename = "type")]
    pub bundle_type: String,
    /// STIX version tag.
    pub spec_version: String,
    /// Objects, unique by id.
    pub objects: Vec<StixObject>,
}

impl Bundle {
    /// Serializes the bundle.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; cannot happen for well-formed objects.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Accumulates objects for one bundle. Owned by a single producer.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    id: String,
    objects: Vec<StixObject>,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleBuilder {
    /// Object type of a bundle.
    pub const BUNDLE_TYPE: &'static str = "bundle";

    /// Creates an empty builder with a fresh `bundle--<uuid>` id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: format!("bundle--{}", Uuid::new_v4()),
            objects: Vec::new(),
        }
    }

    /// The bundle id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// See [`can_add_object_to_bundle`]. Checked against every object
    /// added so far, duplicates included.
    #[must_use]
    pub fn can_add_objects(&self, candidates: &[StixObject]) -> bool {
        can_add_object_to_bundle(candidates, &self.objects)
    }

    /// Appends an object without checking for conflicts.
    pub fn add_object(&mut self, object: StixObject) -> &mut Self {
        self.objects.push(object);
        self
    }

    /// Appends objects without checking for conflicts.
    pub fn add_objects(&mut self, objects: impl IntoIterator<Item = StixObject>) -> &mut Self {
        self.objects.extend(objects);
        self
    }

    /// Ids of the added objects in insertion order, duplicates included.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.objects.iter().map(StixObject::id).collect()
    }

    /// Number of added objects, duplicates included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot of the bundle. Objects are deduplicated by id, keeping the
    /// first occurrence in insertion order.
    #[must_use]
    pub fn build(&self) -> Bundle {
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        for object in &self.objects {
            if seen.insert(object.id()) {
                objects.push(object.clone());
            }
        }
        Bundle {
            id: self.id.clone(),
            bundle_type: Self::BUNDLE_TYPE.to_string(),
            spec_version: STIX_SPEC_VERSION.to_string(),
            objects,
        }
    }
}
