//! Engine configuration.
//!
//! Configuration is plain data with defaults; it can be loaded from JSON.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InferenceError, InferenceResult, ValidationError};
use crate::rule::{catalog, RuleDefinition};

/// What to do when the intersection of two periods is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePeriodPolicy {
    /// Emit the inferred relationship with the degenerate period as computed.
    #[default]
    Store,
    /// Emit nothing for that chain.
    Skip,
}

/// Worker runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of dispatch workers.
    pub workers: usize,
    /// Maximum queued events.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Rules to run. Defaults to the built-in catalog.
    pub rules: Vec<RuleDefinition>,
    /// What to do with a chain whose periods do not overlap.
    pub degenerate_period: DegeneratePeriodPolicy,
    /// Maximum re-injection depth when cascading inferred changes.
    pub max_cascade_depth: usize,
    /// Relationships per lookup batch in the in-memory backend.
    pub lookup_batch_size: usize,
    /// Worker pool settings for [`crate::RuleRuntime`].
    pub runtime: RuntimeConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            rules: catalog::builtin_rules(),
            degenerate_period: DegeneratePeriodPolicy::default(),
            max_cascade_depth: 16,
            lookup_batch_size: 500,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl InferenceConfig {
    /// Parses and validates a JSON configuration. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns a validation error on malformed JSON or invalid values.
    pub fn from_json_str(json: &str) -> InferenceResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidField {
            field: "config".to_string(),
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the file cannot be read, otherwise as
    /// [`InferenceConfig::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> InferenceResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            InferenceError::internal(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Validates rule definitions and numeric bounds.
    ///
    /// # Errors
    ///
    /// - `InvalidRuleDefinition` / `DuplicateRule` for bad rules
    /// - `InvalidField` for zero batch size, workers or queue capacity
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(rule.id.as_str()) {
                return Err(ValidationError::DuplicateRule {
                    rule_id: rule.id.clone(),
                });
            }
        }
        for (field, value) in [
            ("lookup_batch_size", self.lookup_batch_size),
            ("runtime.workers", self.runtime.workers),
            ("runtime.queue_capacity", self.runtime.queue_capacity),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidField {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = InferenceConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.rules.len(), catalog::builtin_rules().len());
        assert_eq!(cfg.degenerate_period, DegeneratePeriodPolicy::Store);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = InferenceConfig::from_json_str(
            r#"{
                "degenerate_period": "skip",
                "rules": [
                    {"id": "r1", "leftType": "uses", "rightType": "uses", "creationType": "uses"}
                ],
                "runtime": {"workers": 4}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.degenerate_period, DegeneratePeriodPolicy::Skip);
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.runtime.workers, 4);
        assert_eq!(cfg.runtime.queue_capacity, 1024);
        assert_eq!(cfg.max_cascade_depth, 16);
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let err = InferenceConfig::from_json_str(
            r#"{"rules": [
                {"id": "r1", "leftType": "a", "rightType": "b", "creationType": "c"},
                {"id": "r1", "leftType": "a", "rightType": "b", "creationType": "c"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Validation(ValidationError::DuplicateRule { .. })
        ));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = InferenceConfig::from_json_str(r#"{"runtime": {"workers": 0}}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"{"max_cascade_depth": 3}"#).unwrap();
        let cfg = InferenceConfig::from_file(&path).unwrap();
        assert_eq!(cfg.max_cascade_depth, 3);

        assert!(InferenceConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
