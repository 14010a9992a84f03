//! Built-in relation-to-relation rules.

use super::definition::{RelationTypes, RuleDefinition};

/// Rule id of [`attribution_attribution`].
pub const ATTRIBUTION_ATTRIBUTION: &str = "attribution_attribution";
/// Rule id of [`location_location`].
pub const LOCATION_LOCATION: &str = "location_location";
/// Rule id of [`location_targets`].
pub const LOCATION_TARGETS: &str = "location_targets";
/// Rule id of [`part_part`].
pub const PART_PART: &str = "part_part";

/// Attribution propagation: A attributed-to B, B attributed-to C gives A attributed-to C.
#[must_use]
pub fn attribution_attribution() -> RuleDefinition {
    RuleDefinition::new(
        ATTRIBUTION_ATTRIBUTION,
        RelationTypes::new("attributed-to", "attributed-to", "attributed-to"),
    )
    .with_name("Attribution propagation")
    .with_description("Propagate attribution through chains of attributed-to relationships")
}

/// Location propagation: A located-at B, B located-at C gives A located-at C.
#[must_use]
pub fn location_location() -> RuleDefinition {
    RuleDefinition::new(
        LOCATION_LOCATION,
        RelationTypes::new("located-at", "located-at", "located-at"),
    )
    .with_name("Location propagation")
    .with_description("Propagate location through chains of located-at relationships")
}

/// Targeting propagation: A targets B, B located-at C gives A targets C.
#[must_use]
pub fn location_targets() -> RuleDefinition {
    RuleDefinition::new(
        LOCATION_TARGETS,
        RelationTypes::new("targets", "located-at", "targets"),
    )
    .with_name("Targeting propagation via location")
    .with_description("An entity targeting something located somewhere also targets that location")
}

/// Membership propagation: A part-of B, B part-of C gives A part-of C.
#[must_use]
pub fn part_part() -> RuleDefinition {
    RuleDefinition::new(PART_PART, RelationTypes::new("part-of", "part-of", "part-of"))
        .with_name("Part-of propagation")
        .with_description("Propagate membership through chains of part-of relationships")
}

/// Every built-in rule, in a stable order.
#[must_use]
pub fn builtin_rules() -> Vec<RuleDefinition> {
    vec![
        attribution_attribution(),
        location_location(),
        location_targets(),
        part_part(),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_builtin_rules_are_valid_and_unique() {
        let rules = builtin_rules();
        let ids: HashSet<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids.len(), rules.len());
        for rule in &rules {
            rule.validate().unwrap();
            assert!(!rule.name.is_empty());
        }
    }
}
