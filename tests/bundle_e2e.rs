use serde_json::{json, Value};

use stixrule::{BundleBuilder, StixObject, STIX_SPEC_VERSION};

fn obj(value: Value) -> StixObject {
    StixObject::new(value).unwrap()
}

/// Splits a stream of objects into bundles the way a producer loop does:
/// start a new bundle whenever the next group conflicts with the current one.
fn split(groups: Vec<Vec<StixObject>>) -> Vec<BundleBuilder> {
    let mut bundles = vec![BundleBuilder::new()];
    for group in groups {
        let fits = bundles.last().is_some_and(|b| b.can_add_objects(&group));
        if !fits {
            bundles.push(BundleBuilder::new());
        }
        if let Some(current) = bundles.last_mut() {
            current.add_objects(group);
        }
    }
    bundles
}

#[test]
fn conflicting_versions_land_in_separate_bundles() {
    let identity = obj(json!({"id": "identity--1", "type": "identity", "name": "ACME"}));
    let renamed = obj(json!({"id": "identity--1", "type": "identity", "name": "ACME Corp"}));
    let report = obj(json!({"id": "report--1", "type": "report", "object_refs": ["identity--1"]}));

    let bundles = split(vec![
        vec![identity.clone(), report.clone()],
        vec![identity],
        vec![renamed.clone(), report],
    ]);
    assert_eq!(bundles.len(), 2);

    let first = bundles[0].build();
    assert_eq!(first.objects.len(), 2);
    assert_eq!(first.spec_version, STIX_SPEC_VERSION);

    let second = bundles[1].build();
    assert_eq!(second.objects[0], renamed);
    assert_ne!(first.id, second.id);
}

#[test]
fn built_bundles_never_repeat_ids() {
    let mut builder = BundleBuilder::new();
    for round in 0..5 {
        for id in ["a", "b", "c"] {
            builder.add_object(obj(json!({"id": id, "type": "T", "round": round})));
        }
    }
    assert_eq!(builder.len(), 15);

    let bundle = builder.build();
    let ids: Vec<&str> = bundle.objects.iter().map(StixObject::id).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(bundle.objects.iter().all(|o| o.get("round") == Some(&json!(0))));
}

#[test]
fn bundle_round_trips_through_json() {
    let mut builder = BundleBuilder::new();
    builder.add_object(obj(json!({
        "id": "relationship--1",
        "type": "relationship",
        "relationship_type": "targets",
        "extensions": {"ext": {"x": 1}}
    })));
    let json = builder.build().to_json().unwrap();
    let value: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["id"], builder.id());
    assert_eq!(value["objects"][0]["extensions"]["ext"]["x"], 1);
}
