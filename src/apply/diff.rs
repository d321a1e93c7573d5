//! Semantic comparison of desired and stored records
//!
//! Only the parts the compiler controls are compared: `spec` (or `data` for
//! ConfigMaps), labels and owner references. Server-managed metadata and
//! the reference fields the API server defaults are ignored, so an unchanged
//! record never produces a write while any other out-of-band edit does.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::registry::DownstreamKind;
use crate::resources::SIDECAR_CONFIG_KEY;
use crate::selector;

/// The fields of a record the controller owns
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Labels on the record
    pub labels: BTreeMap<String, String>,
    /// Owner references on the record
    pub owner_references: Vec<OwnerReference>,
    /// `spec`, or decoded `data` for ConfigMaps
    pub body: Value,
}

impl Projection {
    /// Project a record of the given kind
    pub fn of(kind: DownstreamKind, obj: &DynamicObject) -> Self {
        let body = match kind {
            DownstreamKind::ConfigMap => decode_config_data(obj.data.get("data")),
            _ => obj.data.get("spec").cloned().unwrap_or(Value::Null),
        };
        Self {
            labels: obj.metadata.labels.clone().unwrap_or_default(),
            owner_references: obj.metadata.owner_references.clone().unwrap_or_default(),
            body,
        }
    }
}

/// Decode the sidecar document so key order and quoting do not matter
fn decode_config_data(data: Option<&Value>) -> Value {
    let Some(Value::Object(map)) = data else {
        return Value::Null;
    };
    let decoded = map
        .iter()
        .map(|(key, value)| {
            let parsed = match (key.as_str(), value.as_str()) {
                (SIDECAR_CONFIG_KEY, Some(text)) => serde_yaml::from_str::<Value>(text)
                    .unwrap_or_else(|_| value.clone()),
                _ => value.clone(),
            };
            (key.clone(), parsed)
        })
        .collect();
    Value::Object(decoded)
}

/// Whether `stored` already matches `desired` for everything the controller owns.
///
/// Labels compare as "desired is contained in stored" so labels added by
/// others do not force a rewrite. The body and owner references must match
/// exactly, apart from the reference fields the API server defaults (see
/// [`server_default`]) and empty collections the server omits.
pub fn is_up_to_date(kind: DownstreamKind, desired: &DynamicObject, stored: &DynamicObject) -> bool {
    let want = Projection::of(kind, desired);
    let have = Projection::of(kind, stored);

    if !selector::matches(&have.labels, &want.labels) {
        return false;
    }
    if want.owner_references != have.owner_references {
        return false;
    }
    match kind {
        DownstreamKind::ConfigMap => want.body == have.body,
        _ => is_equivalent(&want.body, &have.body),
    }
}

/// Structural equality of a desired and a stored body.
///
/// A key present on only one side is a difference unless its value is an
/// empty collection, or it is missing from `desired` and `stored` carries the
/// API server's default for it. Arrays compare element-wise; numbers compare
/// by value.
pub fn is_equivalent(desired: &Value, stored: &Value) -> bool {
    equivalent_under(None, desired, stored)
}

fn equivalent_under(parent: Option<&str>, desired: &Value, stored: &Value) -> bool {
    match (desired, stored) {
        (Value::Object(want), Value::Object(have)) => {
            let wanted = want.iter().all(|(key, value)| match have.get(key) {
                Some(existing) => equivalent_under(Some(key), value, existing),
                None => is_empty_collection(value),
            });
            let extra_tolerated = have
                .iter()
                .filter(|(key, _)| !want.contains_key(key.as_str()))
                .all(|(key, value)| {
                    is_empty_collection(value)
                        || parent
                            .and_then(|list| server_default(list, key))
                            .is_some_and(|default| numbers_equal(&default, value))
                });
            wanted && extra_tolerated
        }
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len()
                && want
                    .iter()
                    .zip(have)
                    .all(|(w, h)| equivalent_under(parent, w, h))
        }
        (want, Value::Null) => is_empty_collection(want),
        (Value::Null, have) => is_empty_collection(have),
        (want, have) => numbers_equal(want, have),
    }
}

/// Default the Gateway API server fills in on an element of a reference list
fn server_default(list: &str, field: &str) -> Option<Value> {
    match (list, field) {
        ("backendRefs", "group") => Some(Value::from("")),
        ("backendRefs", "kind") => Some(Value::from("Service")),
        ("backendRefs", "weight") => Some(Value::from(1)),
        ("parentRefs", "group") => Some(Value::from("gateway.networking.k8s.io")),
        ("parentRefs", "kind") => Some(Value::from("Gateway")),
        _ => None,
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}
