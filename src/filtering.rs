// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Destination-independent transformation of workload objects.
//!
//! Three kinds of content are removed, in this order:
//!
//! 1. Fields every API object carries that only make sense in the source cluster
//!    (see [`clean_object`]).
//! 2. Fields specific to a kind and fixed in code, e.g. a Job's generated selector
//!    (see [`clean_kind_specifics`]).
//! 3. Fields named by `CustomTransform` objects for the object's resource type.

use crate::constants::{LAST_APPLIED_ANNOTATION, PRESERVE_ANNOTATION, PRESERVE_NODE_PORT};
use crate::errors::{Error, Result};
use crate::jsonpath::Query;
use crate::transport::GroupKind;
use kube::api::DynamicObject;
use serde_json::{Map, Value};

const METADATA_FIELDS_TO_STRIP: &[&str] = &[
    "managedFields",
    "finalizers",
    "generation",
    "ownerReferences",
    "selfLink",
    "resourceVersion",
    "uid",
    "generateName",
];

const JOB_CONTROLLER_UID_LABELS: &[&str] = &["controller-uid", "batch.kubernetes.io/controller-uid"];
const JOB_TRACKING_ANNOTATION: &str = "batch.kubernetes.io/job-tracking";

const SERVICE_SPEC_FIELDS_TO_STRIP: &[&str] = &[
    "ipFamilies",
    "ipFamilyPolicy",
    "internalTrafficPolicy",
    "externalTrafficPolicy",
];

/// Applies all three kinds of removal to a copy of `object`.
///
/// # Errors
///
/// Returns an error if the object cannot be converted to or from JSON.
pub fn transform_object(object: &DynamicObject, removes: &[Query]) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(object)
        .map_err(|e| Error::serialization("workload object", e))?;

    clean_object(&mut value);
    if let Some(gk) = GroupKind::of(object) {
        clean_kind_specifics(&gk, &mut value);
    }
    for query in removes {
        query.remove_from(&mut value);
    }

    serde_json::from_value(value).map_err(|e| Error::serialization("transformed workload object", e))
}

/// Strips source-cluster bookkeeping and the status subtree.
pub fn clean_object(value: &mut Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in METADATA_FIELDS_TO_STRIP {
            metadata.remove(*field);
        }
        remove_keys_from_map(metadata, "annotations", &[LAST_APPLIED_ANNOTATION]);
    }
    remove_field(value, "status");
}

/// Strips fields that are specific to the object's kind.
pub fn clean_kind_specifics(gk: &GroupKind, value: &mut Value) {
    match (gk.group.as_str(), gk.kind.as_str()) {
        ("batch", "Job") => clean_job(value),
        ("", "Service") => clean_service(value),
        _ => {}
    }
}

fn clean_job(value: &mut Value) {
    if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        remove_keys_from_map(metadata, "annotations", &[JOB_TRACKING_ANNOTATION]);
        remove_keys_from_map(metadata, "labels", JOB_CONTROLLER_UID_LABELS);
    }
    if let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove("selector");
        spec.remove("suspend");
        if let Some(pod_metadata) = spec
            .get_mut("template")
            .and_then(|t| t.get_mut("metadata"))
            .and_then(Value::as_object_mut)
        {
            remove_keys_from_map(pod_metadata, "labels", JOB_CONTROLLER_UID_LABELS);
        }
    }
    remove_field(value, "status");
}

fn clean_service(value: &mut Value) {
    let preserve_node_ports = value
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(PRESERVE_ANNOTATION))
        .and_then(Value::as_str)
        .is_some_and(|v| v.split(',').any(|item| item.trim() == PRESERVE_NODE_PORT));

    let Some(spec) = value.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    let headless = spec.get("clusterIP").and_then(Value::as_str) == Some("None");
    if !headless {
        spec.remove("clusterIP");
        spec.remove("clusterIPs");
    }
    for field in SERVICE_SPEC_FIELDS_TO_STRIP {
        spec.remove(*field);
    }
    if !preserve_node_ports {
        if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut().filter_map(Value::as_object_mut) {
                port.remove("nodePort");
            }
        }
    }
}

fn remove_field(value: &mut Value, field: &str) {
    if let Some(map) = value.as_object_mut() {
        map.remove(field);
    }
}

/// Removes `keys` from the string map at `parent[field]`, dropping the map when it empties.
fn remove_keys_from_map(parent: &mut Map<String, Value>, field: &str, keys: &[&str]) {
    let Some(map) = parent.get_mut(field).and_then(Value::as_object_mut) else {
        return;
    };
    let before = map.len();
    for key in keys {
        map.remove(*key);
    }
    if map.is_empty() && before > 0 {
        parent.remove(field);
    }
}

#[cfg(test)]
#[path = "filtering_tests.rs"]
mod filtering_tests;
