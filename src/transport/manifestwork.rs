// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Open Cluster Management `ManifestWork` transport.
//!
//! Objects go into `spec.workload.manifests[]` in batch order. Each create-only object also
//! gets a `spec.manifestConfigs[]` entry whose `updateStrategy.type` is `CreateOnly`, so the
//! work agent creates it once and never overwrites it.

use super::{GroupKind, Gloss, KindToResource, ObjectId, Transport, Wrapee};
use crate::errors::{Error, Result};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use serde_json::{json, Value};

/// Name of this transport on the command line
pub const TRANSPORT_NAME: &str = "manifestwork";

const MANIFESTWORK_GROUP: &str = "work.open-cluster-management.io";
const MANIFESTWORK_VERSION: &str = "v1";
const MANIFESTWORK_KIND: &str = "ManifestWork";
const MANIFESTWORK_PLURAL: &str = "manifestworks";

const CREATE_ONLY_STRATEGY: &str = "CreateOnly";

/// Wraps workload objects into `ManifestWork` objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifestWorkTransport;

impl Transport for ManifestWorkTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    fn wrapped_object_resource(&self) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(MANIFESTWORK_GROUP, MANIFESTWORK_VERSION, MANIFESTWORK_KIND),
            MANIFESTWORK_PLURAL,
        )
    }

    fn wrap_objects(
        &self,
        wrapees: &[Wrapee],
        kind_to_resource: &KindToResource,
    ) -> Result<DynamicObject> {
        let mut manifests = Vec::with_capacity(wrapees.len());
        let mut configs = Vec::new();

        for wrapee in wrapees {
            let manifest = serde_json::to_value(&wrapee.object)
                .map_err(|e| Error::serialization(format!("manifest {}", wrapee.id()), e))?;
            manifests.push(manifest);

            if wrapee.create_only {
                let id = wrapee.id();
                let gk = GroupKind::new(id.group.as_str(), id.kind.as_str());
                let resource = kind_to_resource.resource_for(&gk).ok_or_else(|| {
                    Error::Transport(format!("no resource known for kind {gk} of {id}"))
                })?;
                configs.push(json!({
                    "resourceIdentifier": {
                        "group": id.group,
                        "resource": resource,
                        "namespace": id.namespace,
                        "name": id.name,
                    },
                    "updateStrategy": { "type": CREATE_ONLY_STRATEGY },
                }));
            }
        }

        let mut spec = json!({ "workload": { "manifests": manifests } });
        if !configs.is_empty() {
            spec["manifestConfigs"] = Value::Array(configs);
        }

        Ok(DynamicObject::new("", &self.wrapped_object_resource()).data(json!({ "spec": spec })))
    }

    fn unwrap_objects(
        &self,
        wrapped: &DynamicObject,
        _kind_to_resource: &KindToResource,
    ) -> Result<Gloss> {
        let mut gloss = Gloss::new();
        let Some(manifests) = wrapped.data.pointer("/spec/workload/manifests") else {
            return Ok(gloss);
        };
        let manifests = manifests.as_array().ok_or_else(|| {
            Error::Transport("spec.workload.manifests of ManifestWork is not a list".to_string())
        })?;

        for (idx, manifest) in manifests.iter().enumerate() {
            let object: DynamicObject = serde_json::from_value(manifest.clone()).map_err(|e| {
                Error::Transport(format!("manifests[{idx}] is not a Kubernetes object: {e}"))
            })?;
            gloss.insert(ObjectId::of(&object));
        }
        Ok(gloss)
    }
}

#[cfg(test)]
#[path = "manifestwork_tests.rs"]
mod manifestwork_tests;
