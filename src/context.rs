// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the controller: API clients and reflector stores.
//!
//! The controller talks to two API servers:
//! - the workload description space (WDS), holding Bindings, `CustomTransform`s and the
//!   workload objects themselves
//! - the inventory and transport space (ITS), holding inventory entries, property
//!   `ConfigMap`s and wrapped objects
//!
//! The stores enable in-memory lookups so that caches never call the API server while
//! holding their locks.

use crate::clients::{BindingClient, WorkloadSource, WrappedObjectClient};
use crate::constants::CONTROLLER_NAME;
use crate::controller::inventory_resource;
use crate::crd::{
    Binding, BindingStatus, CustomTransform, CustomTransformStatus, GroupResource,
    WorkloadObjectRef,
};
use crate::errors::{is_not_found, Result};
use crate::properties::{InventoryEntry, PropertyRecord, PropertySource};
use crate::transform_cache::{TransformRuleSource, TransformStatusWriter};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Shared context passed to the reconciler and the caches.
#[derive(Clone)]
pub struct Context {
    /// Client for the workload description space
    pub wds_client: Client,

    /// Client for the inventory and transport space
    pub its_client: Client,

    /// Reflector stores, populated by the controller's watch tasks
    pub stores: Stores,
}

/// Collection of reflector stores for cache lookups.
///
/// Lookups by name go through the store's key. Lookups by resource type scan the store.
#[derive(Clone)]
pub struct Stores {
    // WDS
    pub bindings: Store<Binding>,
    pub custom_transforms: Store<CustomTransform>,

    // ITS
    pub inventory: Store<DynamicObject>,
    pub property_configmaps: Store<ConfigMap>,

    /// The one namespace `property_configmaps` is filled from
    pub property_namespace: String,
}

impl Stores {
    /// Get a `Binding` by name from the store.
    #[must_use]
    pub fn get_binding(&self, name: &str) -> Option<Arc<Binding>> {
        self.bindings.get(&ObjectRef::new(name))
    }

    /// All `CustomTransform`s that target the given resource type.
    #[must_use]
    pub fn custom_transforms_for(&self, gr: &GroupResource) -> Vec<Arc<CustomTransform>> {
        self.custom_transforms
            .state()
            .into_iter()
            .filter(|rule| rule.spec.group_resource() == *gr)
            .collect()
    }

    /// Get a `CustomTransform` by name from the store.
    #[must_use]
    pub fn get_custom_transform(&self, name: &str) -> Option<Arc<CustomTransform>> {
        self.custom_transforms.get(&ObjectRef::new(name))
    }

    /// Get an inventory entry by name from the store.
    #[must_use]
    pub fn get_inventory_entry(&self, name: &str) -> Option<Arc<DynamicObject>> {
        self.inventory
            .get(&ObjectRef::new_with(name, inventory_resource()))
    }

    /// Get a property `ConfigMap` by name from the store.
    #[must_use]
    pub fn get_property_configmap(&self, name: &str) -> Option<Arc<ConfigMap>> {
        self.property_configmaps
            .get(&ObjectRef::new(name).within(&self.property_namespace))
    }
}

impl TransformRuleSource for Stores {
    fn rules_for(&self, gr: &GroupResource) -> Vec<Arc<CustomTransform>> {
        self.custom_transforms_for(gr)
    }

    fn get(&self, name: &str) -> Option<Arc<CustomTransform>> {
        self.get_custom_transform(name)
    }
}

impl PropertySource for Stores {
    fn inventory_entry(&self, name: &str) -> Option<InventoryEntry> {
        self.get_inventory_entry(name).map(|entry| InventoryEntry {
            labels: entry.labels().clone(),
            annotations: entry.annotations().clone(),
        })
    }

    fn property_record(&self, name: &str) -> Option<PropertyRecord> {
        self.get_property_configmap(name).map(|cm| PropertyRecord {
            data: cm.data.clone().unwrap_or_default(),
            binary_data: cm
                .binary_data
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|(key, bytes)| (key, bytes.0))
                .collect(),
        })
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..PatchParams::default()
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(CONTROLLER_NAME.to_string()),
        ..PostParams::default()
    }
}

/// Bindings read from the store and written through the WDS API.
pub struct KubeBindings {
    api: Api<Binding>,
    stores: Stores,
}

impl KubeBindings {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            api: Api::all(ctx.wds_client.clone()),
            stores: ctx.stores.clone(),
        }
    }
}

#[async_trait]
impl BindingClient for KubeBindings {
    fn get(&self, name: &str) -> Option<Arc<Binding>> {
        self.stores.get_binding(name)
    }

    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<()> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_status(&self, name: &str, status: &BindingStatus) -> Result<()> {
        // Lists are spelled out so that a merge patch clears stale entries.
        let patch = json!({
            "status": {
                "observedGeneration": status.observed_generation,
                "errors": status.errors,
            }
        });
        self.api
            .patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Workload objects fetched from the WDS API by group, version and resource.
pub struct KubeWorkloadSource {
    client: Client,
}

impl KubeWorkloadSource {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            client: ctx.wds_client.clone(),
        }
    }
}

/// `ApiResource` for a reference that names a resource but not a kind.
fn api_resource_for(reference: &WorkloadObjectRef<'_>) -> ApiResource {
    let api_version = if reference.group.is_empty() {
        reference.version.to_string()
    } else {
        format!("{}/{}", reference.group, reference.version)
    };
    ApiResource {
        group: reference.group.to_string(),
        version: reference.version.to_string(),
        api_version,
        kind: String::new(),
        plural: reference.resource.to_string(),
    }
}

#[async_trait]
impl WorkloadSource for KubeWorkloadSource {
    async fn get(&self, reference: &WorkloadObjectRef<'_>) -> Result<Option<DynamicObject>> {
        let ar = api_resource_for(reference);
        let api: Api<DynamicObject> = match reference.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api.get_opt(reference.name).await?)
    }
}

/// Wrapped objects in the ITS, of the transport's carrier kind.
pub struct KubeWrappedObjects {
    client: Client,
    resource: ApiResource,
}

impl KubeWrappedObjects {
    #[must_use]
    pub fn new(ctx: &Context, resource: ApiResource) -> Self {
        Self {
            client: ctx.its_client.clone(),
            resource,
        }
    }

    fn namespaced(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait]
impl WrappedObjectClient for KubeWrappedObjects {
    async fn list(&self, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &self.resource);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
        Ok(self.namespaced(namespace).get_opt(name).await?)
    }

    async fn create(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
        Ok(self.namespaced(namespace).create(&post_params(), object).await?)
    }

    async fn replace(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
        let name = object.name_any();
        Ok(self
            .namespaced(namespace)
            .replace(&name, &post_params(), object)
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .namespaced(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// A `CustomTransform` status waiting to be written.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingStatus {
    pub name: String,
    pub status: CustomTransformStatus,
}

/// Writes `CustomTransform` status from a single background task, in the order the digests
/// produced them. Failures are logged.
pub struct KubeTransformStatus {
    pending: mpsc::UnboundedSender<PendingStatus>,
}

impl KubeTransformStatus {
    /// Starts the writer task. It ends once the returned value is dropped.
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        let api: Api<CustomTransform> = Api::all(ctx.wds_client.clone());
        let (pending, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_statuses(rx, move |name, patch| {
            let api = api.clone();
            async move {
                api.patch_status(&name, &patch_params(), &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
            }
        }));
        Self { pending }
    }
}

impl TransformStatusWriter for KubeTransformStatus {
    fn write_status(&self, rule: &CustomTransform, status: CustomTransformStatus) {
        let name = rule.name_any();
        if self
            .pending
            .send(PendingStatus {
                name: name.clone(),
                status,
            })
            .is_err()
        {
            error!(custom_transform = %name, "CustomTransform status writer has stopped");
        }
    }
}

/// Merge patch that sets every status field, so stale lists are cleared.
#[must_use]
pub fn transform_status_patch(status: &CustomTransformStatus) -> serde_json::Value {
    json!({
        "status": {
            "observedGeneration": status.observed_generation,
            "errors": status.errors,
            "warnings": status.warnings,
        }
    })
}

/// Applies queued statuses one at a time until every sender is gone.
pub async fn write_statuses<F, Fut>(mut rx: mpsc::UnboundedReceiver<PendingStatus>, mut patch: F)
where
    F: FnMut(String, serde_json::Value) -> Fut,
    Fut: Future<Output = kube::Result<()>>,
{
    while let Some(PendingStatus { name, status }) = rx.recv().await {
        match patch(name.clone(), transform_status_patch(&status)).await {
            Ok(()) => debug!(
                custom_transform = %name,
                observed_generation = status.observed_generation,
                "Updated CustomTransform status"
            ),
            Err(e) => error!(
                custom_transform = %name,
                error = %e,
                "Failed to update CustomTransform status"
            ),
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
