// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) consumed by the transport controller.
//!
//! # Resource Types
//!
//! - [`Binding`] - Which workload objects go to which destination clusters
//! - [`CustomTransform`] - Per resource-type removals applied before wrapping
//!
//! Both kinds are cluster-scoped and have a status subresource.
//!
//! # Example: A Binding
//!
//! ```rust,no_run
//! use binding_transport::crd::{
//!     Binding, BindingSpec, ClusterScopeReference, Destination, WorkloadReferences,
//! };
//!
//! let binding = Binding::new(
//!     "b1",
//!     BindingSpec {
//!         workload: WorkloadReferences {
//!             cluster_scope: vec![ClusterScopeReference {
//!                 group: "rbac.authorization.k8s.io".to_string(),
//!                 version: "v1".to_string(),
//!                 resource: "clusterroles".to_string(),
//!                 name: "reader".to_string(),
//!                 resource_version: "42".to_string(),
//!                 create_only: false,
//!             }],
//!             namespace_scope: vec![],
//!         },
//!         destinations: vec![Destination {
//!             cluster_id: "cluster1".to_string(),
//!         }],
//!     },
//! );
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `Binding` is the resolution of a placement decision: an explicit list of workload objects
/// and an explicit list of destinations. Every listed object is propagated to every listed
/// destination.
///
/// # Example
///
/// ```yaml
/// apiVersion: control.kubestellar.io/v1alpha1
/// kind: Binding
/// metadata:
///   name: b1
/// spec:
///   workload:
///     clusterScope:
///       - group: rbac.authorization.k8s.io
///         version: v1
///         resource: clusterroles
///         name: reader
///         resourceVersion: "42"
///     namespaceScope:
///       - group: apps
///         version: v1
///         resource: deployments
///         namespace: demo
///         name: web
///         resourceVersion: "77"
///         createOnly: true
///   destinations:
///     - clusterId: cluster1
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "control.kubestellar.io",
    version = "v1alpha1",
    kind = "Binding",
    shortname = "bdg",
    doc = "Binding lists the workload objects to propagate and the destination clusters to propagate them to."
)]
#[kube(status = "BindingStatus")]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    /// Workload objects to propagate, in declaration order.
    #[serde(default)]
    pub workload: WorkloadReferences,

    /// Clusters the workload objects should be propagated to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Destination>,
}

/// The cluster-scoped and namespace-scoped objects referenced by a [`Binding`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReferences {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_scope: Vec<ClusterScopeReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_scope: Vec<NamespaceScopeReference>,
}

/// One cluster-scoped workload object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterScopeReference {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// Resource (lowercase plural), not kind.
    pub resource: String,
    pub name: String,
    /// Resource version of the object as seen when the Binding was written.
    #[serde(default)]
    pub resource_version: String,
    /// When true the object is created in the destination but never updated there.
    #[serde(default)]
    pub create_only: bool,
}

/// One namespace-scoped workload object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceScopeReference {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub create_only: bool,
}

/// A destination cluster. Its mailbox namespace in the inventory space is `cluster_id`.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(default)]
    pub cluster_id: String,
}

impl Destination {
    /// Namespace, in the inventory space, that holds wrapped objects for this destination.
    #[must_use]
    pub fn mailbox(&self) -> &str {
        &self.cluster_id
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cluster_id)
    }
}

/// Status of a [`Binding`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    #[serde(default)]
    pub observed_generation: i64,

    /// User-facing problems found while processing the Binding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// A borrowed view of one workload object reference, cluster- or namespace-scoped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkloadObjectRef<'a> {
    pub group: &'a str,
    pub version: &'a str,
    pub resource: &'a str,
    pub namespace: Option<&'a str>,
    pub name: &'a str,
    pub create_only: bool,
}

impl WorkloadObjectRef<'_> {
    #[must_use]
    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(self.group, self.resource)
    }
}

impl fmt::Display for WorkloadObjectRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let api_version = if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        match self.namespace {
            Some(ns) => write!(f, "{api_version} {} {ns}/{}", self.resource, self.name),
            None => write!(f, "{api_version} {} {}", self.resource, self.name),
        }
    }
}

impl BindingSpec {
    /// All referenced workload objects: cluster-scoped first, then namespace-scoped, each in
    /// declaration order. Shard assignment depends on this order being stable.
    pub fn object_references(&self) -> impl Iterator<Item = WorkloadObjectRef<'_>> {
        let cluster = self
            .workload
            .cluster_scope
            .iter()
            .map(|r| WorkloadObjectRef {
                group: &r.group,
                version: &r.version,
                resource: &r.resource,
                namespace: None,
                name: &r.name,
                create_only: r.create_only,
            });
        let namespaced = self
            .workload
            .namespace_scope
            .iter()
            .map(|r| WorkloadObjectRef {
                group: &r.group,
                version: &r.version,
                resource: &r.resource,
                namespace: Some(&r.namespace),
                name: &r.name,
                create_only: r.create_only,
            });
        cluster.chain(namespaced)
    }
}

/// `CustomTransform` declares fields to remove from every workload object of one resource
/// type before it is wrapped.
///
/// # Example
///
/// ```yaml
/// apiVersion: control.kubestellar.io/v1alpha1
/// kind: CustomTransform
/// metadata:
///   name: drop-env-label
/// spec:
///   apiGroup: rbac.authorization.k8s.io
///   resource: clusterroles
///   remove:
///     - '$.metadata.labels["env"]'
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "control.kubestellar.io",
    version = "v1alpha1",
    kind = "CustomTransform",
    shortname = "ct",
    doc = "CustomTransform lists JSONPath-style removals applied to workload objects of one resource type."
)]
#[kube(status = "CustomTransformStatus")]
#[serde(rename_all = "camelCase")]
pub struct CustomTransformSpec {
    /// API group of the targeted resource; empty for the core group.
    #[serde(default)]
    pub api_group: String,

    /// Resource (lowercase plural) targeted by this transform.
    pub resource: String,

    /// Removal queries, each starting with `$`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

impl CustomTransformSpec {
    #[must_use]
    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.api_group, &self.resource)
    }
}

/// Status of a [`CustomTransform`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomTransformStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A resource type: API group plus resource name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

impl GroupResource {
    pub fn new(group: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for GroupResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.resource)
        } else {
            write!(f, "{}.{}", self.resource, self.group)
        }
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
