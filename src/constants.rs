// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the binding transport controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the `Binding` and `CustomTransform` CRDs
pub const API_GROUP: &str = "control.kubestellar.io";

/// API version for the `Binding` and `CustomTransform` CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Kind name for `Binding` resource
pub const KIND_BINDING: &str = "Binding";

/// Kind name for `CustomTransform` resource
pub const KIND_CUSTOM_TRANSFORM: &str = "CustomTransform";

/// Field manager used for every write this controller makes
pub const CONTROLLER_NAME: &str = "transport-controller";

// ============================================================================
// Wrapped Object Labels and Annotations
// ============================================================================

/// Finalizer that keeps a `Binding` around until its wrapped objects are gone
pub const BINDING_FINALIZER: &str = "transport.kubestellar.io/object-cleanup";

/// Label carrying the name of the `Binding` a wrapped object came from
pub const ORIGIN_BINDING_LABEL: &str = "transport.kubestellar.io/originOwnerReferenceBindingKey";

/// Label carrying the name of the workload description space a wrapped object came from
pub const ORIGIN_WDS_LABEL: &str = "transport.kubestellar.io/originWdsName";

/// Annotation carrying the generation of the origin `Binding`
pub const ORIGIN_GENERATION_ANNOTATION: &str =
    "transport.kubestellar.io/originOwnerReferenceBindingGeneration";

// ============================================================================
// Workload Object Annotations
// ============================================================================

/// Annotation by which a workload object opts in to per-destination template expansion
pub const TEMPLATE_EXPANSION_ANNOTATION: &str = "control.kubestellar.io/expand-templates";

/// Annotation listing Service fields that must survive filtering
pub const PRESERVE_ANNOTATION: &str = "control.kubestellar.io/preserve";

/// Value of [`PRESERVE_ANNOTATION`] that keeps Service node ports
pub const PRESERVE_NODE_PORT: &str = "nodeport";

/// Annotation written by `kubectl apply`
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

// ============================================================================
// Customization Properties
// ============================================================================

/// Property that is always defined and holds the inventory name of the destination
pub const CLUSTER_NAME_PROPERTY: &str = "clusterName";

/// Default namespace, in the inventory space, holding the property `ConfigMap`s
pub const DEFAULT_PROPERTY_NAMESPACE: &str = "customization-properties";

/// API group of the inventory objects describing destinations
pub const INVENTORY_GROUP: &str = "cluster.open-cluster-management.io";

/// API version of the inventory objects
pub const INVENTORY_VERSION: &str = "v1";

/// Kind of the inventory objects
pub const INVENTORY_KIND: &str = "ManagedCluster";

/// Resource (plural) of the inventory objects
pub const INVENTORY_RESOURCE: &str = "managedclusters";

/// Interval between attempts to create the property namespace at start-up
pub const PROPERTY_NAMESPACE_RETRY_SECS: u64 = 10;

// ============================================================================
// Wrapping Defaults
// ============================================================================

/// Default upper bound on the serialized size of one wrapped object (bytes)
pub const DEFAULT_MAX_SIZE_WRAPPED: usize = 512_000;

/// Default upper bound on the number of workload objects in one wrapped object
pub const DEFAULT_MAX_NUM_WRAPPED: usize = 50;

/// Default number of worker tasks draining the work queue
pub const DEFAULT_WORKERS: usize = 4;

// ============================================================================
// Work Queue Rate Limiting
// ============================================================================

/// First retry delay after a failure (5 milliseconds)
pub const QUEUE_BASE_DELAY_MILLIS: u64 = 5;

/// Cap on the retry delay (1000 seconds)
pub const QUEUE_MAX_DELAY_SECS: u64 = 1000;

/// Growth factor applied per consecutive failure
pub const QUEUE_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
pub const QUEUE_RANDOMIZATION_FACTOR: f64 = 0.1;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads in the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
