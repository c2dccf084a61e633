// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access to the API servers the Binding reconciler talks to.
//!
//! - [`BindingClient`] - Bindings in the workload description space (WDS)
//! - [`WorkloadSource`] - workload objects in the WDS
//! - [`WrappedObjectClient`] - wrapped objects in the inventory and transport space (ITS)
//!
//! Kubernetes-backed implementations live in [`crate::context`].

use crate::crd::{Binding, BindingStatus, WorkloadObjectRef};
use crate::errors::Result;
use async_trait::async_trait;
use kube::api::DynamicObject;
use std::sync::Arc;

/// Bindings: read from the reflector cache, written to the API server.
#[async_trait]
pub trait BindingClient: Send + Sync {
    /// The cached Binding, if it exists.
    fn get(&self, name: &str) -> Option<Arc<Binding>>;

    /// Replaces the finalizer list of the named Binding.
    async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<()>;

    /// Writes the status subresource of the named Binding.
    async fn patch_status(&self, name: &str, status: &BindingStatus) -> Result<()>;
}

/// Workload objects referenced by Bindings.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Fetches the referenced object. `Ok(None)` means it does not exist.
    async fn get(&self, reference: &WorkloadObjectRef<'_>) -> Result<Option<DynamicObject>>;
}

/// Wrapped objects of the configured transport.
#[async_trait]
pub trait WrappedObjectClient: Send + Sync {
    /// Lists wrapped objects in all namespaces matching a label selector.
    async fn list(&self, label_selector: &str) -> Result<Vec<DynamicObject>>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>>;

    async fn create(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject>;

    async fn replace(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject>;

    /// Deletes the named object. Returns false if it was already gone.
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool>;
}
