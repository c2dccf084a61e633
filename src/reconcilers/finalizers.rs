// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for Bindings.
//!
//! A Binding carries [`BINDING_FINALIZER`] while wrapped objects may exist for it, so that its
//! deletion waits until those wrapped objects are gone.
//!
//! # Example
//!
//! ```rust,ignore
//! use binding_transport::constants::BINDING_FINALIZER;
//! use binding_transport::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
//!
//! async fn reconcile(bindings: &dyn BindingClient, binding: &Binding) -> Result<()> {
//!     if binding.metadata.deletion_timestamp.is_some() {
//!         // delete wrapped objects first
//!         return remove_finalizer(bindings, binding, BINDING_FINALIZER).await;
//!     }
//!     ensure_finalizer(bindings, binding, BINDING_FINALIZER).await?;
//!     // Normal reconciliation logic...
//!     Ok(())
//! }
//! ```

use crate::clients::BindingClient;
use crate::crd::Binding;
use crate::errors::Result;
use kube::ResourceExt;
use tracing::info;

/// Returns true if the resource has the finalizer.
#[must_use]
pub fn has_finalizer(binding: &Binding, finalizer: &str) -> bool {
    binding.finalizers().iter().any(|f| f == finalizer)
}

/// The finalizer list with `finalizer` appended, or `None` if already present.
#[must_use]
pub fn with_finalizer(binding: &Binding, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(binding, finalizer) {
        return None;
    }
    let mut finalizers = binding.finalizers().to_vec();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// The finalizer list without `finalizer`, or `None` if it was absent.
#[must_use]
pub fn without_finalizer(binding: &Binding, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(binding, finalizer) {
        return None;
    }
    let mut finalizers = binding.finalizers().to_vec();
    finalizers.retain(|f| f != finalizer);
    Some(finalizers)
}

/// Add a finalizer to a Binding if not already present.
///
/// The operation is idempotent - calling it multiple times has no effect if the finalizer is
/// already present.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn ensure_finalizer(
    bindings: &dyn BindingClient,
    binding: &Binding,
    finalizer: &str,
) -> Result<()> {
    let Some(finalizers) = with_finalizer(binding, finalizer) else {
        return Ok(());
    };
    let name = binding.name_any();
    bindings.patch_finalizers(&name, finalizers).await?;
    info!(binding = %name, finalizer, "Added finalizer to Binding");
    Ok(())
}

/// Remove a finalizer from a Binding.
///
/// The operation is idempotent - calling it multiple times has no effect if the finalizer is
/// already absent.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn remove_finalizer(
    bindings: &dyn BindingClient,
    binding: &Binding,
    finalizer: &str,
) -> Result<()> {
    let Some(finalizers) = without_finalizer(binding, finalizer) else {
        return Ok(());
    };
    let name = binding.name_any();
    bindings.patch_finalizers(&name, finalizers).await?;
    info!(binding = %name, finalizer, "Removed finalizer from Binding");
    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
