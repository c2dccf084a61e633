// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status helpers for Bindings.
//!
//! A Binding's status records the generation last processed and the user errors found while
//! processing it. Status is written only when one of those changes, so that a steady-state
//! reconciliation issues no writes at all.

use crate::clients::BindingClient;
use crate::crd::{Binding, BindingStatus};
use crate::errors::Result;
use kube::ResourceExt;
use tracing::{debug, info};

/// The status a Binding should have after a pass that found `errors`.
#[must_use]
pub fn desired_status(binding: &Binding, errors: Vec<String>) -> BindingStatus {
    BindingStatus {
        observed_generation: binding.metadata.generation.unwrap_or_default(),
        errors,
    }
}

/// Check if the status has changed compared to the Binding's current status.
///
/// A missing status counts as the default status.
#[must_use]
pub fn status_changed(binding: &Binding, desired: &BindingStatus) -> bool {
    let current = binding.status.clone().unwrap_or_default();
    current != *desired
}

/// Writes `desired` if it differs from the Binding's current status.
///
/// # Errors
///
/// Returns an error if the status patch fails.
pub async fn update_status_if_changed(
    bindings: &dyn BindingClient,
    binding: &Binding,
    desired: &BindingStatus,
) -> Result<()> {
    let name = binding.name_any();
    if !status_changed(binding, desired) {
        debug!(binding = %name, "Binding status unchanged, skipping update");
        return Ok(());
    }
    bindings.patch_status(&name, desired).await?;
    info!(
        binding = %name,
        observed_generation = desired.observed_generation,
        errors = desired.errors.len(),
        "Updated Binding status"
    );
    Ok(())
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
