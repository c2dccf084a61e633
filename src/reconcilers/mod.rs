// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for Bindings.
//!
//! # Reconciliation Architecture
//!
//! The transport controller follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Bindings, `CustomTransform`s, inventory entries and property records are
//!    watched and turned into work items (see [`crate::controller`])
//! 2. **Reconcile** - The desired wrapped objects are computed from the Binding and its
//!    workload objects
//! 3. **Update** - Wrapped objects in each destination's mailbox namespace are created,
//!    replaced or deleted to match
//! 4. **Status** - User errors are reported back in the Binding's status
//!
//! # Modules
//!
//! - [`binding`] - The Binding reconciler
//! - [`finalizers`] - Cleanup finalizer helpers
//! - [`status`] - Binding status helpers
//! - [`retry`] - Backoff and per-item rate limiting for the work queue

pub mod binding;
pub mod finalizers;
pub mod retry;
pub mod status;

pub use binding::{BindingReconciler, DesiredState, DesiredWrapped};
