// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # binding-transport - Binding transport controller for Kubernetes
//!
//! A transport controller watches `Binding` objects in a workload description space (WDS)
//! and keeps, in the mailbox namespace of each destination cluster in the inventory and
//! transport space (ITS), a set of "wrapped" objects that carry the Binding's workload
//! objects to that cluster.
//!
//! ## Overview
//!
//! For each Binding the controller:
//!
//! - Fetches the referenced workload objects and strips source-cluster bookkeeping
//! - Removes fields named by `CustomTransform` objects for the object's resource type
//! - Expands templates in objects that ask for it, per destination, from the destination's
//!   properties
//! - Splits the objects into wrapped objects bounded by size and count
//! - Creates, updates and deletes wrapped objects so that each destination holds exactly
//!   what the Binding calls for
//!
//! ## Modules
//!
//! - [`crd`] - `Binding` and `CustomTransform` resource types
//! - [`reconcilers`] - The Binding reconciler
//! - [`controller`] - Watches, work queue and worker pool
//! - [`context`] - API clients and reflector stores
//! - [`transform_cache`] - Digested `CustomTransform`s per resource type
//! - [`properties`] - Destination properties and Binding sensitivities
//! - [`customize`] - Per-destination template expansion
//! - [`sharder`] - Splitting objects into wrapped objects
//! - [`transport`] - Carrier formats for wrapped objects
//! - [`filtering`] - Destination-independent cleanup of workload objects
//! - [`jsonpath`] - The removal query language of `CustomTransform`
//! - [`workqueue`] - Rate-limited, de-duplicating work queue
//!
//! ## Example
//!
//! ```rust,no_run
//! use binding_transport::crd::{BindingSpec, Destination};
//!
//! let spec = BindingSpec {
//!     destinations: vec![Destination {
//!         cluster_id: "cluster1".to_string(),
//!     }],
//!     ..BindingSpec::default()
//! };
//! assert_eq!(spec.destinations[0].mailbox(), "cluster1");
//! ```

pub mod clients;
pub mod constants;
pub mod context;
pub mod controller;
pub mod crd;
pub mod customize;
pub mod errors;
pub mod filtering;
pub mod jsonpath;
pub mod properties;
pub mod reconcilers;
pub mod sharder;
pub mod transform_cache;
pub mod transport;
pub mod workqueue;
