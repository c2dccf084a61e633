// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-destination customization properties and the Bindings that depend on them.
//!
//! The properties of a destination are merged, later sources overriding earlier ones, from:
//!
//! 1. `clusterName`, set to the inventory name of the destination
//! 2. labels of the inventory entry
//! 3. annotations of the inventory entry
//! 4. `data` of the property `ConfigMap` with the same name
//! 5. `binaryData` of that `ConfigMap`
//!
//! Only keys that are identifiers (`[A-Za-z_][A-Za-z0-9_]*`) become properties.
//!
//! [`PropertyTracker`] caches the merged map per destination and remembers which Bindings
//! consulted which destinations, so that a property change re-enqueues exactly those Bindings.

use crate::constants::CLUSTER_NAME_PROPERTY;
use crate::crd::Destination;
use crate::workqueue::BindingEnqueuer;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Immutable key/value properties of one destination.
pub type ClusterProperties = Arc<BTreeMap<String, String>>;

/// Labels and annotations of one inventory entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InventoryEntry {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Contents of the optional property `ConfigMap` of one destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyRecord {
    pub data: BTreeMap<String, String>,
    pub binary_data: BTreeMap<String, Vec<u8>>,
}

/// Cached read access to inventory entries and property records, keyed by inventory name.
pub trait PropertySource: Send + Sync {
    fn inventory_entry(&self, name: &str) -> Option<InventoryEntry>;
    fn property_record(&self, name: &str) -> Option<PropertyRecord>;
}

#[derive(Default)]
struct TrackerState {
    destination_properties: HashMap<Destination, ClusterProperties>,
    binding_sensitive_destinations: HashMap<String, HashSet<Destination>>,
}

/// Caches destination properties and tracks which Bindings are sensitive to them.
pub struct PropertyTracker {
    source: Arc<dyn PropertySource>,
    enqueue: BindingEnqueuer,
    state: Mutex<TrackerState>,
}

impl PropertyTracker {
    pub fn new(source: Arc<dyn PropertySource>, enqueue: BindingEnqueuer) -> Self {
        Self {
            source,
            enqueue,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Returns the properties of `dest`, computing and caching them if needed, and records
    /// that `binding_name` is now sensitive to them.
    pub fn properties_for(&self, binding_name: &str, dest: &Destination) -> ClusterProperties {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .binding_sensitive_destinations
            .entry(binding_name.to_string())
            .or_default()
            .insert(dest.clone());

        if let Some(props) = state.destination_properties.get(dest) {
            return Arc::clone(props);
        }
        let props = Arc::new(self.collect(&dest.cluster_id));
        state
            .destination_properties
            .insert(dest.clone(), Arc::clone(&props));
        trace!(binding = binding_name, destination = %dest, ?props, "Collected destination properties");
        props
    }

    /// Replaces the set of destinations `binding_name` is sensitive to; `None` forgets the
    /// Binding. Cached properties that no Binding is sensitive to any more are evicted.
    pub fn set_binding_sensitivities(&self, binding_name: &str, dests: Option<HashSet<Destination>>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match dests {
            Some(dests) if !dests.is_empty() => {
                state
                    .binding_sensitive_destinations
                    .insert(binding_name.to_string(), dests);
            }
            _ => {
                state.binding_sensitive_destinations.remove(binding_name);
            }
        }

        let TrackerState {
            destination_properties,
            binding_sensitive_destinations,
        } = &mut *state;
        destination_properties.retain(|dest, _| {
            binding_sensitive_destinations
                .values()
                .any(|sensitive| sensitive.contains(dest))
        });
    }

    /// Recomputes the properties of the named inventory entry. If they differ from the cached
    /// ones, updates the cache and enqueues every Binding sensitive to that destination.
    pub fn recompute_if_changed(&self, inventory_name: &str) {
        let dest = Destination {
            cluster_id: inventory_name.to_string(),
        };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(old) = state.destination_properties.get(&dest) else {
            trace!(destination = inventory_name, "No Binding depends on destination properties");
            return;
        };
        let new = self.collect(inventory_name);
        if **old == new {
            trace!(destination = inventory_name, "Destination properties unchanged");
            return;
        }
        state.destination_properties.insert(dest.clone(), Arc::new(new));

        let mut enqueued = 0;
        for (binding_name, dests) in &state.binding_sensitive_destinations {
            if dests.contains(&dest) {
                (self.enqueue)(binding_name.clone());
                enqueued += 1;
            }
        }
        debug!(
            destination = inventory_name,
            bindings = enqueued,
            "Destination properties changed, enqueued sensitive Bindings"
        );
    }

    /// Destinations `binding_name` is currently sensitive to.
    #[must_use]
    pub fn sensitivities(&self, binding_name: &str) -> HashSet<Destination> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .binding_sensitive_destinations
            .get(binding_name)
            .cloned()
            .unwrap_or_default()
    }

    /// True if properties of `dest` are currently cached.
    #[must_use]
    pub fn is_cached(&self, dest: &Destination) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.destination_properties.contains_key(dest)
    }

    fn collect(&self, inventory_name: &str) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert(CLUSTER_NAME_PROPERTY.to_string(), inventory_name.to_string());

        let mut put = |key: &str, val: String| {
            if is_identifier(key) {
                props.insert(key.to_string(), val);
            }
        };
        if let Some(entry) = self.source.inventory_entry(inventory_name) {
            entry.labels.iter().for_each(|(k, v)| put(k, v.clone()));
            entry.annotations.iter().for_each(|(k, v)| put(k, v.clone()));
        }
        if let Some(record) = self.source.property_record(inventory_name) {
            record.data.iter().for_each(|(k, v)| put(k, v.clone()));
            record
                .binary_data
                .iter()
                .for_each(|(k, v)| put(k, String::from_utf8_lossy(v).into_owned()));
        }
        props
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
#[must_use]
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[path = "properties_tests.rs"]
mod properties_tests;
