// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Binding reconciliation: from a Binding to the wrapped objects in each destination's mailbox.
//!
//! One pass over a live Binding:
//!
//! 1. Ensure the cleanup finalizer.
//! 2. List the wrapped objects currently labelled for the Binding.
//! 3. Fetch every referenced workload object and transform it (uniform cleanup, kind-specific
//!    cleanup, `CustomTransform` removals).
//! 4. Customize per destination where objects ask for it. When no object's rendering differs
//!    between destinations, one set of wrapped objects is shared by all destinations.
//! 5. Shard into wrapped objects.
//! 6. Write status if it changed.
//! 7. Without user errors, create or update each desired wrapped object whose origin generation
//!    or content identities differ from the live one.
//! 8. Delete every live wrapped object that was not matched above.
//!
//! A Binding being deleted has its wrapped objects deleted from its listed destinations,
//! then loses its finalizer.

use crate::clients::{BindingClient, WorkloadSource, WrappedObjectClient};
use crate::constants::{
    BINDING_FINALIZER, ORIGIN_BINDING_LABEL, ORIGIN_GENERATION_ANNOTATION, ORIGIN_WDS_LABEL,
};
use crate::crd::{Binding, Destination, GroupResource};
use crate::customize::{wants_expansion, Customizer};
use crate::errors::{Error, Result};
use crate::filtering::transform_object;
use crate::properties::PropertyTracker;
use crate::reconcilers::finalizers::{ensure_finalizer, remove_finalizer};
use crate::reconcilers::status::{desired_status, update_status_if_changed};
use crate::sharder::{Sharder, WrappedBatch};
use crate::transform_cache::CustomTransformCache;
use crate::transport::{Gloss, GroupKind, KindToResource, Transport, Wrapee};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

/// Desired wrapped objects, per destination.
#[derive(Debug)]
pub enum DesiredWrapped {
    /// The same wrapped objects for every destination.
    Shared(Vec<WrappedBatch>),
    /// Customized wrapped objects for each destination.
    PerDestination(HashMap<Destination, Vec<WrappedBatch>>),
}

impl DesiredWrapped {
    #[must_use]
    pub fn for_destination(&self, dest: &Destination) -> &[WrappedBatch] {
        match self {
            Self::Shared(batches) => batches,
            Self::PerDestination(map) => map.get(dest).map(Vec::as_slice).unwrap_or_default(),
        }
    }
}

/// Outcome of computing the desired state of one Binding.
#[derive(Debug)]
pub struct DesiredState {
    pub wrapped: DesiredWrapped,
    pub kind_to_resource: KindToResource,
    /// User errors, for the Binding's status.
    pub errors: Vec<String>,
    /// Resource types of the referenced workload objects.
    pub resource_types: BTreeSet<GroupResource>,
}

/// Reconciles Bindings into wrapped objects.
pub struct BindingReconciler {
    pub bindings: Arc<dyn BindingClient>,
    pub workload: Arc<dyn WorkloadSource>,
    pub wrapped: Arc<dyn WrappedObjectClient>,
    pub transport: Arc<dyn Transport>,
    pub transforms: Arc<CustomTransformCache>,
    pub properties: Arc<PropertyTracker>,
    pub customizer: Customizer,
    pub sharder: Sharder,
}

impl BindingReconciler {
    /// Label selector matching the wrapped objects of the named Binding.
    #[must_use]
    pub fn label_selector(&self, binding_name: &str) -> String {
        format!(
            "{ORIGIN_BINDING_LABEL}={binding_name},{ORIGIN_WDS_LABEL}={}",
            self.sharder.wds_name()
        )
    }

    /// Brings the wrapped objects of the named Binding in line with the Binding.
    ///
    /// # Errors
    ///
    /// Returns an error if an API call fails, a referenced workload object is missing, or
    /// wrapping fails. See [`Error::is_retryable`].
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let Some(binding) = self.bindings.get(name) else {
            debug!(binding = name, "Binding not found, assuming it was cleaned up");
            self.transforms.set_binding_resource_types(name, BTreeSet::new());
            self.properties.set_binding_sensitivities(name, None);
            return Ok(());
        };

        if binding.metadata.deletion_timestamp.is_some() {
            self.properties.set_binding_sensitivities(name, None);
            return self.delete_wrapped_objects_and_finalizer(&binding).await;
        }
        self.update_wrapped_objects_and_finalizer(&binding).await
    }

    async fn delete_wrapped_objects_and_finalizer(&self, binding: &Binding) -> Result<()> {
        let name = binding.name_any();
        info!(binding = %name, "Binding is being deleted");

        let mut current = self.wrapped.list(&self.label_selector(&name)).await?;
        self.transforms.set_binding_resource_types(&name, BTreeSet::new());

        for dest in &binding.spec.destinations {
            while let Some(object) = pop_by_namespace(&mut current, dest.mailbox()) {
                self.delete_wrapped(dest.mailbox(), &object.name_any()).await?;
            }
        }

        remove_finalizer(self.bindings.as_ref(), binding, BINDING_FINALIZER).await
    }

    async fn update_wrapped_objects_and_finalizer(&self, binding: &Binding) -> Result<()> {
        let name = binding.name_any();
        ensure_finalizer(self.bindings.as_ref(), binding, BINDING_FINALIZER).await?;

        let mut current = self.wrapped.list(&self.label_selector(&name)).await?;
        let desired = self.compute_desired(binding).await?;

        let status = desired_status(binding, desired.errors.clone());
        update_status_if_changed(self.bindings.as_ref(), binding, &status).await?;
        self.transforms
            .set_binding_resource_types(&name, desired.resource_types.clone());

        if desired.errors.is_empty() {
            self.propagate(binding, &desired, &mut current).await?;
        } else {
            info!(
                binding = %name,
                errors = desired.errors.len(),
                "Deleting all wrapped objects of Binding because of errors in it"
            );
        }

        if !current.is_empty() {
            debug!(binding = %name, count = current.len(), "Removing unmatched wrapped objects");
        }
        for object in current {
            let namespace = object.namespace().unwrap_or_default();
            self.delete_wrapped(&namespace, &object.name_any()).await?;
        }
        Ok(())
    }

    /// Computes the wrapped objects each destination of `binding` should have.
    ///
    /// # Errors
    ///
    /// Returns an error if a workload object cannot be fetched or wrapping fails.
    pub async fn compute_desired(&self, binding: &Binding) -> Result<DesiredState> {
        let (wrapees, kind_to_resource, resource_types) = self.resolve_wrapees(binding).await?;
        let (customized, errors) = self.customize(binding, &wrapees)?;

        let wrapped = match customized {
            None => DesiredWrapped::Shared(self.sharder.wrap(binding, &wrapees, &kind_to_resource)?),
            Some(per_destination) => {
                let mut map = HashMap::with_capacity(per_destination.len());
                for (dest, wrapees) in per_destination {
                    let batches = self.sharder.wrap(binding, &wrapees, &kind_to_resource)?;
                    map.insert(dest, batches);
                }
                DesiredWrapped::PerDestination(map)
            }
        };

        Ok(DesiredState {
            wrapped,
            kind_to_resource,
            errors,
            resource_types,
        })
    }

    /// Fetches and transforms the referenced workload objects, in reference order.
    async fn resolve_wrapees(
        &self,
        binding: &Binding,
    ) -> Result<(Vec<Wrapee>, KindToResource, BTreeSet<GroupResource>)> {
        let name = binding.name_any();
        let mut wrapees = Vec::new();
        let mut kind_to_resource = KindToResource::default();
        let mut resource_types = BTreeSet::new();

        for reference in binding.spec.object_references() {
            let object = self.workload.get(&reference).await?.ok_or_else(|| {
                Error::WorkloadObjectNotFound {
                    object: reference.to_string(),
                }
            })?;

            let gr = reference.group_resource();
            if let Some(gk) = GroupKind::of(&object) {
                kind_to_resource.insert(gk, reference.resource);
            }
            let changes = self.transforms.get_changes(&gr, &name);
            resource_types.insert(gr);

            wrapees.push(Wrapee {
                object: transform_object(&object, &changes.removes)?,
                create_only: reference.create_only,
                source_uid: object.uid().unwrap_or_default(),
            });
        }
        trace!(binding = %name, objects = wrapees.len(), "Resolved workload objects");
        Ok((wrapees, kind_to_resource, resource_types))
    }

    /// Customizes wrapees per destination.
    ///
    /// Returns `None` when no wrapee renders differently per destination. Only the errors of
    /// the first troubled destination are reported per wrapee. Also records which
    /// destinations' properties this Binding depends on.
    #[allow(clippy::type_complexity)]
    fn customize(
        &self,
        binding: &Binding,
        wrapees: &[Wrapee],
    ) -> Result<(Option<HashMap<Destination, Vec<Wrapee>>>, Vec<String>)> {
        let name = binding.name_any();
        let destinations = &binding.spec.destinations;
        let mut per_destination: Option<HashMap<Destination, Vec<Wrapee>>> = None;
        let mut errors = Vec::new();

        for (idx, wrapee) in wrapees.iter().enumerate() {
            let requested = wants_expansion(&wrapee.object);
            let mut customize_this = false;
            let mut reported = false;

            for (dest_idx, dest) in destinations.iter().enumerate() {
                let mut object = None;
                if requested && (dest_idx == 0 || customize_this) {
                    let properties = self.properties.properties_for(&name, dest);
                    let rendered = self.customizer.render(&wrapee.object, dest, &properties)?;
                    customize_this = rendered.changed;
                    if !rendered.errors.is_empty() && !reported {
                        reported = true;
                        errors.extend(rendered.errors);
                    }
                    if rendered.changed {
                        object = Some(rendered.object);
                    }
                }

                if customize_this && per_destination.is_none() {
                    per_destination = Some(
                        destinations
                            .iter()
                            .map(|d| (d.clone(), wrapees[..idx].to_vec()))
                            .collect(),
                    );
                }
                if let Some(map) = per_destination.as_mut() {
                    let customized = Wrapee {
                        object: object.unwrap_or_else(|| wrapee.object.clone()),
                        ..wrapee.clone()
                    };
                    map.entry(dest.clone()).or_default().push(customized);
                }
            }
        }

        let sensitive: HashSet<Destination> = if per_destination.is_some() {
            destinations.iter().cloned().collect()
        } else {
            HashSet::new()
        };
        self.properties
            .set_binding_sensitivities(&name, Some(sensitive));
        Ok((per_destination, errors))
    }

    async fn propagate(
        &self,
        binding: &Binding,
        desired: &DesiredState,
        current: &mut Vec<DynamicObject>,
    ) -> Result<()> {
        for dest in &binding.spec.destinations {
            let namespace = dest.mailbox();
            for batch in desired.wrapped.for_destination(dest) {
                let name = batch.object.name_any();
                if let Some(live) = pop_by_id(current, namespace, &name) {
                    if self.is_up_to_date(&live, batch, &desired.kind_to_resource) {
                        trace!(namespace, name = %name, "No need to change wrapped object");
                        continue;
                    }
                }
                self.create_or_update(namespace, &batch.object).await?;
            }
        }
        Ok(())
    }

    /// True when the live object has the desired origin generation and the same content
    /// identities, so it needs no write.
    fn is_up_to_date(
        &self,
        live: &DynamicObject,
        desired: &WrappedBatch,
        kind_to_resource: &KindToResource,
    ) -> bool {
        let gloss = match self.transport.unwrap_objects(live, kind_to_resource) {
            Ok(gloss) => gloss,
            Err(e) => {
                error!(
                    namespace = ?live.namespace(),
                    name = %live.name_any(),
                    error = %e,
                    "Failed to unwrap wrapped object"
                );
                Gloss::new()
            }
        };
        let live_generation = live.annotations().get(ORIGIN_GENERATION_ANNOTATION);
        let desired_generation = desired.object.annotations().get(ORIGIN_GENERATION_ANNOTATION);
        let generation_match = live_generation == desired_generation;
        let gloss_equal = gloss == desired.gloss;

        if !(generation_match && gloss_equal) {
            debug!(
                name = %live.name_any(),
                ?live_generation,
                ?desired_generation,
                gloss_equal,
                "Wrapped object needs to change"
            );
        }
        generation_match && gloss_equal
    }

    async fn create_or_update(&self, namespace: &str, desired: &DynamicObject) -> Result<()> {
        let mut object = desired.clone();
        object.metadata.namespace = Some(namespace.to_string());
        let name = object.name_any();

        match self.wrapped.get(namespace, &name).await? {
            None => {
                object.metadata.resource_version = None;
                let created = self.wrapped.create(namespace, &object).await?;
                info!(
                    namespace,
                    name = %name,
                    resource_version = ?created.resource_version(),
                    "Created wrapped object"
                );
            }
            Some(existing) => {
                object.metadata.resource_version = existing.metadata.resource_version.clone();
                object.metadata.finalizers = existing.metadata.finalizers.clone();
                let updated = self.wrapped.replace(namespace, &object).await?;
                info!(
                    namespace,
                    name = %name,
                    resource_version = ?updated.resource_version(),
                    "Updated wrapped object"
                );
            }
        }
        Ok(())
    }

    async fn delete_wrapped(&self, namespace: &str, name: &str) -> Result<()> {
        if self.wrapped.delete(namespace, name).await? {
            info!(namespace, name, "Deleted wrapped object");
        } else {
            debug!(namespace, name, "Wrapped object already gone");
        }
        Ok(())
    }
}

/// Removes and returns the object with the given namespace and name.
fn pop_by_id(list: &mut Vec<DynamicObject>, namespace: &str, name: &str) -> Option<DynamicObject> {
    let idx = list.iter().position(|object| {
        object.namespace().as_deref() == Some(namespace) && object.name_any() == name
    })?;
    Some(list.swap_remove(idx))
}

/// Removes and returns some object in the given namespace.
fn pop_by_namespace(list: &mut Vec<DynamicObject>, namespace: &str) -> Option<DynamicObject> {
    let idx = list
        .iter()
        .position(|object| object.namespace().as_deref() == Some(namespace))?;
    Some(list.swap_remove(idx))
}

#[cfg(test)]
#[path = "binding_tests.rs"]
mod binding_tests;
