// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Digested `CustomTransform` objects, cached per resource type.
//!
//! The cache holds an entry for a resource type exactly while some Binding references objects
//! of that type. An entry records the Bindings that depend on it, the names of the
//! `CustomTransform`s that contributed to it, and the compiled removal queries.
//!
//! Reading an entry is also a subscription: [`CustomTransformCache::get_changes`] records that
//! the calling Binding depends on the entry. Each reconciliation pass ends with
//! [`CustomTransformCache::set_binding_resource_types`], which prunes subscriptions the Binding
//! no longer needs. When a `CustomTransform` changes, the affected entry is dropped and every
//! dependent Binding is re-enqueued so it picks up the new queries.
//!
//! All operations run under one lock, including the re-enqueue calls.

use crate::crd::{CustomTransform, CustomTransformSpec, CustomTransformStatus, GroupResource};
use crate::jsonpath::{self, Query};
use crate::workqueue::BindingEnqueuer;
use kube::ResourceExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace};

/// Removal queries that apply to one resource type. Cheap to clone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransformChanges {
    pub removes: Arc<Vec<Query>>,
}

/// Cached read access to `CustomTransform` objects.
pub trait TransformRuleSource: Send + Sync {
    /// Every `CustomTransform` whose spec targets `gr`.
    fn rules_for(&self, gr: &GroupResource) -> Vec<Arc<CustomTransform>>;

    /// The named `CustomTransform`, if it exists.
    fn get(&self, name: &str) -> Option<Arc<CustomTransform>>;
}

/// Sink for `CustomTransform` status updates. Implementations must not block.
pub trait TransformStatusWriter: Send + Sync {
    fn write_status(&self, rule: &CustomTransform, status: CustomTransformStatus);
}

#[derive(Debug)]
struct GroupResourceTransformData {
    /// Never empty.
    bindings_that_care: BTreeSet<String>,
    rule_names: BTreeSet<String>,
    changes: TransformChanges,
}

#[derive(Default)]
struct CacheState {
    by_resource: HashMap<GroupResource, GroupResourceTransformData>,
    rule_specs: HashMap<String, CustomTransformSpec>,
    binding_resources: HashMap<String, BTreeSet<GroupResource>>,
}

/// Cache of digested `CustomTransform`s keyed by resource type.
pub struct CustomTransformCache {
    rules: Arc<dyn TransformRuleSource>,
    status: Arc<dyn TransformStatusWriter>,
    enqueue: BindingEnqueuer,
    state: Mutex<CacheState>,
}

impl CustomTransformCache {
    pub fn new(
        rules: Arc<dyn TransformRuleSource>,
        status: Arc<dyn TransformStatusWriter>,
        enqueue: BindingEnqueuer,
    ) -> Self {
        Self {
            rules,
            status,
            enqueue,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the removal queries for `gr` and records that `binding_name` depends on them.
    ///
    /// On a miss, every `CustomTransform` targeting `gr` is digested: its queries are compiled
    /// and its status is written with any per-query errors and cross-rule warnings. Queries are
    /// concatenated in rule-name order; a query whose text already appeared is dropped.
    pub fn get_changes(&self, gr: &GroupResource, binding_name: &str) -> TransformChanges {
        let mut guard = self.lock();
        let state = &mut *guard;
        state
            .binding_resources
            .entry(binding_name.to_string())
            .or_default()
            .insert(gr.clone());

        if let Some(data) = state.by_resource.get_mut(gr) {
            data.bindings_that_care.insert(binding_name.to_string());
            return data.changes.clone();
        }

        let mut rules = self.rules.rules_for(gr);
        rules.sort_by_key(|rule| rule.name_any());
        let rule_names: BTreeSet<String> = rules.iter().map(|rule| rule.name_any()).collect();
        let warnings = if rules.len() > 1 {
            vec![format!(
                "multiple CustomTransform objects specify the same GroupResource; their names are {:?}",
                rule_names.iter().collect::<Vec<_>>()
            )]
        } else {
            Vec::new()
        };

        // Index selectors make removal order-sensitive, so a query repeated by a later rule
        // must not run twice.
        let mut seen = HashSet::new();
        let mut removes = Vec::new();
        for rule in &rules {
            let digested = self.digest_rule_locked(state, gr, binding_name, rule, &warnings);
            removes.extend(
                digested
                    .into_iter()
                    .filter(|query| seen.insert(query.to_string())),
            );
        }
        debug!(
            group_resource = %gr,
            binding = binding_name,
            rules = rules.len(),
            removes = removes.len(),
            "Digested CustomTransforms"
        );

        let changes = TransformChanges {
            removes: Arc::new(removes),
        };
        state.by_resource.insert(
            gr.clone(),
            GroupResourceTransformData {
                bindings_that_care: BTreeSet::from([binding_name.to_string()]),
                rule_names,
                changes: changes.clone(),
            },
        );
        changes
    }

    fn digest_rule_locked(
        &self,
        state: &mut CacheState,
        gr: &GroupResource,
        binding_name: &str,
        rule: &CustomTransform,
        warnings: &[String],
    ) -> Vec<Query> {
        let name = rule.name_any();
        let (removes, errors) = compile_removes(&rule.spec.remove);
        self.status.write_status(
            rule,
            CustomTransformStatus {
                observed_generation: rule.metadata.generation.unwrap_or_default(),
                errors,
                warnings: warnings.to_vec(),
            },
        );

        if let Some(old_spec) = state.rule_specs.get(&name) {
            let old_gr = old_spec.group_resource();
            if &old_gr == gr {
                error!(
                    custom_transform = %name,
                    group_resource = %gr,
                    binding = binding_name,
                    "Inconsistent cache: rule spec recorded without an entry for its resource type"
                );
            } else {
                self.invalidate_locked(
                    state,
                    true,
                    &name,
                    Some(binding_name),
                    &old_gr,
                    "CustomTransform changed its resource type",
                );
            }
        }
        state.rule_specs.insert(name, rule.spec.clone());
        removes
    }

    /// Looks up the named `CustomTransform` and applies [`Self::note_rule_change`].
    pub fn sync_rule(&self, name: &str) {
        let rule = self.rules.get(name);
        self.note_rule_change(name, rule.as_deref());
    }

    /// Reacts to a create, update, or delete (`rule` is `None`) of the named `CustomTransform`.
    ///
    /// Nothing happens unless the rule contributed to a cache entry and its resource type or set
    /// of removal queries changed since then.
    pub fn note_rule_change(&self, name: &str, rule: Option<&CustomTransform>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let old_spec = state.rule_specs.get(name).cloned();

        let (old_gr, target_gr) = match (&old_spec, rule) {
            (None, None) => return,
            (Some(old), None) => (Some(old.group_resource()), old.group_resource()),
            (None, Some(new)) => (None, new.spec.group_resource()),
            (Some(old), Some(new)) => {
                let old_gr = old.group_resource();
                let new_gr = new.spec.group_resource();
                let old_set: BTreeSet<&String> = old.remove.iter().collect();
                let new_set: BTreeSet<&String> = new.spec.remove.iter().collect();
                if old_gr == new_gr && old_set == new_set {
                    trace!(custom_transform = name, "CustomTransform change is irrelevant");
                    return;
                }
                (Some(old_gr), new_gr)
            }
        };

        if let Some(old_gr) = old_gr.filter(|old_gr| *old_gr != target_gr) {
            self.invalidate_locked(
                state,
                true,
                name,
                None,
                &old_gr,
                "CustomTransform changed its resource type",
            );
        }
        self.invalidate_locked(state, false, name, None, &target_gr, "CustomTransform changed");
        state.rule_specs.remove(name);
    }

    /// Replaces the set of resource types `binding_name` depends on, dropping cache entries
    /// that no Binding depends on any more.
    pub fn set_binding_resource_types(&self, binding_name: &str, resource_types: BTreeSet<GroupResource>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let old = state
            .binding_resources
            .remove(binding_name)
            .unwrap_or_default();

        for gr in old.difference(&resource_types) {
            let Some(data) = state.by_resource.get_mut(gr) else {
                continue;
            };
            data.bindings_that_care.remove(binding_name);
            if data.bindings_that_care.is_empty() {
                if let Some(data) = state.by_resource.remove(gr) {
                    for rule_name in &data.rule_names {
                        state.rule_specs.remove(rule_name);
                    }
                }
                trace!(group_resource = %gr, "Evicted CustomTransform cache entry");
            }
        }

        if !resource_types.is_empty() {
            state
                .binding_resources
                .insert(binding_name.to_string(), resource_types);
        }
    }

    /// Resource types with a live cache entry.
    #[must_use]
    pub fn cached_resource_types(&self) -> BTreeSet<GroupResource> {
        self.lock().by_resource.keys().cloned().collect()
    }

    /// Bindings recorded as depending on `gr`.
    #[must_use]
    pub fn bindings_depending_on(&self, gr: &GroupResource) -> BTreeSet<String> {
        self.lock()
            .by_resource
            .get(gr)
            .map(|data| data.bindings_that_care.clone())
            .unwrap_or_default()
    }

    fn invalidate_locked(
        &self,
        state: &mut CacheState,
        should_have: bool,
        rule_name: &str,
        trigger_binding: Option<&str>,
        gr: &GroupResource,
        reason: &str,
    ) {
        let Some(data) = state.by_resource.remove(gr) else {
            if should_have {
                error!(
                    custom_transform = rule_name,
                    group_resource = %gr,
                    "Inconsistent cache: rule spec recorded but no entry for its resource type"
                );
            }
            return;
        };
        for binding_name in &data.bindings_that_care {
            if Some(binding_name.as_str()) == trigger_binding {
                continue;
            }
            debug!(
                binding = %binding_name,
                custom_transform = rule_name,
                group_resource = %gr,
                reason,
                "Enqueuing Binding"
            );
            (self.enqueue)(binding_name.clone());
        }
        for name in &data.rule_names {
            state.rule_specs.remove(name);
        }
    }
}

/// Compiles removal queries, returning the valid ones and a user-facing error per invalid one.
#[must_use]
pub fn compile_removes(sources: &[String]) -> (Vec<Query>, Vec<String>) {
    let mut removes = Vec::new();
    let mut errors = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        match jsonpath::parse(source) {
            Err(err) => errors.push(format!("Error in spec.remove[{idx}]: {err}")),
            Ok(query) if query.is_whole_object() => errors.push(format!(
                "Invalid spec.remove[{idx}]: it identifies the whole object"
            )),
            Ok(query) => removes.push(query),
        }
    }
    (removes, errors)
}

#[cfg(test)]
#[path = "transform_cache_tests.rs"]
mod transform_cache_tests;
