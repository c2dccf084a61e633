// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `binding.rs`

#[cfg(test)]
mod tests {
    use crate::clients::{BindingClient, WorkloadSource, WrappedObjectClient};
    use crate::constants::{
        BINDING_FINALIZER, ORIGIN_BINDING_LABEL, ORIGIN_GENERATION_ANNOTATION, ORIGIN_WDS_LABEL,
    };
    use crate::crd::{
        Binding, BindingSpec, BindingStatus, ClusterScopeReference, CustomTransform,
        CustomTransformSpec, CustomTransformStatus, Destination, GroupResource,
        NamespaceScopeReference, WorkloadObjectRef, WorkloadReferences,
    };
    use crate::customize::Customizer;
    use crate::errors::Result;
    use crate::properties::{InventoryEntry, PropertyRecord, PropertySource, PropertyTracker};
    use crate::reconcilers::binding::BindingReconciler;
    use crate::sharder::Sharder;
    use crate::transform_cache::{CustomTransformCache, TransformRuleSource, TransformStatusWriter};
    use crate::transport::manifestwork::ManifestWorkTransport;
    use crate::transport::Transport;
    use crate::workqueue::BindingEnqueuer;
    use async_trait::async_trait;
    use kube::api::DynamicObject;
    use kube::ResourceExt;
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    // ------------------------------------------------------------------
    // In-memory API servers
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct FakeBindings {
        objects: Mutex<HashMap<String, Binding>>,
        finalizer_patches: AtomicUsize,
        status_patches: AtomicUsize,
    }

    impl FakeBindings {
        fn put(&self, binding: Binding) {
            self.objects
                .lock()
                .unwrap()
                .insert(binding.name_any(), binding);
        }

        fn snapshot(&self, name: &str) -> Option<Binding> {
            self.objects.lock().unwrap().get(name).cloned()
        }

        fn edit(&self, name: &str, f: impl FnOnce(&mut Binding)) {
            let mut objects = self.objects.lock().unwrap();
            f(objects.get_mut(name).unwrap());
        }
    }

    #[async_trait]
    impl BindingClient for FakeBindings {
        fn get(&self, name: &str) -> Option<Arc<Binding>> {
            self.snapshot(name).map(Arc::new)
        }

        async fn patch_finalizers(&self, name: &str, finalizers: Vec<String>) -> Result<()> {
            self.finalizer_patches.fetch_add(1, Ordering::SeqCst);
            let mut objects = self.objects.lock().unwrap();
            let binding = objects.get_mut(name).unwrap();
            let gone = finalizers.is_empty() && binding.metadata.deletion_timestamp.is_some();
            binding.metadata.finalizers = Some(finalizers);
            if gone {
                objects.remove(name);
            }
            Ok(())
        }

        async fn patch_status(&self, name: &str, status: &BindingStatus) -> Result<()> {
            self.status_patches.fetch_add(1, Ordering::SeqCst);
            self.edit(name, |binding| binding.status = Some(status.clone()));
            Ok(())
        }
    }

    /// Workload objects keyed by (resource, namespace, name).
    #[derive(Default)]
    struct FakeWorkload {
        objects: Mutex<HashMap<(String, String, String), DynamicObject>>,
    }

    impl FakeWorkload {
        fn put(&self, resource: &str, object: DynamicObject) {
            let key = (
                resource.to_string(),
                object.namespace().unwrap_or_default(),
                object.name_any(),
            );
            self.objects.lock().unwrap().insert(key, object);
        }
    }

    #[async_trait]
    impl WorkloadSource for FakeWorkload {
        async fn get(&self, reference: &WorkloadObjectRef<'_>) -> Result<Option<DynamicObject>> {
            let key = (
                reference.resource.to_string(),
                reference.namespace.unwrap_or_default().to_string(),
                reference.name.to_string(),
            );
            Ok(self.objects.lock().unwrap().get(&key).cloned())
        }
    }

    /// Wrapped objects keyed by (namespace, name).
    #[derive(Default)]
    struct FakeWrapped {
        objects: Mutex<BTreeMap<(String, String), DynamicObject>>,
        creates: AtomicUsize,
        replaces: AtomicUsize,
        deletes: AtomicUsize,
    }

    impl FakeWrapped {
        fn put(&self, object: DynamicObject) {
            let key = (object.namespace().unwrap_or_default(), object.name_any());
            self.objects.lock().unwrap().insert(key, object);
        }

        fn get_sync(&self, namespace: &str, name: &str) -> Option<DynamicObject> {
            self.objects
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        fn keys(&self) -> Vec<(String, String)> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        fn writes(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
                + self.replaces.load(Ordering::SeqCst)
                + self.deletes.load(Ordering::SeqCst)
        }
    }

    fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
        selector.split(',').all(|term| {
            let (key, value) = term.split_once('=').unwrap();
            object.labels().get(key).map(String::as_str) == Some(value)
        })
    }

    #[async_trait]
    impl WrappedObjectClient for FakeWrapped {
        async fn list(&self, label_selector: &str) -> Result<Vec<DynamicObject>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .values()
                .filter(|object| matches_selector(object, label_selector))
                .cloned()
                .collect())
        }

        async fn get(&self, namespace: &str, name: &str) -> Result<Option<DynamicObject>> {
            Ok(self.get_sync(namespace, name))
        }

        async fn create(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            assert!(object.metadata.resource_version.is_none());
            let mut stored = object.clone();
            stored.metadata.namespace = Some(namespace.to_string());
            stored.metadata.resource_version = Some("1".to_string());
            self.put(stored.clone());
            Ok(stored)
        }

        async fn replace(&self, namespace: &str, object: &DynamicObject) -> Result<DynamicObject> {
            self.replaces.fetch_add(1, Ordering::SeqCst);
            let old = self.get_sync(namespace, &object.name_any()).unwrap();
            assert_eq!(old.metadata.resource_version, object.metadata.resource_version);
            let next: u64 = old
                .metadata
                .resource_version
                .as_deref()
                .unwrap_or("0")
                .parse()
                .unwrap();
            let mut stored = object.clone();
            stored.metadata.resource_version = Some((next + 1).to_string());
            self.put(stored.clone());
            Ok(stored)
        }

        async fn delete(&self, namespace: &str, name: &str) -> Result<bool> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .objects
                .lock()
                .unwrap()
                .remove(&(namespace.to_string(), name.to_string()))
                .is_some())
        }
    }

    #[derive(Default)]
    struct FakeRules {
        rules: Mutex<BTreeMap<String, Arc<CustomTransform>>>,
    }

    impl TransformRuleSource for FakeRules {
        fn rules_for(&self, gr: &GroupResource) -> Vec<Arc<CustomTransform>> {
            self.rules
                .lock()
                .unwrap()
                .values()
                .filter(|rule| rule.spec.group_resource() == *gr)
                .cloned()
                .collect()
        }

        fn get(&self, name: &str) -> Option<Arc<CustomTransform>> {
            self.rules.lock().unwrap().get(name).cloned()
        }
    }

    struct NoStatus;

    impl TransformStatusWriter for NoStatus {
        fn write_status(&self, _rule: &CustomTransform, _status: CustomTransformStatus) {}
    }

    #[derive(Default)]
    struct FakeInventory {
        entries: Mutex<HashMap<String, InventoryEntry>>,
    }

    impl FakeInventory {
        fn label(&self, cluster: &str, key: &str, value: &str) {
            self.entries
                .lock()
                .unwrap()
                .entry(cluster.to_string())
                .or_default()
                .labels
                .insert(key.to_string(), value.to_string());
        }
    }

    impl PropertySource for FakeInventory {
        fn inventory_entry(&self, name: &str) -> Option<InventoryEntry> {
            self.entries.lock().unwrap().get(name).cloned()
        }

        fn property_record(&self, _name: &str) -> Option<PropertyRecord> {
            None
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        bindings: Arc<FakeBindings>,
        workload: Arc<FakeWorkload>,
        wrapped: Arc<FakeWrapped>,
        rules: Arc<FakeRules>,
        inventory: Arc<FakeInventory>,
        reconciler: BindingReconciler,
    }

    impl Harness {
        fn new(max_count: usize) -> Self {
            let bindings = Arc::new(FakeBindings::default());
            let workload = Arc::new(FakeWorkload::default());
            let wrapped = Arc::new(FakeWrapped::default());
            let rules = Arc::new(FakeRules::default());
            let inventory = Arc::new(FakeInventory::default());
            let enqueue: BindingEnqueuer = Arc::new(|_name| {});
            let transport: Arc<dyn Transport> = Arc::new(ManifestWorkTransport);

            let reconciler = BindingReconciler {
                bindings: bindings.clone(),
                workload: workload.clone(),
                wrapped: wrapped.clone(),
                transport: transport.clone(),
                transforms: Arc::new(CustomTransformCache::new(
                    rules.clone(),
                    Arc::new(NoStatus),
                    enqueue.clone(),
                )),
                properties: Arc::new(PropertyTracker::new(inventory.clone(), enqueue)),
                customizer: Customizer::new(),
                sharder: Sharder::new(transport, "wds1", 1_000_000, max_count),
            };
            Self {
                bindings,
                workload,
                wrapped,
                rules,
                inventory,
                reconciler,
            }
        }

        /// A ConfigMap `demo/cm` and a ClusterRole `reader` bound to the given clusters.
        fn with_standard_workload(max_count: usize, clusters: &[&str]) -> Self {
            let harness = Self::new(max_count);
            harness.workload.put("configmaps", config_map("cm", json!({"a": "1"}), false));
            harness.workload.put("clusterroles", cluster_role("reader"));
            harness.bindings.put(binding(
                &[("rbac.authorization.k8s.io", "clusterroles", "reader")],
                &[("", "configmaps", "demo", "cm")],
                clusters,
            ));
            harness
        }

        async fn reconcile(&self) -> Result<()> {
            self.reconciler.reconcile("b1").await
        }
    }

    fn config_map(name: &str, data: Value, expand: bool) -> DynamicObject {
        let mut annotations = serde_json::Map::new();
        if expand {
            annotations.insert(
                "control.kubestellar.io/expand-templates".to_string(),
                json!("true"),
            );
        }
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": "demo",
                "uid": format!("{name}-uid"),
                "resourceVersion": "100",
                "labels": {"app": "demo", "env": "prod"},
                "annotations": annotations
            },
            "data": data
        }))
        .unwrap()
    }

    fn cluster_role(name: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": {"name": name, "uid": format!("{name}-uid")},
            "rules": []
        }))
        .unwrap()
    }

    fn binding(
        cluster_scope: &[(&str, &str, &str)],
        namespace_scope: &[(&str, &str, &str, &str)],
        clusters: &[&str],
    ) -> Binding {
        let spec = BindingSpec {
            workload: WorkloadReferences {
                cluster_scope: cluster_scope
                    .iter()
                    .map(|(group, resource, name)| ClusterScopeReference {
                        group: (*group).to_string(),
                        version: "v1".to_string(),
                        resource: (*resource).to_string(),
                        name: (*name).to_string(),
                        ..ClusterScopeReference::default()
                    })
                    .collect(),
                namespace_scope: namespace_scope
                    .iter()
                    .map(|(group, resource, namespace, name)| NamespaceScopeReference {
                        group: (*group).to_string(),
                        version: "v1".to_string(),
                        resource: (*resource).to_string(),
                        namespace: (*namespace).to_string(),
                        name: (*name).to_string(),
                        ..NamespaceScopeReference::default()
                    })
                    .collect(),
            },
            destinations: clusters.iter().map(|c| dest(c)).collect(),
        };
        let mut binding = Binding::new("b1", spec);
        binding.metadata.uid = Some("buid".to_string());
        binding.metadata.generation = Some(1);
        binding
    }

    fn dest(cluster: &str) -> Destination {
        Destination {
            cluster_id: cluster.to_string(),
        }
    }

    fn manifests(object: &DynamicObject) -> Vec<Value> {
        object
            .data
            .pointer("/spec/workload/manifests")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_propagates_to_every_destination() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();

        assert_eq!(
            h.wrapped.keys(),
            vec![key("c1", "b1-wds1-0"), key("c2", "b1-wds1-0")]
        );
        let work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        assert_eq!(work.labels().get(ORIGIN_BINDING_LABEL).unwrap(), "b1");
        assert_eq!(work.labels().get(ORIGIN_WDS_LABEL).unwrap(), "wds1");
        assert_eq!(
            work.annotations().get(ORIGIN_GENERATION_ANNOTATION).unwrap(),
            "1"
        );

        let kinds: Vec<_> = manifests(&work)
            .iter()
            .map(|m| m["kind"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["ClusterRole", "ConfigMap"]);
        let cm = &manifests(&work)[1];
        assert!(cm.pointer("/metadata/uid").is_none());
        assert!(cm.pointer("/metadata/resourceVersion").is_none());

        let stored = h.bindings.snapshot("b1").unwrap();
        assert!(stored.finalizers().contains(&BINDING_FINALIZER.to_string()));
        assert_eq!(
            stored.status,
            Some(BindingStatus {
                observed_generation: 1,
                errors: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();
        let writes = h.wrapped.writes();
        let finalizer_patches = h.bindings.finalizer_patches.load(Ordering::SeqCst);
        let status_patches = h.bindings.status_patches.load(Ordering::SeqCst);

        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.writes(), writes);
        assert_eq!(
            h.bindings.finalizer_patches.load(Ordering::SeqCst),
            finalizer_patches
        );
        assert_eq!(h.bindings.status_patches.load(Ordering::SeqCst), status_patches);
    }

    #[tokio::test]
    async fn test_generation_change_replaces_wrapped_objects() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();

        h.bindings.edit("b1", |b| b.metadata.generation = Some(2));
        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.creates.load(Ordering::SeqCst), 2);
        assert_eq!(h.wrapped.replaces.load(Ordering::SeqCst), 2);
        let work = h.wrapped.get_sync("c2", "b1-wds1-0").unwrap();
        assert_eq!(
            work.annotations().get(ORIGIN_GENERATION_ANNOTATION).unwrap(),
            "2"
        );
        assert_eq!(work.resource_version().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_content_drift_is_repaired() {
        let h = Harness::with_standard_workload(50, &["c1"]);
        h.reconcile().await.unwrap();

        let mut work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        work.data["spec"]["workload"]["manifests"] = json!([]);
        h.wrapped.put(work);
        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.replaces.load(Ordering::SeqCst), 1);
        let work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        assert_eq!(manifests(&work).len(), 2);
    }

    #[tokio::test]
    async fn test_payload_edit_with_same_identities_and_generation_is_not_rewritten() {
        let h = Harness::with_standard_workload(50, &["c1"]);
        h.reconcile().await.unwrap();

        let mut work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        let edited = work.data["spec"]["workload"]["manifests"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .find(|manifest| manifest["kind"] == "ConfigMap")
            .unwrap();
        edited["data"] = json!({"a": "changed in the mailbox"});
        h.wrapped.put(work);

        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.replaces.load(Ordering::SeqCst), 0);
        let work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        let kept = manifests(&work)
            .into_iter()
            .find(|manifest| manifest["kind"] == "ConfigMap")
            .unwrap();
        assert_eq!(kept["data"], json!({"a": "changed in the mailbox"}));
    }

    #[tokio::test]
    async fn test_removed_destination_loses_its_wrapped_object() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();

        h.bindings.edit("b1", |b| {
            b.spec.destinations = vec![dest("c1")];
            b.metadata.generation = Some(2);
        });
        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.keys(), vec![key("c1", "b1-wds1-0")]);
    }

    #[tokio::test]
    async fn test_deletion_cleans_listed_destinations_then_finalizer() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();

        // A wrapped object in a destination the Binding no longer lists is left alone.
        let mut stray = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        stray.metadata.namespace = Some("c9".to_string());
        h.wrapped.put(stray);

        h.bindings.edit("b1", |b| {
            b.metadata.deletion_timestamp =
                serde_json::from_value(json!("2025-01-01T00:00:00Z")).unwrap();
        });
        h.reconcile().await.unwrap();

        assert_eq!(h.wrapped.keys(), vec![key("c9", "b1-wds1-0")]);
        assert!(h.bindings.snapshot("b1").is_none());
        assert!(h.reconciler.properties.sensitivities("b1").is_empty());
        assert!(h.reconciler.transforms.cached_resource_types().is_empty());

        // Binding gone: nothing to do.
        h.reconcile().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_object_per_wrapped_object_is_named_by_uids() {
        let h = Harness::with_standard_workload(1, &["c1"]);
        h.reconcile().await.unwrap();

        assert_eq!(
            h.wrapped.keys(),
            vec![
                key("c1", "buid-wds1-cm-uid"),
                key("c1", "buid-wds1-reader-uid"),
            ]
        );
    }

    #[tokio::test]
    async fn test_custom_transform_removes_field() {
        let h = Harness::with_standard_workload(50, &["c1"]);
        let mut rule = CustomTransform::new(
            "drop-env",
            CustomTransformSpec {
                api_group: String::new(),
                resource: "configmaps".to_string(),
                remove: vec![r#"$.metadata.labels["env"]"#.to_string()],
            },
        );
        rule.metadata.generation = Some(1);
        h.rules
            .rules
            .lock()
            .unwrap()
            .insert("drop-env".to_string(), Arc::new(rule));

        h.reconcile().await.unwrap();

        let work = h.wrapped.get_sync("c1", "b1-wds1-0").unwrap();
        let cm = &manifests(&work)[1];
        assert_eq!(cm["metadata"]["labels"], json!({"app": "demo"}));
        assert!(h
            .reconciler
            .transforms
            .bindings_depending_on(&GroupResource::new("", "configmaps"))
            .contains("b1"));
    }

    #[tokio::test]
    async fn test_customization_differs_per_destination() {
        let h = Harness::new(50);
        h.inventory.label("c1", "region", "east");
        h.inventory.label("c2", "region", "west");
        h.workload.put(
            "configmaps",
            config_map("cm", json!({"zone": "{{ region }}", "home": "{{ clusterName }}"}), true),
        );
        h.bindings
            .put(binding(&[], &[("", "configmaps", "demo", "cm")], &["c1", "c2"]));

        h.reconcile().await.unwrap();

        for (cluster, region) in [("c1", "east"), ("c2", "west")] {
            let work = h.wrapped.get_sync(cluster, "b1-wds1-0").unwrap();
            let cm = &manifests(&work)[0];
            assert_eq!(cm["data"], json!({"zone": region, "home": cluster}));
        }
        assert_eq!(
            h.reconciler.properties.sensitivities("b1"),
            HashSet::from([dest("c1"), dest("c2")])
        );
    }

    #[tokio::test]
    async fn test_uncustomized_binding_is_not_sensitive() {
        let h = Harness::with_standard_workload(50, &["c1", "c2"]);
        h.reconcile().await.unwrap();
        assert!(h.reconciler.properties.sensitivities("b1").is_empty());
        assert!(!h.reconciler.properties.is_cached(&dest("c1")));
    }

    #[tokio::test]
    async fn test_template_error_deletes_wrapped_objects() {
        let h = Harness::new(50);
        h.workload.put(
            "configmaps",
            config_map("cm", json!({"zone": "{{ clusterName }}"}), true),
        );
        h.bindings
            .put(binding(&[], &[("", "configmaps", "demo", "cm")], &["c1", "c2"]));
        h.reconcile().await.unwrap();
        assert_eq!(h.wrapped.keys().len(), 2);

        h.workload.put(
            "configmaps",
            config_map("cm", json!({"zone": "{{ nosuch }}"}), true),
        );
        h.bindings.edit("b1", |b| b.metadata.generation = Some(2));
        h.reconcile().await.unwrap();

        assert!(h.wrapped.keys().is_empty());
        let status = h.bindings.snapshot("b1").unwrap().status.unwrap();
        assert_eq!(status.observed_generation, 2);
        assert_eq!(status.errors.len(), 1);
        assert!(status.errors[0].starts_with("destination c1, object ConfigMap demo/cm, path $.data.zone: "));
    }

    #[tokio::test]
    async fn test_missing_workload_object_is_retryable() {
        let h = Harness::new(50);
        h.bindings
            .put(binding(&[], &[("", "configmaps", "demo", "absent")], &["c1"]));

        let err = h.reconcile().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("absent"));
        assert!(h.wrapped.keys().is_empty());
    }

    #[tokio::test]
    async fn test_empty_workload_deletes_leftovers() {
        let h = Harness::with_standard_workload(50, &["c1"]);
        h.reconcile().await.unwrap();

        h.bindings.edit("b1", |b| {
            b.spec.workload = WorkloadReferences::default();
            b.metadata.generation = Some(2);
        });
        h.reconcile().await.unwrap();

        assert!(h.wrapped.keys().is_empty());
        assert!(h.reconciler.transforms.cached_resource_types().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_binding_is_ok() {
        let h = Harness::new(50);
        h.reconciler.reconcile("nobody").await.unwrap();
        assert_eq!(h.wrapped.writes(), 0);
    }
}
