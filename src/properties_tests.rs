// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `properties.rs`

#[cfg(test)]
mod tests {
    use crate::crd::Destination;
    use crate::properties::{
        is_identifier, InventoryEntry, PropertyRecord, PropertySource, PropertyTracker,
    };
    use crate::workqueue::BindingEnqueuer;
    use std::collections::{BTreeMap, HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeSource {
        inventory: Mutex<HashMap<String, InventoryEntry>>,
        records: Mutex<HashMap<String, PropertyRecord>>,
    }

    impl PropertySource for FakeSource {
        fn inventory_entry(&self, name: &str) -> Option<InventoryEntry> {
            self.inventory.lock().unwrap().get(name).cloned()
        }
        fn property_record(&self, name: &str) -> Option<PropertyRecord> {
            self.records.lock().unwrap().get(name).cloned()
        }
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn dest(id: &str) -> Destination {
        Destination {
            cluster_id: id.to_string(),
        }
    }

    fn tracker(source: Arc<FakeSource>) -> (PropertyTracker, Arc<Mutex<Vec<String>>>) {
        let enqueued = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&enqueued);
        let enqueue: BindingEnqueuer = Arc::new(move |name| sink.lock().unwrap().push(name));
        (PropertyTracker::new(source, enqueue), enqueued)
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("region"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("app.kubernetes.io/name"));
        assert!(!is_identifier("with-dash"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_properties_merge_precedence() {
        let source = Arc::new(FakeSource::default());
        source.inventory.lock().unwrap().insert(
            "c1".into(),
            InventoryEntry {
                labels: map(&[("region", "east"), ("zone", "a"), ("not.an/identifier", "x")]),
                annotations: map(&[("zone", "b"), ("owner", "team1")]),
            },
        );
        source.records.lock().unwrap().insert(
            "c1".into(),
            PropertyRecord {
                data: map(&[("owner", "team2"), ("clusterName", "renamed")]),
                binary_data: BTreeMap::from([("blob".to_string(), b"bytes".to_vec())]),
            },
        );
        let (tracker, _) = tracker(source);

        let props = tracker.properties_for("b1", &dest("c1"));

        assert_eq!(
            *props,
            map(&[
                ("clusterName", "renamed"),
                ("region", "east"),
                ("zone", "b"),
                ("owner", "team2"),
                ("blob", "bytes"),
            ])
        );
    }

    #[test]
    fn test_cluster_name_always_present() {
        let (tracker, _) = tracker(Arc::new(FakeSource::default()));
        let props = tracker.properties_for("b1", &dest("lonely"));
        assert_eq!(*props, map(&[("clusterName", "lonely")]));
    }

    #[test]
    fn test_properties_are_cached_until_recomputed() {
        let source = Arc::new(FakeSource::default());
        let (tracker, enqueued) = tracker(Arc::clone(&source));

        let first = tracker.properties_for("b1", &dest("c1"));
        source.inventory.lock().unwrap().insert(
            "c1".into(),
            InventoryEntry {
                labels: map(&[("region", "west")]),
                annotations: BTreeMap::new(),
            },
        );
        let second = tracker.properties_for("b1", &dest("c1"));
        assert!(Arc::ptr_eq(&first, &second), "cache hit expected");

        tracker.recompute_if_changed("c1");
        let third = tracker.properties_for("b1", &dest("c1"));
        assert_eq!(third.get("region").map(String::as_str), Some("west"));
        assert_eq!(*enqueued.lock().unwrap(), vec!["b1".to_string()]);
    }

    #[test]
    fn test_recompute_enqueues_exactly_sensitive_bindings() {
        let source = Arc::new(FakeSource::default());
        let (tracker, enqueued) = tracker(Arc::clone(&source));

        tracker.properties_for("b1", &dest("c1"));
        tracker.properties_for("b2", &dest("c1"));
        tracker.properties_for("b3", &dest("c2"));

        source.records.lock().unwrap().insert(
            "c1".into(),
            PropertyRecord {
                data: map(&[("tier", "gold")]),
                binary_data: BTreeMap::new(),
            },
        );
        tracker.recompute_if_changed("c1");

        let mut got = enqueued.lock().unwrap().clone();
        got.sort();
        assert_eq!(got, vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_recompute_unchanged_enqueues_nothing() {
        let (tracker, enqueued) = tracker(Arc::new(FakeSource::default()));
        tracker.properties_for("b1", &dest("c1"));
        tracker.recompute_if_changed("c1");
        assert!(enqueued.lock().unwrap().is_empty());
    }

    #[test]
    fn test_recompute_uncached_destination_is_ignored() {
        let source = Arc::new(FakeSource::default());
        let (tracker, enqueued) = tracker(Arc::clone(&source));
        source.inventory.lock().unwrap().insert(
            "c9".into(),
            InventoryEntry {
                labels: map(&[("x", "y")]),
                annotations: BTreeMap::new(),
            },
        );
        tracker.recompute_if_changed("c9");
        assert!(enqueued.lock().unwrap().is_empty());
        assert!(!tracker.is_cached(&dest("c9")));
    }

    #[test]
    fn test_set_sensitivities_evicts_unreferenced_destinations() {
        let (tracker, _) = tracker(Arc::new(FakeSource::default()));
        tracker.properties_for("b1", &dest("c1"));
        tracker.properties_for("b1", &dest("c2"));
        tracker.properties_for("b2", &dest("c2"));

        tracker.set_binding_sensitivities("b1", Some(HashSet::new()));

        assert!(tracker.sensitivities("b1").is_empty());
        assert!(!tracker.is_cached(&dest("c1")));
        assert!(tracker.is_cached(&dest("c2")), "b2 still depends on c2");

        tracker.set_binding_sensitivities("b2", None);
        assert!(!tracker.is_cached(&dest("c2")));
    }
}
