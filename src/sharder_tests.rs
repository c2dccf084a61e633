// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `sharder.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{Binding, BindingSpec};
    use crate::errors::Error;
    use crate::sharder::Sharder;
    use crate::transport::manifestwork::ManifestWorkTransport;
    use crate::transport::{Gloss, GroupKind, KindToResource, Wrapee};
    use kube::ResourceExt;
    use serde_json::json;
    use std::sync::Arc;

    fn binding() -> Binding {
        let mut binding = Binding::new("b1", BindingSpec::default());
        binding.metadata.uid = Some("buid".to_string());
        binding.metadata.generation = Some(4);
        binding
    }

    /// Config maps whose names have equal length so their serialized sizes match.
    fn wrapees(count: usize) -> Vec<Wrapee> {
        (0..count)
            .map(|idx| Wrapee {
                object: serde_json::from_value(json!({
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": {"name": format!("cm{idx}"), "namespace": "demo"},
                    "data": {"key": "value"}
                }))
                .unwrap(),
                create_only: false,
                source_uid: format!("uid{idx}"),
            })
            .collect()
    }

    fn size_of(wrapee: &Wrapee) -> usize {
        serde_json::to_vec(&wrapee.object).unwrap().len()
    }

    fn kinds() -> KindToResource {
        let mut kinds = KindToResource::default();
        kinds.insert(GroupKind::new("", "ConfigMap"), "configmaps");
        kinds
    }

    fn sharder(max_size: usize, max_count: usize) -> Sharder {
        Sharder::new(Arc::new(ManifestWorkTransport), "wds1", max_size, max_count)
    }

    #[test]
    fn test_count_limit_splits_in_order() {
        let input = wrapees(5);
        let batches = sharder(1_000_000, 2)
            .wrap(&binding(), &input, &kinds())
            .unwrap();

        let names: Vec<String> = batches.iter().map(|b| b.object.name_any()).collect();
        assert_eq!(names, vec!["b1-wds1-0", "b1-wds1-1", "b1-wds1-2"]);

        let sizes: Vec<usize> = batches.iter().map(|b| b.gloss.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let mut union = Gloss::new();
        for batch in &batches {
            union.extend(batch.gloss.iter().cloned());
        }
        let expected: Gloss = input.iter().map(Wrapee::id).collect();
        assert_eq!(union, expected);
        assert!(batches[0]
            .gloss
            .contains(&input[0].id()));
        assert!(batches[2].gloss.contains(&input[4].id()));
    }

    #[test]
    fn test_reaching_size_limit_starts_new_batch() {
        let input = wrapees(4);
        let size = size_of(&input[0]);

        let exactly_two = sharder(2 * size, 100)
            .wrap(&binding(), &input, &kinds())
            .unwrap();
        assert_eq!(exactly_two.len(), 4, "running total reaching the limit flushes");

        let just_over_two = sharder(2 * size + 1, 100)
            .wrap(&binding(), &input, &kinds())
            .unwrap();
        assert_eq!(just_over_two.len(), 2);
        for batch in &just_over_two {
            assert_eq!(batch.gloss.len(), 2);
        }
    }

    #[test]
    fn test_object_at_size_limit_gets_its_own_batch() {
        let input = wrapees(2);
        let size = size_of(&input[0]);
        let batches = sharder(size, 100)
            .wrap(&binding(), &input, &kinds())
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.gloss.len() == 1));
    }

    #[test]
    fn test_object_over_size_limit_is_rejected() {
        let input = wrapees(1);
        let size = size_of(&input[0]);
        let err = sharder(size - 1, 100)
            .wrap(&binding(), &input, &kinds())
            .unwrap_err();
        assert!(matches!(err, Error::ObjectTooLarge { max, .. } if max == size - 1));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_single_object_batches_are_named_by_uids() {
        let input = wrapees(2);
        let batches = sharder(1_000_000, 1)
            .wrap(&binding(), &input, &kinds())
            .unwrap();
        let names: Vec<String> = batches.iter().map(|b| b.object.name_any()).collect();
        assert_eq!(names, vec!["buid-wds1-uid0", "buid-wds1-uid1"]);
    }

    #[test]
    fn test_batches_carry_origin_markers() {
        let batches = sharder(1_000_000, 10)
            .wrap(&binding(), &wrapees(1), &kinds())
            .unwrap();
        let object = &batches[0].object;

        assert_eq!(object.namespace(), None);
        assert_eq!(
            object
                .labels()
                .get("transport.kubestellar.io/originOwnerReferenceBindingKey")
                .map(String::as_str),
            Some("b1")
        );
        assert_eq!(
            object
                .labels()
                .get("transport.kubestellar.io/originWdsName")
                .map(String::as_str),
            Some("wds1")
        );
        assert_eq!(
            object
                .annotations()
                .get(crate::constants::ORIGIN_GENERATION_ANNOTATION)
                .map(String::as_str),
            Some("4")
        );
        assert_eq!(
            object.data["spec"]["workload"]["manifests"][0]["metadata"]["name"],
            "cm0"
        );
    }

    #[test]
    fn test_no_wrapees_no_batches() {
        let batches = sharder(1_000_000, 10)
            .wrap(&binding(), &[], &kinds())
            .unwrap();
        assert!(batches.is_empty());
    }
}
