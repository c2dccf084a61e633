// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `customize.rs`

#[cfg(test)]
mod tests {
    use crate::crd::Destination;
    use crate::customize::{wants_expansion, Customizer};
    use crate::properties::ClusterProperties;
    use kube::api::DynamicObject;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn props(pairs: &[(&str, &str)]) -> ClusterProperties {
        Arc::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn dest(id: &str) -> Destination {
        Destination {
            cluster_id: id.to_string(),
        }
    }

    fn config_map(data: serde_json::Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "namespace": "demo",
                "annotations": {"control.kubestellar.io/expand-templates": "true"}
            },
            "data": data
        }))
        .unwrap()
    }

    #[test]
    fn test_wants_expansion_requires_exact_true() {
        assert!(wants_expansion(&config_map(json!({}))));

        let mut obj = config_map(json!({}));
        obj.metadata.annotations = Some(BTreeMap::from([(
            "control.kubestellar.io/expand-templates".to_string(),
            "yes".to_string(),
        )]));
        assert!(!wants_expansion(&obj));

        obj.metadata.annotations = None;
        assert!(!wants_expansion(&obj));
    }

    #[test]
    fn test_render_expands_strings_in_nested_values() {
        let obj = config_map(json!({
            "greeting": "hello {{ clusterName }}",
            "list": ["{{ region }}", "plain", 7]
        }));

        let out = Customizer::new()
            .render(
                &obj,
                &dest("east"),
                &props(&[("clusterName", "east"), ("region", "us-east-1")]),
            )
            .unwrap();

        assert!(out.changed);
        assert!(out.errors.is_empty());
        assert_eq!(out.object.data["data"]["greeting"], "hello east");
        assert_eq!(
            out.object.data["data"]["list"],
            json!(["us-east-1", "plain", 7])
        );
        assert_eq!(out.object.metadata.name.as_deref(), Some("settings"));
    }

    #[test]
    fn test_render_without_templates_is_unchanged() {
        let obj = config_map(json!({"plain": "value"}));
        let out = Customizer::new()
            .render(&obj, &dest("east"), &props(&[("clusterName", "east")]))
            .unwrap();
        assert!(!out.changed);
        assert!(out.errors.is_empty());
        assert_eq!(out.object.data, obj.data);
    }

    #[test]
    fn test_literal_expressions_and_comments_expand() {
        let obj = config_map(json!({"literal": "{{ 'x' }}x"}));
        let out = Customizer::new()
            .render(&obj, &dest("east"), &props(&[]))
            .unwrap();
        assert!(out.changed);
        assert_eq!(out.object.data["data"]["literal"], "xx");

        let obj = config_map(json!({"braces": "{# note #}"}));
        let out = Customizer::new()
            .render(&obj, &dest("east"), &props(&[]))
            .unwrap();
        assert!(out.changed);
        assert_eq!(out.object.data["data"]["braces"], "");
    }

    #[test]
    fn test_undefined_property_is_reported_with_location() {
        let obj = config_map(json!({"zone": "{{ zone }}"}));
        let out = Customizer::new()
            .render(&obj, &dest("east"), &props(&[("clusterName", "east")]))
            .unwrap();

        assert!(out.changed);
        assert_eq!(out.errors.len(), 1);
        let err = &out.errors[0];
        assert!(
            err.starts_with("destination east, object ConfigMap demo/settings, path $.data.zone: "),
            "{err}"
        );
        assert!(err.contains("undefined"), "{err}");
    }

    #[test]
    fn test_keys_that_are_not_plain_names_are_bracketed() {
        let mut obj = config_map(json!({}));
        obj.data["data"] = json!({"app.conf": "{{ nope }}"});
        let out = Customizer::new()
            .render(&obj, &dest("c1"), &props(&[]))
            .unwrap();
        assert!(
            out.errors[0].contains("path $.data[\"app.conf\"]: "),
            "{}",
            out.errors[0]
        );
    }

    #[test]
    fn test_map_keys_are_not_rendered() {
        let obj = config_map(json!({"{{ clusterName }}": "v"}));
        let out = Customizer::new()
            .render(&obj, &dest("east"), &props(&[("clusterName", "east")]))
            .unwrap();
        assert!(!out.changed);
    }
}
