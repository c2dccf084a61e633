// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-destination template expansion of workload objects.
//!
//! An object opts in with the annotation
//! `control.kubestellar.io/expand-templates: "true"`. Every string value in an opted-in object
//! (map keys excluded) is rendered as a Jinja-style template against the destination's
//! [`ClusterProperties`], so `"{{ clusterName }}-config"` becomes `"east-config"` for
//! destination `east`. Referencing an undefined property is a user error.

use crate::constants::TEMPLATE_EXPANSION_ANNOTATION;
use crate::crd::Destination;
use crate::errors::{Error, Result};
use crate::properties::ClusterProperties;
use crate::transport::ObjectId;
use kube::api::DynamicObject;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

/// Markers that start a template expression, statement, or comment.
const TEMPLATE_MARKERS: &[&str] = &["{{", "{%", "{#"];

/// Result of rendering one object for one destination.
#[derive(Clone, Debug)]
pub struct Rendered {
    /// The expanded object, or the input unmodified when `changed` is false.
    pub object: DynamicObject,
    /// User-facing problems; one entry per failing string.
    pub errors: Vec<String>,
    /// True when some template expanded to a different value or failed to render.
    pub changed: bool,
}

/// Returns true if the object asks for template expansion.
#[must_use]
pub fn wants_expansion(object: &DynamicObject) -> bool {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(TEMPLATE_EXPANSION_ANNOTATION))
        .is_some_and(|value| value == "true")
}

/// Renders templates embedded in workload objects.
pub struct Customizer {
    env: Environment<'static>,
}

impl Default for Customizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Customizer {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Expands every template string in `object` with the properties of `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the object cannot be converted to or from JSON. Template
    /// failures are returned in [`Rendered::errors`].
    pub fn render(
        &self,
        object: &DynamicObject,
        dest: &Destination,
        properties: &ClusterProperties,
    ) -> Result<Rendered> {
        let mut value =
            serde_json::to_value(object).map_err(|e| Error::serialization("workload object", e))?;

        let mut walk = Walk {
            env: &self.env,
            properties,
            errors: Vec::new(),
            changed: false,
            path: String::from("$"),
        };
        walk.visit(&mut value);

        let Walk { errors, changed, .. } = walk;
        if !changed {
            return Ok(Rendered {
                object: object.clone(),
                errors,
                changed,
            });
        }

        let object_ref = ObjectId::of(object);
        let errors = errors
            .into_iter()
            .map(|e| format!("destination {dest}, object {object_ref}, {e}"))
            .collect();
        let rendered = serde_json::from_value(value)
            .map_err(|e| Error::serialization("customized workload object", e))?;
        Ok(Rendered {
            object: rendered,
            errors,
            changed,
        })
    }
}

struct Walk<'a> {
    env: &'a Environment<'static>,
    properties: &'a ClusterProperties,
    errors: Vec<String>,
    changed: bool,
    path: String,
}

impl Walk<'_> {
    fn visit(&mut self, value: &mut Value) {
        match value {
            Value::String(text) => self.expand(text),
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let len = self.path.len();
                    push_key(&mut self.path, key);
                    self.visit(child);
                    self.path.truncate(len);
                }
            }
            Value::Array(items) => {
                for (idx, child) in items.iter_mut().enumerate() {
                    let len = self.path.len();
                    self.path.push_str(&format!("[{idx}]"));
                    self.visit(child);
                    self.path.truncate(len);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn expand(&mut self, text: &mut String) {
        if !TEMPLATE_MARKERS.iter().any(|marker| text.contains(marker)) {
            return;
        }
        match self.env.render_str(text, &**self.properties) {
            Ok(expanded) => {
                if expanded != *text {
                    *text = expanded;
                    self.changed = true;
                }
            }
            Err(err) => {
                self.errors.push(format!("path {}: {err}", self.path));
                self.changed = true;
            }
        }
    }
}

/// Appends `.key`, or `["key"]` when the key is not a plain name.
fn push_key(path: &mut String, key: &str) {
    let plain = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        path.push('.');
        path.push_str(key);
    } else {
        path.push_str(&format!("[{key:?}]"));
    }
}

#[cfg(test)]
#[path = "customize_tests.rs"]
mod customize_tests;
