// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Transport abstraction: packing workload objects into carrier ("wrapped") objects.
//!
//! A [`Transport`] turns a batch of [`Wrapee`]s into one carrier object that some delivery
//! agent understands, and can recover the identities of the objects inside an existing
//! carrier object (its [`Gloss`]) for cheap drift detection.
//!
//! ## Implementations
//!
//! - [`manifestwork::ManifestWorkTransport`] - Open Cluster Management `ManifestWork`

pub mod manifestwork;

use crate::errors::{Error, Result};
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// API group plus kind of an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }

    /// Group and kind from an object's `apiVersion` and `kind`.
    #[must_use]
    pub fn of(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        Some(Self::new(
            group_of_api_version(&types.api_version),
            types.kind.clone(),
        ))
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// The group part of an `apiVersion`; empty for the core group.
#[must_use]
pub fn group_of_api_version(api_version: &str) -> &str {
    api_version
        .split_once('/')
        .map_or("", |(group, _version)| group)
}

/// Identity of one workload object inside a carrier object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    #[must_use]
    pub fn of(object: &DynamicObject) -> Self {
        let gk = GroupKind::of(object).unwrap_or_default();
        Self {
            group: gk.group,
            kind: gk.kind,
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gk = GroupKind::new(self.group.as_str(), self.kind.as_str());
        if self.namespace.is_empty() {
            write!(f, "{gk} {}", self.name)
        } else {
            write!(f, "{gk} {}/{}", self.namespace, self.name)
        }
    }
}

/// The set of object identities held by one carrier object.
pub type Gloss = BTreeSet<ObjectId>;

/// Maps each kind present in a Binding's workload to its resource name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KindToResource(BTreeMap<GroupKind, String>);

impl KindToResource {
    pub fn insert(&mut self, gk: GroupKind, resource: impl Into<String>) {
        self.0.insert(gk, resource.into());
    }

    #[must_use]
    pub fn resource_for(&self, gk: &GroupKind) -> Option<&str> {
        self.0.get(gk).map(String::as_str)
    }
}

/// A workload object after destination-independent transformation, ready to be wrapped.
#[derive(Clone, Debug)]
pub struct Wrapee {
    pub object: DynamicObject,
    /// Create in the destination but never update there.
    pub create_only: bool,
    /// UID of the object in the workload description space.
    pub source_uid: String,
}

impl Wrapee {
    #[must_use]
    pub fn id(&self) -> ObjectId {
        ObjectId::of(&self.object)
    }
}

/// A carrier format for workload objects.
pub trait Transport: Send + Sync {
    /// Short name used on the command line.
    fn name(&self) -> &'static str;

    /// The API resource of the carrier kind in the inventory space.
    fn wrapped_object_resource(&self) -> ApiResource;

    /// Packs the given objects into one carrier object with no name or namespace.
    /// Zero wrapees produce a valid empty carrier.
    ///
    /// # Errors
    ///
    /// Returns an error if an object cannot be serialized or its resource is unknown.
    fn wrap_objects(
        &self,
        wrapees: &[Wrapee],
        kind_to_resource: &KindToResource,
    ) -> Result<DynamicObject>;

    /// Recovers the identities of the objects inside a carrier object.
    ///
    /// # Errors
    ///
    /// Returns an error if the carrier object is malformed.
    fn unwrap_objects(
        &self,
        wrapped: &DynamicObject,
        kind_to_resource: &KindToResource,
    ) -> Result<Gloss>;
}

/// Looks up a built-in transport by name.
///
/// # Errors
///
/// Returns [`Error::InvalidConfiguration`] for an unknown name.
pub fn transport_for_name(name: &str) -> Result<Arc<dyn Transport>> {
    match name {
        manifestwork::TRANSPORT_NAME => Ok(Arc::new(manifestwork::ManifestWorkTransport)),
        other => Err(Error::InvalidConfiguration(format!(
            "unknown transport {other:?}; supported: {}",
            manifestwork::TRANSPORT_NAME
        ))),
    }
}
