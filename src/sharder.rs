// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Packing a Binding's workload objects into size- and count-bounded wrapped objects.
//!
//! Packing is greedy and keeps the input order. A batch is flushed before adding the next
//! object when the object's serialized size plus the batch's running size reaches the size
//! limit, or when the batch already holds the maximum number of objects.
//!
//! # Naming
//!
//! - With at most one object per wrapped object, the name is
//!   `{binding-uid}-{wds-name}-{object-uid}`, stable for as long as the object exists.
//! - Otherwise the name is `{binding-name}-{wds-name}-{shard-index}`, stable for as long as
//!   the Binding's object list is unchanged.

use crate::constants::{ORIGIN_BINDING_LABEL, ORIGIN_GENERATION_ANNOTATION, ORIGIN_WDS_LABEL};
use crate::crd::Binding;
use crate::errors::{Error, Result};
use crate::transport::{Gloss, KindToResource, Transport, Wrapee};
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::trace;

/// One wrapped object to propagate, plus the identities of the objects inside it.
#[derive(Clone, Debug)]
pub struct WrappedBatch {
    /// Named and labelled, without a namespace.
    pub object: DynamicObject,
    pub gloss: Gloss,
}

/// Splits wrapees into wrapped objects.
pub struct Sharder {
    transport: Arc<dyn Transport>,
    wds_name: String,
    max_size: usize,
    max_count: usize,
}

impl Sharder {
    pub fn new(
        transport: Arc<dyn Transport>,
        wds_name: impl Into<String>,
        max_size: usize,
        max_count: usize,
    ) -> Self {
        Self {
            transport,
            wds_name: wds_name.into(),
            max_size,
            max_count: max_count.max(1),
        }
    }

    #[must_use]
    pub fn wds_name(&self) -> &str {
        &self.wds_name
    }

    /// Wraps `wrapees` for `binding`. No wrapees yield no batches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTooLarge`] if one object alone exceeds the size limit, and
    /// transport or serialization errors from wrapping.
    pub fn wrap(
        &self,
        binding: &Binding,
        wrapees: &[Wrapee],
        kind_to_resource: &KindToResource,
    ) -> Result<Vec<WrappedBatch>> {
        let mut batches = Vec::new();
        let mut pending: Vec<Wrapee> = Vec::new();
        let mut pending_size = 0usize;
        let mut gloss = Gloss::new();

        for wrapee in wrapees {
            let size = serde_json::to_vec(&wrapee.object)
                .map_err(|e| Error::serialization(format!("object {}", wrapee.id()), e))?
                .len();
            if size > self.max_size {
                return Err(Error::ObjectTooLarge {
                    object: wrapee.id().to_string(),
                    size,
                    max: self.max_size,
                });
            }
            let full = size + pending_size >= self.max_size || pending.len() + 1 > self.max_count;
            if full && !pending.is_empty() {
                let shard = batches.len();
                batches.push(self.flush(
                    binding,
                    &pending,
                    std::mem::take(&mut gloss),
                    kind_to_resource,
                    shard,
                )?);
                pending.clear();
                pending_size = 0;
            }
            gloss.insert(wrapee.id());
            pending.push(wrapee.clone());
            pending_size += size;
        }

        if !pending.is_empty() {
            let shard = batches.len();
            batches.push(self.flush(binding, &pending, gloss, kind_to_resource, shard)?);
        }
        Ok(batches)
    }

    fn flush(
        &self,
        binding: &Binding,
        batch: &[Wrapee],
        gloss: Gloss,
        kind_to_resource: &KindToResource,
        shard: usize,
    ) -> Result<WrappedBatch> {
        let mut object = self.transport.wrap_objects(batch, kind_to_resource)?;

        let name = match batch.last() {
            Some(last) if self.max_count == 1 => format!(
                "{}-{}-{}",
                binding.uid().unwrap_or_default(),
                self.wds_name,
                last.source_uid
            ),
            _ => format!("{}-{}-{shard}", binding.name_any(), self.wds_name),
        };
        trace!(name = %name, objects = batch.len(), "Wrapped batch");

        object.metadata.name = Some(name);
        object.metadata.namespace = None;
        object
            .labels_mut()
            .insert(ORIGIN_BINDING_LABEL.to_string(), binding.name_any());
        object
            .labels_mut()
            .insert(ORIGIN_WDS_LABEL.to_string(), self.wds_name.clone());
        object.annotations_mut().insert(
            ORIGIN_GENERATION_ANNOTATION.to_string(),
            binding.metadata.generation.unwrap_or_default().to_string(),
        );
        Ok(WrappedBatch { object, gloss })
    }
}

#[cfg(test)]
#[path = "sharder_tests.rs"]
mod sharder_tests;
