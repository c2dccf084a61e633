// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the transport controller.
//!
//! Every error returned to the work queue is classified by [`Error::is_retryable`]:
//! retryable errors are re-queued with rate-limited backoff, the rest are logged and dropped.
//! User mistakes (bad removal queries, unknown template properties) are not errors at this
//! level; they are written into the status of the offending object.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while reconciling a work item.
#[derive(Error, Debug)]
pub enum Error {
    /// A call to the Kubernetes API failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A workload object referenced by a Binding does not exist (yet).
    #[error("workload object {object} not found in the workload description space")]
    WorkloadObjectNotFound {
        /// Human-readable reference to the missing object
        object: String,
    },

    /// One workload object alone is larger than the wrapped-object size limit.
    #[error("object {object} is {size} bytes, larger than the max wrapped size of {max} bytes")]
    ObjectTooLarge {
        object: String,
        size: usize,
        max: usize,
    },

    /// JSON (de)serialization of an object failed.
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// The transport could not wrap or unwrap objects.
    #[error("transport error: {0}")]
    Transport(String),

    /// Process configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A reflector stopped before its store finished the initial listing.
    #[error("cache of {0} stopped before its initial sync")]
    CacheSync(String),
}

impl Error {
    /// Returns true if the work item should be retried with backoff.
    ///
    /// API failures and missing workload objects are transient: the API server may recover and
    /// the object may yet be created. An oversized object or a bad configuration never fixes
    /// itself without a new event.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube(_) | Self::WorkloadObjectNotFound { .. } => true,
            Self::ObjectTooLarge { .. }
            | Self::Serialization { .. }
            | Self::Transport(_)
            | Self::InvalidConfiguration(_)
            | Self::CacheSync(_) => false,
        }
    }

    pub(crate) fn serialization(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            what: what.into(),
            source,
        }
    }
}

/// Returns true if the error is a Kubernetes "not found" response.
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 404)
}

/// Returns true if the error is a Kubernetes "already exists" or conflict response.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 409)
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
