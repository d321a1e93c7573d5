//! Failure classification for downstream writes
//!
//! A write to an optional kind whose CRD is not installed is not a
//! reconcile failure: the kind is skipped and left out of status.

use crate::registry::DownstreamKind;
use crate::Error;

/// How a downstream write failure is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    /// The kind is not served by this cluster; skip it
    SchemaUnavailable,
    /// A genuine failure; accumulate and fail the reconcile
    Real,
}

/// Classify a failure from applying a record of `kind`.
///
/// Only optional kinds degrade: a registry miss, or a 404 from the write
/// itself saying the API server no longer serves the type (the CRD was
/// removed after discovery). A 404 for a missing namespace or object, and
/// any failure on a required kind, is real.
pub fn classify(kind: DownstreamKind, error: &Error) -> Degradation {
    match error {
        Error::SchemaUnavailable { .. } if kind.is_optional() => Degradation::SchemaUnavailable,
        e if kind.is_optional() && e.is_unserved_type() => Degradation::SchemaUnavailable,
        _ => Degradation::Real,
    }
}
