//! Error taxonomy for the storage engine
//!
//! Mirrors the error classes a caller needs to distinguish:
//! - `InvalidSchema` / `InvalidQuery` abort the request synchronously.
//! - `NotFound` covers both "no such table" and "zero rows for a primary key".
//! - `ConditionFailed` is a distinct, non-fatal outcome for `IF ...` writes.
//! - `Transient` / `Fatal` classify driver-level failures.

use thiserror::Error;

/// Errors produced by the storage engine.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A table schema failed validation (missing hash, unknown type, bad order).
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A request's predicate or projection could not be compiled.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Schema not present in `meta`, or a primary-key read returned no rows.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lightweight-transaction `IF ...` condition evaluated false.
    ///
    /// Not a fatal error: callers distinguish this from other failures to
    /// decide whether to retry with different values.
    #[error("condition failed: {0}")]
    ConditionFailed(String),

    /// Driver timeout or coordinator overload. Retryable at the caller's
    /// discretion; the facade never retries writes on its own.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Authentication failure, schema mismatch, or connection refused after
    /// the initial bootstrap succeeded. Not retryable.
    #[error("fatal store error: {0}")]
    Fatal(String),
}

/// Result alias used throughout the storage engine.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// True for errors the caller may reasonably retry (`Transient` only).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidQuery(format!("json: {err}"))
    }
}
