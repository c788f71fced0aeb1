//! Error taxonomy for registry operations.
//!
//! Three layers: [`ValidationError`] means the submission broke a business
//! rule and the caller should fix their input, [`StorageFault`] means the
//! embedded store misbehaved, and [`RegistryError::NotReady`] means the store
//! handle has not finished initializing yet.

use thiserror::Error;

use crate::validation::{Field, FieldErrors};

/// Top-level error returned by every registry operation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageFault),

    /// Raised by non-blocking accessors when the store is still initializing
    /// (or failed to initialize). [`crate::store::Store::open`] never returns
    /// this; it waits.
    #[error("store is not ready")]
    NotReady,
}

/// The submission violated a business rule. Actionable by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Field-level violations, at most one reason per field.
    #[error("invalid patient record: {0}")]
    Invalid(FieldErrors),

    /// A unique field value is already registered to another patient.
    #[error("a patient with this {field} is already registered")]
    Duplicate { field: Field },
}

/// The store failed for a reason unrelated to the submitted data. The
/// original driver message is preserved for diagnostics.
#[derive(Debug, Error)]
#[error("storage fault: {message}")]
pub struct StorageFault {
    message: String,
}

impl StorageFault {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        StorageFault { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<sqlx::Error> for StorageFault {
    fn from(err: sqlx::Error) -> Self {
        StorageFault::new(err.to_string())
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Storage(StorageFault::from(err))
    }
}
