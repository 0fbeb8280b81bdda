use crate::provisioner::ProvisionError;
use crate::user_store::StoreError;
use crate::validation::FieldError;
use std::fmt;
use thiserror::Error;

/// Step of a multi-step operation that failed after earlier steps succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Provision,
    Ingest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Provision => "storage provisioning",
            Stage::Ingest => "media ingestion",
        })
    }
}

/// Outcome taxonomy of lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No row (or no storage) for the addressed record
    #[error("{0} not found")]
    NotFound(String),

    /// Every generated key collided with an existing one
    #[error("no unused key found after {attempts} attempts")]
    AlreadyExists { attempts: u32 },

    /// The storage root is unreachable or not writable
    #[error("storage is not accessible: {0}")]
    Access(#[source] ProvisionError),

    /// Caller input rejected before any side effect
    #[error("invalid input: {}", describe(.0))]
    Validation(Vec<FieldError>),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// A later step failed; earlier steps were rolled back best-effort
    #[error("{stage} failed: {source}")]
    PartialFailure {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LifecycleError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn partial(stage: Stage, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::PartialFailure {
            stage,
            source: Box::new(source),
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError {
            field: field.to_string(),
            message: message.into(),
        }])
    }
}

impl From<Vec<FieldError>> for LifecycleError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

fn describe(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
