//! Error types surfaced by the orchestration service.

use thiserror::Error;
use uuid::Uuid;

use crate::messaging::DispatchError;
use crate::repository::RepositoryError;

/// Errors visible at the orchestration service boundary.
///
/// Callers match on the kind; repository and bus failures are wrapped with a
/// short context describing the operation that failed.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The supplied schema bytes do not parse as a JSON Schema document
    #[error("invalid json schema")]
    InvalidJsonSchema,

    /// The execution payload did not satisfy the saga's schema
    #[error("payload error: {0}")]
    PayloadValidation(String),

    #[error("saga {0} was not found")]
    SagaNotFound(Uuid),

    #[error("saga execution {0} was not found")]
    ExecutionNotFound(Uuid),

    #[error("saga must declare at least one step")]
    EmptySteps,

    #[error("{context}: {source}")]
    Repository {
        context: &'static str,
        #[source]
        source: RepositoryError,
    },

    #[error("{context}: {source}")]
    Dispatch {
        context: &'static str,
        #[source]
        source: DispatchError,
    },
}

impl OrchestrationError {
    pub fn repository(context: &'static str, source: RepositoryError) -> Self {
        OrchestrationError::Repository { context, source }
    }

    pub fn dispatch(context: &'static str, source: DispatchError) -> Self {
        OrchestrationError::Dispatch { context, source }
    }
}
